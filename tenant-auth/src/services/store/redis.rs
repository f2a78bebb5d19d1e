use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, Client, Script};
use std::collections::HashMap;
use std::time::Duration;

use super::{RevocationStore, StoreError};
use crate::models::{CredentialEntry, CredentialKind, TenantId, UserId};

// KEYS: credential hash, user index, tenant user index
// ARGV: ttl milliseconds, credential id, user id, field/value pairs...
const PUT_SCRIPT: &str = r#"
redis.call('DEL', KEYS[1])
redis.call('HSET', KEYS[1], unpack(ARGV, 4))
local ttl = tonumber(ARGV[1])
redis.call('PEXPIRE', KEYS[1], ttl)
for i = 2, 3 do
  redis.call('SADD', KEYS[i], ARGV[i])
  if redis.call('PTTL', KEYS[i]) < ttl then
    redis.call('PEXPIRE', KEYS[i], ttl)
  end
end
return 1
"#;

// 0 = missing, 1 = revoked now, 2 = already revoked
const REVOKE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
if redis.call('HGET', KEYS[1], 'revoked') == '1' then
  return 2
end
redis.call('HSET', KEYS[1], 'revoked', '1', 'revoked_by', ARGV[1], 'revoked_at', ARGV[2])
return 1
"#;

const TOUCH_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  redis.call('HSET', KEYS[1], 'last_used_at', ARGV[1])
end
return 1
"#;

const REVOKED_NOW: i64 = 1;
const MISSING: i64 = 0;

/// Redis-backed revocation store.
///
/// Layout, per `prefix`:
/// - `{prefix}:{tenant}:cred:{id}` hash holding one [`CredentialEntry`],
///   expiring with the credential
/// - `{prefix}:{tenant}:user:{user}` set of credential ids of one user
/// - `{prefix}:{tenant}:users` set of users with credentials in the tenant
///
/// Index sets live as long as their longest-lived member. Writes to an
/// existing entry go through scripts that check existence first, so an
/// expired entry is never recreated as a partial hash.
#[derive(Clone)]
pub struct RedisRevocationStore {
    manager: ConnectionManager,
    prefix: String,
    put_script: Script,
    revoke_script: Script,
    touch_script: Script,
}

impl RedisRevocationStore {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            StoreError::from(e)
        })?;

        tracing::info!("Successfully connected to Redis");
        Ok(Self::with_manager(manager, prefix))
    }

    /// Share one connection manager between stores with different prefixes.
    pub fn with_manager(manager: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            manager,
            prefix: prefix.into(),
            put_script: Script::new(PUT_SCRIPT),
            revoke_script: Script::new(REVOKE_SCRIPT),
            touch_script: Script::new(TOUCH_SCRIPT),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn revoke_key(&self, key: &str, revoked_by: &str) -> Result<i64, StoreError> {
        let mut conn = self.manager.clone();
        let outcome: i64 = self
            .revoke_script
            .key(key)
            .arg(revoked_by)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;
        Ok(outcome)
    }

    async fn revoke_user(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        revoked_by: &str,
    ) -> Result<usize, StoreError> {
        let mut conn = self.manager.clone();
        let index = user_index_key(&self.prefix, tenant_id, user_id.as_str());
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(&index)
            .query_async(&mut conn)
            .await?;

        let mut revoked = 0;
        let mut stale = Vec::new();
        for id in ids {
            let key = credential_key(&self.prefix, tenant_id, &id);
            match self.revoke_key(&key, revoked_by).await {
                Ok(REVOKED_NOW) => revoked += 1,
                Ok(MISSING) => stale.push(id),
                Ok(_) => {}
                Err(e) => {
                    // Reported through the count; a repeat call picks it up
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        user_id = %user_id,
                        credential_id = %id,
                        error = %e,
                        "Failed to revoke credential during bulk revocation"
                    );
                }
            }
        }

        if !stale.is_empty() {
            let pruned: Result<(), _> = redis::cmd("SREM")
                .arg(&index)
                .arg(&stale)
                .query_async(&mut conn)
                .await;
            if let Err(e) = pruned {
                tracing::debug!(error = %e, "Failed to prune expired ids from user index");
            }
        }

        Ok(revoked)
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn put(&self, entry: &CredentialEntry, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let tenant_id = &entry.tenant_id;

        let mut invocation = self.put_script.prepare_invoke();
        invocation
            .key(credential_key(&self.prefix, tenant_id, &entry.credential_id))
            .key(user_index_key(&self.prefix, tenant_id, entry.user_id.as_str()))
            .key(tenant_users_key(&self.prefix, tenant_id))
            .arg(ttl_millis(ttl))
            .arg(&entry.credential_id)
            .arg(entry.user_id.as_str());
        for (field, value) in to_fields(entry) {
            invocation.arg(field).arg(value);
        }

        let _: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
    ) -> Result<CredentialEntry, StoreError> {
        let mut conn = self.manager.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(credential_key(&self.prefix, tenant_id, credential_id))
            .query_async(&mut conn)
            .await?;

        if fields.is_empty() {
            return Err(StoreError::NotFound);
        }
        from_fields(&fields)
    }

    async fn mark_revoked(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
        revoked_by: &str,
    ) -> Result<bool, StoreError> {
        let key = credential_key(&self.prefix, tenant_id, credential_id);
        match self.revoke_key(&key, revoked_by).await? {
            MISSING => Err(StoreError::NotFound),
            REVOKED_NOW => Ok(true),
            _ => Ok(false),
        }
    }

    async fn touch(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: i64 = self
            .touch_script
            .key(credential_key(&self.prefix, tenant_id, credential_id))
            .arg(used_at.to_rfc3339())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn revoke_all(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        revoked_by: &str,
    ) -> Result<usize, StoreError> {
        self.revoke_user(tenant_id, user_id, revoked_by).await
    }

    async fn revoke_tenant(
        &self,
        tenant_id: &TenantId,
        revoked_by: &str,
    ) -> Result<usize, StoreError> {
        let mut conn = self.manager.clone();
        let users: Vec<String> = redis::cmd("SMEMBERS")
            .arg(tenant_users_key(&self.prefix, tenant_id))
            .query_async(&mut conn)
            .await?;

        let mut revoked = 0;
        for raw in users {
            let user_id = match UserId::parse(raw.as_str()) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(tenant_id = %tenant_id, error = %e, "Skipping invalid user id in tenant index");
                    continue;
                }
            };
            match self.revoke_user(tenant_id, &user_id, revoked_by).await {
                Ok(n) => revoked += n,
                Err(e) => tracing::warn!(
                    tenant_id = %tenant_id,
                    user_id = %user_id,
                    error = %e,
                    "Failed to revoke user credentials during tenant revocation"
                ),
            }
        }
        Ok(revoked)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(anyhow::anyhow!("Redis health check failed: {}", e)))
    }
}

/// Millisecond expiry for `PEXPIRE`. Never rounds a sub-second remainder
/// away, and never reaches zero.
fn ttl_millis(ttl: Duration) -> u64 {
    let millis = ttl.as_nanos().div_ceil(1_000_000);
    u64::try_from(millis).unwrap_or(u64::MAX).max(1)
}

pub fn credential_key(prefix: &str, tenant_id: &TenantId, credential_id: &str) -> String {
    format!("{}:{}:cred:{}", prefix, tenant_id, credential_id)
}

pub fn user_index_key(prefix: &str, tenant_id: &TenantId, user_id: &str) -> String {
    format!("{}:{}:user:{}", prefix, tenant_id, user_id)
}

pub fn tenant_users_key(prefix: &str, tenant_id: &TenantId) -> String {
    format!("{}:{}:users", prefix, tenant_id)
}

fn to_fields(entry: &CredentialEntry) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("tenant_id", entry.tenant_id.to_string()),
        ("credential_id", entry.credential_id.clone()),
        ("user_id", entry.user_id.to_string()),
        ("kind", entry.kind.to_string()),
        ("issued_at", entry.issued_at.to_rfc3339()),
        ("expires_at", entry.expires_at.to_rfc3339()),
        ("revoked", if entry.revoked { "1" } else { "0" }.to_string()),
    ];
    let optional = [
        ("last_used_at", entry.last_used_at.map(|t| t.to_rfc3339())),
        ("revoked_by", entry.revoked_by.clone()),
        ("revoked_at", entry.revoked_at.map(|t| t.to_rfc3339())),
        ("secret_hash", entry.secret_hash.clone()),
        ("paired_with", entry.paired_with.clone()),
    ];
    fields.extend(
        optional
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v))),
    );
    fields
}

fn from_fields(fields: &HashMap<String, String>) -> Result<CredentialEntry, StoreError> {
    let required = |name: &str| {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| StoreError::Corrupt(format!("missing field {}", name)))
    };
    let timestamp = |name: &str, raw: &str| {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt(format!("invalid {}: {}", name, e)))
    };
    let optional_timestamp = |name: &str| {
        fields
            .get(name)
            .map(|raw| timestamp(name, raw))
            .transpose()
    };

    Ok(CredentialEntry {
        tenant_id: TenantId::parse(required("tenant_id")?)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        credential_id: required("credential_id")?.to_string(),
        user_id: UserId::parse(required("user_id")?)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        kind: required("kind")?
            .parse::<CredentialKind>()
            .map_err(StoreError::Corrupt)?,
        issued_at: timestamp("issued_at", required("issued_at")?)?,
        expires_at: timestamp("expires_at", required("expires_at")?)?,
        last_used_at: optional_timestamp("last_used_at")?,
        revoked: required("revoked")? == "1",
        revoked_by: fields.get("revoked_by").cloned(),
        revoked_at: optional_timestamp("revoked_at")?,
        secret_hash: fields.get("secret_hash").cloned(),
        paired_with: fields.get("paired_with").cloned(),
    })
}
