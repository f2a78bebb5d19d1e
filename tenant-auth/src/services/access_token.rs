use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::codec::{AccessClaims, CredentialCodec};
use super::error::AuthError;
use super::store::{RevocationStore, StoreError};
use crate::models::{AccessCredentialMetadata, CredentialEntry, CredentialKind, TenantId, UserId};

const EXPIRY_GRACE: std::time::Duration = std::time::Duration::from_secs(1);

/// A freshly signed access credential.
#[derive(Debug, Clone, Serialize)]
pub struct AccessCredential {
    pub token: String,
    pub credential_id: String,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Short-lived signed credentials whose revocation state lives in the store.
#[derive(Clone)]
pub struct AccessTokenService {
    codec: CredentialCodec,
    store: Arc<dyn RevocationStore>,
    ttl: Duration,
}

impl AccessTokenService {
    pub fn new(codec: CredentialCodec, store: Arc<dyn RevocationStore>, ttl: Duration) -> Self {
        Self { codec, store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn health_check(&self) -> Result<(), AuthError> {
        Ok(self.store.health_check().await?)
    }

    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, user_id = %user_id))]
    pub async fn issue(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<AccessCredential, AuthError> {
        let now = Utc::now();
        let claims = AccessClaims::new(tenant_id, user_id, self.codec.issuer(), now, self.ttl);
        let token = self.codec.encode(&claims)?;

        let entry = CredentialEntry::access(
            tenant_id.clone(),
            claims.jti.clone(),
            user_id.clone(),
            claims.issued_at(),
            claims.expires_at(),
        );
        let ttl = entry.remaining_ttl(now).ok_or_else(|| {
            AuthError::Internal(anyhow::anyhow!("Access credential TTL must be positive"))
        })?;
        // `exp` has whole-second resolution and stays valid through that
        // second, so the entry must outlive it
        self.store.put(&entry, ttl + EXPIRY_GRACE).await?;

        tracing::debug!(credential_id = %entry.credential_id, "Access credential issued");

        Ok(AccessCredential {
            token,
            credential_id: entry.credential_id,
            tenant_id: entry.tenant_id,
            user_id: entry.user_id,
            issued_at: entry.issued_at,
            expires_at: entry.expires_at,
        })
    }

    pub async fn fetch(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
    ) -> Result<AccessCredentialMetadata, AuthError> {
        match self.store.get(tenant_id, credential_id).await {
            Ok(entry) if entry.kind == CredentialKind::Access => Ok(entry.into()),
            Ok(_) | Err(StoreError::NotFound) => {
                Err(AuthError::NotFound(format!("access credential {}", credential_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Validate a credential presented on behalf of `tenant_id`.
    pub async fn validate(
        &self,
        tenant_id: &TenantId,
        token: &str,
    ) -> Result<AccessCredentialMetadata, AuthError> {
        let claims = self.codec.decode(token)?;
        if &claims.tenant()? != tenant_id {
            tracing::warn!(
                expected = %tenant_id,
                presented = %claims.tenant_id,
                "Access credential presented for another tenant"
            );
            return Err(AuthError::TenantMismatch);
        }
        self.check_store(&claims).await
    }

    /// Validate a credential taking the tenant from its verified claims.
    pub async fn verify(&self, token: &str) -> Result<AccessCredentialMetadata, AuthError> {
        let claims = self.codec.decode(token)?;
        self.check_store(&claims).await
    }

    /// Signature-checked claims of a credential that may already be expired.
    pub fn inspect(&self, token: &str) -> Result<AccessClaims, AuthError> {
        Ok(self.codec.decode_ignoring_expiry(token)?)
    }

    /// Revoke one credential. Returns whether this call revoked it; unknown
    /// and already revoked credentials are not errors.
    pub async fn revoke(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
        revoked_by: &str,
    ) -> Result<bool, AuthError> {
        match self
            .store
            .mark_revoked(tenant_id, credential_id, revoked_by)
            .await
        {
            Ok(newly) => {
                if newly {
                    tracing::info!(
                        tenant_id = %tenant_id,
                        credential_id = %credential_id,
                        revoked_by = %revoked_by,
                        "Access credential revoked"
                    );
                }
                Ok(newly)
            }
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Revoke by presenting the credential itself. Expired credentials are
    /// accepted; a bad signature is not.
    pub async fn revoke_token(&self, token: &str, revoked_by: &str) -> Result<bool, AuthError> {
        let claims = self.inspect(token)?;
        let tenant_id = claims.tenant()?;
        self.revoke(&tenant_id, &claims.jti, revoked_by).await
    }

    pub async fn revoke_all(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        revoked_by: &str,
    ) -> Result<usize, AuthError> {
        Ok(self.store.revoke_all(tenant_id, user_id, revoked_by).await?)
    }

    pub async fn revoke_tenant(
        &self,
        tenant_id: &TenantId,
        revoked_by: &str,
    ) -> Result<usize, AuthError> {
        Ok(self.store.revoke_tenant(tenant_id, revoked_by).await?)
    }

    /// The store and the signature must agree before a credential is trusted.
    async fn check_store(
        &self,
        claims: &AccessClaims,
    ) -> Result<AccessCredentialMetadata, AuthError> {
        let tenant_id = claims.tenant()?;
        let entry = match self.store.get(&tenant_id, &claims.jti).await {
            Ok(entry) => entry,
            Err(StoreError::NotFound) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    credential_id = %claims.jti,
                    "Signed access credential has no revocation entry"
                );
                return Err(AuthError::UnknownCredential);
            }
            Err(e) => return Err(e.into()),
        };

        if entry.kind != CredentialKind::Access || entry.user_id.as_str() != claims.sub {
            return Err(AuthError::UnknownCredential);
        }
        if entry.revoked {
            return Err(AuthError::Revoked);
        }
        Ok(entry.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryRevocationStore;
    use secrecy::SecretString;

    fn service() -> AccessTokenService {
        let codec = CredentialCodec::new(
            &SecretString::new("access-test-secret-of-sufficient-length".to_string()),
            "tenant-auth",
        );
        AccessTokenService::new(
            codec,
            Arc::new(MemoryRevocationStore::new()),
            Duration::minutes(15),
        )
    }

    fn ids() -> (TenantId, UserId) {
        (
            TenantId::parse("acme").unwrap(),
            UserId::parse("alice").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let svc = service();
        let (tenant, user) = ids();
        let credential = svc.issue(&tenant, &user).await.unwrap();

        let meta = svc.validate(&tenant, &credential.token).await.unwrap();
        assert_eq!(meta.credential_id, credential.credential_id);
        assert_eq!(meta.user_id, user);
        assert!(!meta.revoked);

        let fetched = svc.fetch(&tenant, &credential.credential_id).await.unwrap();
        assert_eq!(fetched, meta);
    }

    #[tokio::test]
    async fn test_validate_rejects_other_tenant() {
        let svc = service();
        let (tenant, user) = ids();
        let credential = svc.issue(&tenant, &user).await.unwrap();

        let other = TenantId::parse("globex").unwrap();
        let err = svc.validate(&other, &credential.token).await.unwrap_err();
        assert!(matches!(err, AuthError::TenantMismatch));
    }

    #[tokio::test]
    async fn test_revoked_credential_fails_validation() {
        let svc = service();
        let (tenant, user) = ids();
        let credential = svc.issue(&tenant, &user).await.unwrap();

        assert!(svc
            .revoke(&tenant, &credential.credential_id, "admin")
            .await
            .unwrap());
        assert!(!svc
            .revoke(&tenant, &credential.credential_id, "admin")
            .await
            .unwrap());

        let err = svc.verify(&credential.token).await.unwrap_err();
        assert!(matches!(err, AuthError::Revoked));
    }

    #[tokio::test]
    async fn test_signed_but_unrecorded_credential_is_unknown() {
        let svc = service();
        let (tenant, user) = ids();
        let claims = AccessClaims::new(
            &tenant,
            &user,
            "tenant-auth",
            Utc::now(),
            Duration::minutes(5),
        );
        let token = svc.codec.encode(&claims).unwrap();

        let err = svc.validate(&tenant, &token).await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownCredential));
    }

    #[tokio::test]
    async fn test_revoke_unknown_id_is_not_an_error() {
        let svc = service();
        let (tenant, _) = ids();
        assert!(!svc.revoke(&tenant, "never-issued", "admin").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_token_rejects_garbage() {
        let svc = service();
        let err = svc.revoke_token("not-a-token", "admin").await.unwrap_err();
        assert!(matches!(err, AuthError::Malformed));
    }
}
