use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::identity::{TenantId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Access,
    Refresh,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Access => "access",
            CredentialKind::Refresh => "refresh",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(CredentialKind::Access),
            "refresh" => Ok(CredentialKind::Refresh),
            _ => Err(format!("Invalid credential kind: {}", s)),
        }
    }
}

/// State the revocation store keeps for one issued credential.
///
/// Access and refresh credentials share this record; `secret_hash` and
/// `paired_with` are only populated for refresh credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub tenant_id: TenantId,
    pub credential_id: String,
    pub user_id: UserId,
    pub kind: CredentialKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub revoked_by: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// SHA-256 of the refresh secret, hex encoded
    pub secret_hash: Option<String>,
    /// Access credential issued together with this refresh credential
    pub paired_with: Option<String>,
}

impl CredentialEntry {
    pub fn access(
        tenant_id: TenantId,
        credential_id: String,
        user_id: UserId,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            credential_id,
            user_id,
            kind: CredentialKind::Access,
            issued_at,
            expires_at,
            last_used_at: None,
            revoked: false,
            revoked_by: None,
            revoked_at: None,
            secret_hash: None,
            paired_with: None,
        }
    }

    pub fn refresh(
        tenant_id: TenantId,
        credential_id: String,
        user_id: UserId,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        secret_hash: String,
        paired_with: Option<String>,
    ) -> Self {
        Self {
            kind: CredentialKind::Refresh,
            secret_hash: Some(secret_hash),
            paired_with,
            ..Self::access(tenant_id, credential_id, user_id, issued_at, expires_at)
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Time left until natural expiry, or `None` once it has passed.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Flip the entry to revoked. Returns `false` if it already was; an
    /// entry never goes back to live.
    pub fn mark_revoked(&mut self, revoked_by: &str, at: DateTime<Utc>) -> bool {
        if self.revoked {
            return false;
        }
        self.revoked = true;
        self.revoked_by = Some(revoked_by.to_string());
        self.revoked_at = Some(at);
        true
    }
}

/// Read view of an access credential's store entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessCredentialMetadata {
    pub tenant_id: TenantId,
    pub credential_id: String,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_by: Option<String>,
}

impl From<CredentialEntry> for AccessCredentialMetadata {
    fn from(e: CredentialEntry) -> Self {
        Self {
            tenant_id: e.tenant_id,
            credential_id: e.credential_id,
            user_id: e.user_id,
            issued_at: e.issued_at,
            expires_at: e.expires_at,
            revoked: e.revoked,
            revoked_by: e.revoked_by,
        }
    }
}

/// Read view of a refresh credential's store entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshCredentialMetadata {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub credential_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub revoked_by: Option<String>,
    pub paired_with: Option<String>,
}

impl From<CredentialEntry> for RefreshCredentialMetadata {
    fn from(e: CredentialEntry) -> Self {
        Self {
            tenant_id: e.tenant_id,
            user_id: e.user_id,
            credential_id: e.credential_id,
            issued_at: e.issued_at,
            expires_at: e.expires_at,
            last_used_at: e.last_used_at,
            revoked: e.revoked,
            revoked_by: e.revoked_by,
            paired_with: e.paired_with,
        }
    }
}
