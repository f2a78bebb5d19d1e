//! Revocation store: per-credential state keyed by (tenant, credential id),
//! expiring together with the credential it describes.

pub mod memory;
pub mod redis;
pub mod retrying;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::models::{CredentialEntry, TenantId, UserId};

pub use self::memory::MemoryRevocationStore;
pub use self::redis::RedisRevocationStore;
pub use self::retrying::RetryingStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No live entry: never issued, or already expired.
    #[error("Credential not found")]
    NotFound,

    #[error("Corrupt revocation entry: {0}")]
    Corrupt(String),

    #[error("Revocation store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

impl StoreError {
    /// Only connectivity failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        StoreError::Unavailable(anyhow::Error::new(err))
    }
}

#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Store `entry`, replacing any previous entry with the same id. The entry
    /// disappears on its own after `ttl`.
    async fn put(&self, entry: &CredentialEntry, ttl: Duration) -> Result<(), StoreError>;

    async fn get(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
    ) -> Result<CredentialEntry, StoreError>;

    /// Set the revoked flag. `Ok(true)` if this call made the transition,
    /// `Ok(false)` if the entry was already revoked, `NotFound` if there is
    /// no live entry.
    async fn mark_revoked(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
        revoked_by: &str,
    ) -> Result<bool, StoreError>;

    /// Record use of a live entry. Missing entries are ignored.
    async fn touch(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Revoke every live entry of one user. Returns how many entries this
    /// call moved to revoked, so repeating it right away returns 0.
    async fn revoke_all(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        revoked_by: &str,
    ) -> Result<usize, StoreError>;

    /// Revoke every live entry in a tenant.
    async fn revoke_tenant(&self, tenant_id: &TenantId, revoked_by: &str)
        -> Result<usize, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
