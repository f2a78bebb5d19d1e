use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::retry::{retry_with_backoff, RetryConfig};
use std::time::Duration;

use super::{RevocationStore, StoreError};
use crate::models::{CredentialEntry, TenantId, UserId};

/// Retries transient store failures with backoff. `NotFound` and `Corrupt`
/// pass straight through.
pub struct RetryingStore<S> {
    inner: S,
    config: RetryConfig,
}

impl<S> RetryingStore<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: RevocationStore> RevocationStore for RetryingStore<S> {
    async fn put(&self, entry: &CredentialEntry, ttl: Duration) -> Result<(), StoreError> {
        retry_with_backoff(
            &self.config,
            "revocation_store.put",
            || self.inner.put(entry, ttl),
            StoreError::is_transient,
        )
        .await
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
    ) -> Result<CredentialEntry, StoreError> {
        retry_with_backoff(
            &self.config,
            "revocation_store.get",
            || self.inner.get(tenant_id, credential_id),
            StoreError::is_transient,
        )
        .await
    }

    async fn mark_revoked(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
        revoked_by: &str,
    ) -> Result<bool, StoreError> {
        // A retried write that already landed reports Ok(false); callers
        // treat that as success
        retry_with_backoff(
            &self.config,
            "revocation_store.mark_revoked",
            || self.inner.mark_revoked(tenant_id, credential_id, revoked_by),
            StoreError::is_transient,
        )
        .await
    }

    async fn touch(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        retry_with_backoff(
            &self.config,
            "revocation_store.touch",
            || self.inner.touch(tenant_id, credential_id, used_at),
            StoreError::is_transient,
        )
        .await
    }

    async fn revoke_all(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        revoked_by: &str,
    ) -> Result<usize, StoreError> {
        retry_with_backoff(
            &self.config,
            "revocation_store.revoke_all",
            || self.inner.revoke_all(tenant_id, user_id, revoked_by),
            StoreError::is_transient,
        )
        .await
    }

    async fn revoke_tenant(
        &self,
        tenant_id: &TenantId,
        revoked_by: &str,
    ) -> Result<usize, StoreError> {
        retry_with_backoff(
            &self.config,
            "revocation_store.revoke_tenant",
            || self.inner.revoke_tenant(tenant_id, revoked_by),
            StoreError::is_transient,
        )
        .await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}
