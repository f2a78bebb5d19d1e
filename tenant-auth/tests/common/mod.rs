//! Shared fixtures for tenant-auth integration tests.
//!
//! Everything runs against the in-memory store, permission source and audit
//! sink, so no external services are needed.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use service_core::config::Config as CommonConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once, OnceLock};
use std::time::Duration;
use tenant_auth::config::AuthConfig;
use tenant_auth::dtos::{AuthenticateRequest, TokenPairResponse};
use tenant_auth::models::{
    CredentialEntry, Permission, Role, TenantId, UserId, UserRoleAssignment,
};
use tenant_auth::services::{
    AuthService, MemoryAuditSink, MemoryPermissionSource, MemoryRevocationStore,
    RevocationStore, StoreError,
};
use tenant_auth::utils::hash_password;

pub const PASSWORD: &str = "correct horse battery staple";
pub const JWT_SECRET: &str = "integration-test-secret-at-least-32-bytes";

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,tenant_auth=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Argon2 is slow in debug builds; hash the shared password once.
pub fn password_hash() -> String {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| {
        hash_password(&SecretString::new(PASSWORD.to_string()))
            .unwrap()
            .into_string()
    })
    .clone()
}

pub fn tenant(id: &str) -> TenantId {
    TenantId::parse(id).unwrap()
}

pub fn user(id: &str) -> UserId {
    UserId::parse(id).unwrap()
}

/// Memory store whose writes can be switched to fail, standing in for a
/// store that goes away mid-request.
pub struct FaultyStore {
    inner: Arc<MemoryRevocationStore>,
    fail_puts: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryRevocationStore>) -> Self {
        Self {
            inner,
            fail_puts: AtomicBool::new(false),
        }
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RevocationStore for FaultyStore {
    async fn put(&self, entry: &CredentialEntry, ttl: Duration) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(anyhow::anyhow!("store down")));
        }
        self.inner.put(entry, ttl).await
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
    ) -> Result<CredentialEntry, StoreError> {
        self.inner.get(tenant_id, credential_id).await
    }

    async fn mark_revoked(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
        revoked_by: &str,
    ) -> Result<bool, StoreError> {
        self.inner.mark_revoked(tenant_id, credential_id, revoked_by).await
    }

    async fn touch(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.touch(tenant_id, credential_id, used_at).await
    }

    async fn revoke_all(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        revoked_by: &str,
    ) -> Result<usize, StoreError> {
        self.inner.revoke_all(tenant_id, user_id, revoked_by).await
    }

    async fn revoke_tenant(
        &self,
        tenant_id: &TenantId,
        revoked_by: &str,
    ) -> Result<usize, StoreError> {
        self.inner.revoke_tenant(tenant_id, revoked_by).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

pub struct TestApp {
    pub config: AuthConfig,
    pub service: AuthService,
    pub access_store: Arc<MemoryRevocationStore>,
    pub refresh_store: Arc<MemoryRevocationStore>,
    /// Wraps `refresh_store`; the service writes refresh credentials through it.
    pub refresh_faults: Arc<FaultyStore>,
    pub source: Arc<MemoryPermissionSource>,
    pub audit: Arc<MemoryAuditSink>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_env(&[])
    }

    /// Build the service with extra configuration keys, e.g. a short TTL.
    pub fn with_env(overrides: &[(&str, &str)]) -> Self {
        init_tracing();

        let mut env: HashMap<String, String> = HashMap::new();
        env.insert("JWT_SECRET".to_string(), JWT_SECRET.to_string());
        env.insert("SYSTEM_TENANT_ID".to_string(), "system".to_string());
        env.insert("SYSTEM_ADMIN_USER_ID".to_string(), "root".to_string());
        for (key, value) in overrides {
            env.insert(key.to_string(), value.to_string());
        }

        let config = AuthConfig::from_lookup(CommonConfig::default(), |key| env.get(key).cloned())
            .unwrap();

        let access_store = Arc::new(MemoryRevocationStore::new());
        let refresh_store = Arc::new(MemoryRevocationStore::new());
        let refresh_faults = Arc::new(FaultyStore::new(refresh_store.clone()));
        let source = Arc::new(MemoryPermissionSource::new());
        let audit = Arc::new(MemoryAuditSink::new());

        let service = AuthService::from_config(
            &config,
            access_store.clone(),
            refresh_faults.clone(),
            source.clone(),
            audit.clone(),
        );

        Self {
            config,
            service,
            access_store,
            refresh_store,
            refresh_faults,
            source,
            audit,
        }
    }

    pub async fn login(&self, tenant_id: &str, user_id: &str) -> TokenPairResponse {
        self.service
            .authenticate(AuthenticateRequest {
                tenant_id: tenant_id.to_string(),
                user_id: user_id.to_string(),
                password: PASSWORD.to_string(),
                password_hash: password_hash(),
            })
            .await
            .unwrap()
    }

    pub fn add_permission(&self, tenant_id: &str, id: &str, key: &str) {
        let (resource, action) = key.split_once(':').unwrap();
        self.source
            .add_permission(Permission::new(tenant(tenant_id), id, resource, action))
            .unwrap();
    }

    pub fn add_role(&self, role: Role) {
        self.source.add_role(role).unwrap();
    }

    pub fn assign(&self, tenant_id: &str, user_id: &str, role_id: &str) {
        self.source
            .assign_role(UserRoleAssignment::new(
                tenant(tenant_id),
                user(user_id),
                role_id,
                "test-setup",
            ))
            .unwrap();
    }

    pub fn grant(&self, tenant_id: &str, user_id: &str, permission_id: &str) {
        self.source
            .grant_permission(&tenant(tenant_id), &user(user_id), permission_id)
            .unwrap();
    }

    /// Make `user_id` a tenant admin of `tenant_id`.
    pub fn make_tenant_admin(&self, tenant_id: &str, user_id: &str) {
        let role_id = format!("{}-admin", tenant_id);
        self.add_role(Role::new(tenant(tenant_id), role_id.as_str(), "tenant-admin").tenant_admin());
        self.assign(tenant_id, user_id, &role_id);
    }
}
