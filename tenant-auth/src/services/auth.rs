use secrecy::SecretString;
use std::collections::BTreeMap;
use std::sync::Arc;
use validator::Validate;

use super::access_token::{AccessCredential, AccessTokenService};
use super::audit::{AuditSink, TracingAuditSink};
use super::codec::CredentialCodec;
use super::error::AuthError;
use super::permissions::{MongoPermissionSource, PermissionResolver, PermissionSource};
use super::refresh_token::{parse_token, RefreshCredential, RefreshTokenService, ROTATED_BY};
use super::store::{RedisRevocationStore, RetryingStore, RevocationStore, StoreError};
use crate::config::{AuthConfig, SystemIds};
use crate::dtos::{
    AuthenticateRequest, RefreshTokenRequest, RevokeAllTenantTokensRequest, RevokeTokenRequest,
    RevokeTokenResponse, RevokedCountResponse, TokenPairResponse, VerifyTokenRequest,
    VerifyTokenResponse,
};
use crate::models::{
    AuditEvent, AuditEventType, EffectivePermissionSet, PermissionKey, RefreshCredentialMetadata,
    TenantId, UserId,
};
use crate::utils::{verify_password, PasswordError, PasswordHashString};

/// Entry point for callers: authentication, credential lifecycle and the
/// authorization queries.
#[derive(Clone)]
pub struct AuthService {
    access: AccessTokenService,
    refresh: RefreshTokenService,
    resolver: PermissionResolver,
    audit: Arc<dyn AuditSink>,
}

impl AuthService {
    pub fn new(
        access: AccessTokenService,
        refresh: RefreshTokenService,
        resolver: PermissionResolver,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            access,
            refresh,
            resolver,
            audit,
        }
    }

    /// Wire the services from configuration over the given collaborators.
    /// Access and refresh credentials need separate stores.
    pub fn from_config(
        config: &AuthConfig,
        access_store: Arc<dyn RevocationStore>,
        refresh_store: Arc<dyn RevocationStore>,
        source: Arc<dyn PermissionSource>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let codec = CredentialCodec::new(&config.jwt.secret, config.jwt.issuer.clone());
        Self::new(
            AccessTokenService::new(codec, access_store, config.jwt.access_ttl()),
            RefreshTokenService::new(refresh_store, config.jwt.refresh_ttl()),
            PermissionResolver::new(source, config.system.clone()),
            audit,
        )
    }

    /// Connect to Redis and MongoDB and build the production wiring.
    pub async fn connect(config: &AuthConfig) -> Result<Self, AuthError> {
        tracing::info!("Connecting to Redis");
        let client = redis::Client::open(config.redis.url.as_str())
            .map_err(StoreError::from)?;
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            StoreError::from(e)
        })?;

        let access_store = RetryingStore::new(
            RedisRevocationStore::with_manager(
                manager.clone(),
                config.redis.access_prefix.clone(),
            ),
            config.store_retry.clone(),
        );
        let refresh_store = RetryingStore::new(
            RedisRevocationStore::with_manager(manager, config.redis.refresh_prefix.clone()),
            config.store_retry.clone(),
        );
        access_store.health_check().await?;

        let source =
            MongoPermissionSource::connect(&config.mongodb.uri, &config.mongodb.database).await?;
        source.health_check().await?;

        tracing::info!(environment = ?config.environment, "Auth service ready");
        Ok(Self::from_config(
            config,
            Arc::new(access_store),
            Arc::new(refresh_store),
            Arc::new(source),
            Arc::new(TracingAuditSink),
        ))
    }

    pub fn system_ids(&self) -> &SystemIds {
        self.resolver.system_ids()
    }

    pub fn access_tokens(&self) -> &AccessTokenService {
        &self.access
    }

    pub fn refresh_tokens(&self) -> &RefreshTokenService {
        &self.refresh
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    /// Check both stores and the permission source.
    pub async fn health_check(&self) -> Result<(), AuthError> {
        self.access.health_check().await?;
        self.refresh.health_check().await?;
        self.resolver.health_check().await
    }

    async fn emit(&self, event: AuditEvent) {
        let event_type = event.event_type;
        if let Err(e) = self.audit.record(event).await {
            tracing::error!(error = %e, event_type = %event_type, "Failed to record audit event");
        }
    }

    /// Verify the password against the stored hash and issue a credential pair.
    #[tracing::instrument(skip_all, fields(tenant_id = %req.tenant_id, user_id = %req.user_id))]
    pub async fn authenticate(
        &self,
        req: AuthenticateRequest,
    ) -> Result<TokenPairResponse, AuthError> {
        req.validate()?;
        let tenant_id = TenantId::parse(req.tenant_id)?;
        let user_id = UserId::parse(req.user_id)?;

        let password = SecretString::new(req.password);
        let hash = PasswordHashString::new(req.password_hash);
        if let Err(e) = verify_password(&password, &hash) {
            self.emit(
                AuditEvent::new(AuditEventType::LoginFailed, tenant_id.clone())
                    .user(user_id.clone())
                    .detail("reason", &e),
            )
            .await;
            return Err(match e {
                PasswordError::Mismatch => AuthError::InvalidCredentials,
                PasswordError::InvalidHash(msg) => {
                    tracing::error!(error = %msg, "Stored password hash is unreadable");
                    AuthError::InvalidCredentials
                }
                PasswordError::Hash(msg) => AuthError::Internal(anyhow::anyhow!(msg)),
            });
        }

        let (access, refresh) = self.issue_pair(&tenant_id, &user_id).await?;

        self.emit(
            AuditEvent::new(AuditEventType::LoginSucceeded, tenant_id)
                .user(user_id)
                .detail("access_credential_id", &access.credential_id),
        )
        .await;

        Ok(self.token_pair(access, refresh))
    }

    /// Issue an access credential and a refresh credential paired with it.
    /// If the refresh half fails the access half is revoked again.
    async fn issue_pair(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<(AccessCredential, RefreshCredential), AuthError> {
        let access = self.access.issue(tenant_id, user_id).await?;
        match self
            .refresh
            .issue(tenant_id, user_id, Some(access.credential_id.clone()))
            .await
        {
            Ok(refresh) => Ok((access, refresh)),
            Err(e) => {
                self.discard_access(tenant_id, &access.credential_id).await;
                Err(e)
            }
        }
    }

    async fn discard_access(&self, tenant_id: &TenantId, credential_id: &str) {
        if let Err(e) = self.access.revoke(tenant_id, credential_id, "system").await {
            tracing::error!(
                credential_id = %credential_id,
                error = %e,
                "Failed to revoke orphaned access credential"
            );
        }
    }

    /// Revoke the access credential issued alongside `refresh`.
    async fn retire_paired_access(&self, tenant_id: &TenantId, refresh: &RefreshCredentialMetadata) {
        let Some(previous) = refresh.paired_with.as_deref() else {
            return;
        };
        if let Err(e) = self.access.revoke(tenant_id, previous, ROTATED_BY).await {
            tracing::warn!(
                credential_id = %previous,
                error = %e,
                "Failed to revoke access credential of rotated pair"
            );
        }
    }

    fn token_pair(
        &self,
        access: AccessCredential,
        refresh: RefreshCredential,
    ) -> TokenPairResponse {
        TokenPairResponse {
            expires_in: (access.expires_at - access.issued_at).num_seconds(),
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            access_expires_at: access.expires_at,
            refresh_expires_at: refresh.expires_at,
            tenant_id: access.tenant_id.to_string(),
            user_id: access.user_id.to_string(),
        }
    }

    /// Verify an access credential. Suspension of the user or tenant is not
    /// consulted here.
    pub async fn verify_token(
        &self,
        req: VerifyTokenRequest,
    ) -> Result<VerifyTokenResponse, AuthError> {
        req.validate()?;
        let meta = self.access.verify(&req.access_token).await?;
        Ok(VerifyTokenResponse {
            valid: true,
            tenant_id: meta.tenant_id.to_string(),
            user_id: meta.user_id.to_string(),
            credential_id: meta.credential_id,
            expires_at: meta.expires_at,
        })
    }

    /// Exchange a refresh credential for a new pair.
    ///
    /// Presenting a refresh credential that an earlier rotation already
    /// consumed revokes every credential the user holds.
    #[tracing::instrument(skip_all, fields(tenant_id = %req.tenant_id, user_id = %req.user_id))]
    pub async fn refresh_token(
        &self,
        req: RefreshTokenRequest,
    ) -> Result<TokenPairResponse, AuthError> {
        req.validate()?;
        let tenant_id = TenantId::parse(req.tenant_id)?;
        let user_id = UserId::parse(req.user_id)?;

        let current = match self
            .refresh
            .validate(&tenant_id, &user_id, &req.refresh_token)
            .await
        {
            Ok(current) => current,
            Err(AuthError::Revoked) => {
                self.check_reuse(&tenant_id, &user_id, &req.refresh_token)
                    .await;
                return Err(AuthError::Revoked);
            }
            Err(e) => return Err(e),
        };
        self.refresh
            .update_last_used(&tenant_id, &user_id, &current.credential_id)
            .await;

        let access = self.access.issue(&tenant_id, &user_id).await?;
        let (refresh, old) = match self
            .refresh
            .rotate(
                &tenant_id,
                &user_id,
                &req.refresh_token,
                Some(access.credential_id.clone()),
            )
            .await
        {
            Ok(rotated) => rotated,
            Err(e) => {
                // The old refresh credential may already be consumed, so
                // its access credential goes as well
                self.discard_access(&tenant_id, &access.credential_id).await;
                self.retire_paired_access(&tenant_id, &current).await;
                return Err(e);
            }
        };
        self.retire_paired_access(&tenant_id, &old).await;

        self.emit(
            AuditEvent::new(AuditEventType::TokenRefreshed, tenant_id)
                .user(user_id)
                .detail("old_refresh_credential_id", &old.credential_id)
                .detail("new_refresh_credential_id", &refresh.credential_id),
        )
        .await;

        Ok(self.token_pair(access, refresh))
    }

    /// A consumed refresh credential came back. Either the holder or a thief
    /// replayed it, and we cannot tell which, so the user's whole session
    /// family is revoked.
    async fn check_reuse(&self, tenant_id: &TenantId, user_id: &UserId, token: &str) {
        let Ok((credential_id, _)) = parse_token(token) else {
            return;
        };
        let meta = match self.refresh.fetch(tenant_id, credential_id).await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(error = %e, "Could not inspect revoked refresh credential");
                return;
            }
        };
        if meta.revoked_by.as_deref() != Some(ROTATED_BY) {
            return;
        }

        tracing::warn!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            credential_id = %credential_id,
            "Refresh credential reuse detected; revoking all user credentials"
        );
        let counts = match self
            .revoke_user_credentials(tenant_id, user_id, "reuse-detection")
            .await
        {
            Ok(counts) => counts,
            Err(e) => {
                tracing::error!(error = %e, "Failed to revoke credentials after reuse");
                RevokedCountResponse::default()
            }
        };

        self.emit(
            AuditEvent::new(AuditEventType::RefreshReuseDetected, tenant_id.clone())
                .user(user_id.clone())
                .detail("credential_id", credential_id)
                .detail("access_revoked", counts.access_revoked)
                .detail("refresh_revoked", counts.refresh_revoked),
        )
        .await;
    }

    /// Revoke the presented credentials. Unknown and expired credentials
    /// count as success.
    pub async fn revoke_token(
        &self,
        req: RevokeTokenRequest,
    ) -> Result<RevokeTokenResponse, AuthError> {
        req.validate()?;
        let tenant_id = TenantId::parse(req.tenant_id)?;
        let user_id = UserId::parse(req.user_id)?;
        let mut response = RevokeTokenResponse::default();

        if let Some(token) = req.access_token.as_deref().filter(|t| !t.is_empty()) {
            let claims = self.access.inspect(token)?;
            if claims.tenant_id != tenant_id.as_str() {
                return Err(AuthError::TenantMismatch);
            }
            if claims.sub != user_id.as_str() {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    user_id = %user_id,
                    "Revocation request for a credential of another user"
                );
                return Err(AuthError::OwnerMismatch);
            }
            response.access_revoked = self
                .access
                .revoke(&tenant_id, &claims.jti, &req.revoked_by)
                .await?;
        }

        if let Some(token) = req.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            response.refresh_revoked = self
                .refresh
                .revoke_token(&tenant_id, &user_id, token, &req.revoked_by)
                .await?;
        }

        self.emit(
            AuditEvent::new(AuditEventType::TokenRevoked, tenant_id)
                .user(user_id)
                .actor(req.revoked_by)
                .detail("access_revoked", response.access_revoked)
                .detail("refresh_revoked", response.refresh_revoked),
        )
        .await;

        Ok(response)
    }

    /// Log the user out everywhere.
    pub async fn revoke_all_user_tokens(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        revoked_by: &str,
    ) -> Result<RevokedCountResponse, AuthError> {
        let counts = self
            .revoke_user_credentials(tenant_id, user_id, revoked_by)
            .await?;

        self.emit(
            AuditEvent::new(AuditEventType::UserTokensRevoked, tenant_id.clone())
                .user(user_id.clone())
                .actor(revoked_by)
                .detail("access_revoked", counts.access_revoked)
                .detail("refresh_revoked", counts.refresh_revoked),
        )
        .await;

        Ok(counts)
    }

    async fn revoke_user_credentials(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        revoked_by: &str,
    ) -> Result<RevokedCountResponse, AuthError> {
        // Refresh first so no new access credential can be minted meanwhile
        let refresh_revoked = self
            .refresh
            .revoke_all(tenant_id, user_id, revoked_by)
            .await?;
        let access_revoked = self
            .access
            .revoke_all(tenant_id, user_id, revoked_by)
            .await?;
        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            access_revoked,
            refresh_revoked,
            "Revoked all user credentials"
        );
        Ok(RevokedCountResponse {
            access_revoked,
            refresh_revoked,
        })
    }

    /// Revoke every credential in the target tenant. The caller must
    /// administer that tenant.
    pub async fn revoke_all_tenant_tokens(
        &self,
        req: RevokeAllTenantTokensRequest,
    ) -> Result<RevokedCountResponse, AuthError> {
        req.validate()?;
        let tenant_id = TenantId::parse(req.tenant_id)?;
        let user_id = UserId::parse(req.user_id)?;
        let target_tenant_id = TenantId::parse(req.target_tenant_id)?;

        self.resolver
            .ensure_tenant_admin_scope(&tenant_id, &user_id, &target_tenant_id)
            .await?;

        let refresh_revoked = self
            .refresh
            .revoke_tenant(&target_tenant_id, &req.revoked_by)
            .await?;
        let access_revoked = self
            .access
            .revoke_tenant(&target_tenant_id, &req.revoked_by)
            .await?;

        tracing::warn!(
            target_tenant_id = %target_tenant_id,
            revoked_by = %req.revoked_by,
            access_revoked,
            refresh_revoked,
            "Revoked all tenant credentials"
        );

        self.emit(
            AuditEvent::new(AuditEventType::TenantTokensRevoked, target_tenant_id)
                .user(user_id)
                .actor(req.revoked_by)
                .detail("caller_tenant_id", &tenant_id)
                .detail("access_revoked", access_revoked)
                .detail("refresh_revoked", refresh_revoked),
        )
        .await;

        Ok(RevokedCountResponse {
            access_revoked,
            refresh_revoked,
        })
    }

    pub async fn effective_permissions(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<EffectivePermissionSet, AuthError> {
        self.resolver.resolve(tenant_id, user_id).await
    }

    pub async fn check_permissions(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        requested: &[PermissionKey],
    ) -> Result<BTreeMap<PermissionKey, bool>, AuthError> {
        self.resolver
            .check_permissions(tenant_id, user_id, requested)
            .await
    }

    pub async fn has_permission(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        permission: &PermissionKey,
        target_tenant_id: &TenantId,
    ) -> Result<(), AuthError> {
        self.resolver
            .has_permission(tenant_id, user_id, permission, target_tenant_id)
            .await
    }
}
