//! Opaque, rotating refresh credentials.
//!
//! A refresh credential is `"{id}.{secret}"`. Only the SHA-256 of the secret
//! is kept in the store, so a leaked store cannot mint usable credentials.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::error::AuthError;
use super::store::{RevocationStore, StoreError};
use crate::models::{CredentialEntry, CredentialKind, RefreshCredentialMetadata, TenantId, UserId};

const SECRET_BYTES: usize = 32;

pub const ROTATED_BY: &str = "rotation";

#[derive(Debug, Clone, Serialize)]
pub struct RefreshCredential {
    pub token: String,
    pub credential_id: String,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub paired_with: Option<String>,
}

/// Split a presented credential into id and secret.
pub fn parse_token(token: &str) -> Result<(&str, &str), AuthError> {
    match token.split_once('.') {
        Some((id, secret)) if !id.is_empty() && !secret.is_empty() && !secret.contains('.') => {
            Ok((id, secret))
        }
        _ => Err(AuthError::Malformed),
    }
}

pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_secret() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; SECRET_BYTES] = rng.gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

fn secret_matches(entry: &CredentialEntry, secret: &str) -> bool {
    match &entry.secret_hash {
        Some(stored) => bool::from(stored.as_bytes().ct_eq(hash_secret(secret).as_bytes())),
        None => false,
    }
}

#[derive(Clone)]
pub struct RefreshTokenService {
    store: Arc<dyn RevocationStore>,
    ttl: Duration,
}

impl RefreshTokenService {
    pub fn new(store: Arc<dyn RevocationStore>, ttl: Duration) -> Self {
        Self { store, ttl }
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
        paired_with: Option<String>,
    ) -> Result<RefreshCredential, AuthError> {
        let now = Utc::now();
        let credential_id = Uuid::new_v4().to_string();
        let secret = generate_secret();

        let entry = CredentialEntry::refresh(
            tenant_id.clone(),
            credential_id.clone(),
            user_id.clone(),
            now,
            now + self.ttl,
            hash_secret(&secret),
            paired_with,
        );
        let ttl = entry.remaining_ttl(now).ok_or_else(|| {
            AuthError::Internal(anyhow::anyhow!("Refresh credential TTL must be positive"))
        })?;
        self.store.put(&entry, ttl).await?;

        tracing::debug!(credential_id = %credential_id, "Refresh credential issued");

        Ok(RefreshCredential {
            token: format!("{}.{}", credential_id, secret),
            credential_id,
            tenant_id: entry.tenant_id,
            user_id: entry.user_id,
            issued_at: entry.issued_at,
            expires_at: entry.expires_at,
            paired_with: entry.paired_with,
        })
    }

    pub async fn fetch(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
    ) -> Result<RefreshCredentialMetadata, AuthError> {
        match self.store.get(tenant_id, credential_id).await {
            Ok(entry) if entry.kind == CredentialKind::Refresh => Ok(entry.into()),
            Ok(_) | Err(StoreError::NotFound) => {
                Err(AuthError::NotFound(format!("refresh credential {}", credential_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check a presented refresh credential. The secret and owner are checked
    /// before the revoked flag, so `Revoked` is only ever reported to the
    /// credential's rightful holder.
    pub async fn validate(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        token: &str,
    ) -> Result<RefreshCredentialMetadata, AuthError> {
        let (credential_id, secret) = parse_token(token)?;
        let entry = match self.store.get(tenant_id, credential_id).await {
            Ok(entry) => entry,
            Err(StoreError::NotFound) => return Err(AuthError::UnknownCredential),
            Err(e) => return Err(e.into()),
        };

        if entry.kind != CredentialKind::Refresh || !secret_matches(&entry, secret) {
            tracing::warn!(
                tenant_id = %tenant_id,
                credential_id = %credential_id,
                "Refresh credential secret mismatch"
            );
            return Err(AuthError::InvalidCredentials);
        }
        if &entry.user_id != user_id {
            return Err(AuthError::OwnerMismatch);
        }
        if entry.revoked {
            return Err(AuthError::Revoked);
        }
        if entry.is_expired_at(Utc::now()) {
            return Err(AuthError::Expired);
        }
        Ok(entry.into())
    }

    /// Consume `token` and issue its successor.
    ///
    /// The old entry is revoked first. If another rotation got there first
    /// this one fails with `Revoked`. If issuing the successor fails the old
    /// credential stays revoked and the error is returned.
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, user_id = %user_id))]
    pub async fn rotate(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        token: &str,
        paired_with: Option<String>,
    ) -> Result<(RefreshCredential, RefreshCredentialMetadata), AuthError> {
        let old = self.validate(tenant_id, user_id, token).await?;

        let newly = match self
            .store
            .mark_revoked(tenant_id, &old.credential_id, ROTATED_BY)
            .await
        {
            Ok(newly) => newly,
            Err(StoreError::NotFound) => return Err(AuthError::UnknownCredential),
            Err(e) => return Err(e.into()),
        };
        if !newly {
            tracing::warn!(
                credential_id = %old.credential_id,
                "Lost rotation race; credential already consumed"
            );
            return Err(AuthError::Revoked);
        }

        let next = self
            .issue(tenant_id, user_id, paired_with)
            .await
            .map_err(|e| {
                tracing::error!(
                    credential_id = %old.credential_id,
                    error = %e,
                    "Failed to issue successor; refresh chain ended"
                );
                e
            })?;

        tracing::info!(
            old_credential_id = %old.credential_id,
            new_credential_id = %next.credential_id,
            "Refresh credential rotated"
        );
        Ok((next, old))
    }

    /// Record that the credential was used. Never fails.
    pub async fn update_last_used(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        credential_id: &str,
    ) {
        if let Err(e) = self.store.touch(tenant_id, credential_id, Utc::now()).await {
            tracing::warn!(
                tenant_id = %tenant_id,
                user_id = %user_id,
                credential_id = %credential_id,
                error = %e,
                "Failed to record refresh credential use"
            );
        }
    }

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
            Ok(newly) => Ok(newly),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Revoke by presenting the credential. The secret must match, so one
    /// user cannot revoke another's credential by guessing its id.
    pub async fn revoke_token(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        token: &str,
        revoked_by: &str,
    ) -> Result<bool, AuthError> {
        match self.validate(tenant_id, user_id, token).await {
            Ok(meta) => self.revoke(tenant_id, &meta.credential_id, revoked_by).await,
            Err(AuthError::Revoked | AuthError::Expired | AuthError::UnknownCredential) => Ok(false),
            Err(e) => Err(e),
        }
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
}
