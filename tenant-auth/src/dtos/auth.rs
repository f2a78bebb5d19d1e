use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::{Validate, ValidationError};

#[derive(Deserialize, Validate)]
pub struct AuthenticateRequest {
    #[validate(length(min = 1, message = "Tenant ID is required"))]
    pub tenant_id: String,

    #[validate(length(min = 1, message = "User ID is required"))]
    pub user_id: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    /// Stored Argon2 hash supplied by the identity collaborator
    #[validate(length(min = 1, message = "Password hash is required"))]
    pub password_hash: String,
}

impl fmt::Debug for AuthenticateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticateRequest")
            .field("tenant_id", &self.tenant_id)
            .field("user_id", &self.user_id)
            .field("password", &"[REDACTED]")
            .field("password_hash", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub tenant_id: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyTokenRequest {
    #[validate(length(min = 1, message = "Access token is required"))]
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyTokenResponse {
    pub valid: bool,
    pub tenant_id: String,
    pub user_id: String,
    pub credential_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "Tenant ID is required"))]
    pub tenant_id: String,

    #[validate(length(min = 1, message = "User ID is required"))]
    pub user_id: String,

    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_revoke_target"))]
pub struct RevokeTokenRequest {
    #[validate(length(min = 1, message = "Tenant ID is required"))]
    pub tenant_id: String,

    #[validate(length(min = 1, message = "User ID is required"))]
    pub user_id: String,

    pub access_token: Option<String>,

    pub refresh_token: Option<String>,

    #[validate(length(min = 1, message = "revoked_by is required"))]
    pub revoked_by: String,
}

fn validate_revoke_target(req: &RevokeTokenRequest) -> Result<(), ValidationError> {
    let present = |t: &Option<String>| t.as_deref().is_some_and(|s| !s.is_empty());
    if present(&req.access_token) || present(&req.refresh_token) {
        Ok(())
    } else {
        let mut err = ValidationError::new("missing_token");
        err.message = Some("An access or refresh token is required".into());
        Err(err)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RevokeTokenResponse {
    /// True if this call revoked the access token; false if it already was
    /// revoked, expired or unknown
    pub access_revoked: bool,
    pub refresh_revoked: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RevokeAllTenantTokensRequest {
    /// Caller's tenant
    #[validate(length(min = 1, message = "Tenant ID is required"))]
    pub tenant_id: String,

    /// Caller
    #[validate(length(min = 1, message = "User ID is required"))]
    pub user_id: String,

    #[validate(length(min = 1, message = "Target tenant ID is required"))]
    pub target_tenant_id: String,

    #[validate(length(min = 1, message = "revoked_by is required"))]
    pub revoked_by: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevokedCountResponse {
    pub access_revoked: usize,
    pub refresh_revoked: usize,
}
