//! Signs and verifies access credentials (HS256 JWT).

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{TenantId, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    SignatureInvalid,

    #[error("Token expired")]
    Expired,

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// Claims carried by an access credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,
    pub tenant_id: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Credential ID, key of the revocation entry
    pub jti: String,
    pub iss: String,
}

impl AccessClaims {
    /// Fresh claims with a random `jti`, so two credentials issued in the same
    /// second are still distinct and separately revocable.
    pub fn new(
        tenant_id: &TenantId,
        user_id: &UserId,
        issuer: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            sub: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            iss: issuer.to_string(),
        }
    }

    pub fn tenant(&self) -> Result<TenantId, CodecError> {
        TenantId::parse(self.tenant_id.as_str()).map_err(|_| CodecError::Malformed)
    }

    pub fn user(&self) -> Result<UserId, CodecError> {
        UserId::parse(self.sub.as_str()).map_err(|_| CodecError::Malformed)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.iat, 0).single().unwrap_or_default()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_default()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() > self.exp
    }
}

#[derive(Clone)]
pub struct CredentialCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl CredentialCodec {
    pub fn new(secret: &SecretString, issuer: impl Into<String>) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(bytes),
            decoding_key: DecodingKey::from_secret(bytes),
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn encode(&self, claims: &AccessClaims) -> Result<String, CodecError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| CodecError::Signing(e.to_string()))
    }

    /// Verify structure, signature and expiry, in that order.
    pub fn decode(&self, token: &str) -> Result<AccessClaims, CodecError> {
        let claims = self.decode_ignoring_expiry(token)?;
        if claims.is_expired_at(Utc::now()) {
            return Err(CodecError::Expired);
        }
        Ok(claims)
    }

    /// Verify structure and signature only. Used to revoke credentials that
    /// may already have expired.
    pub fn decode_ignoring_expiry(&self, token: &str) -> Result<AccessClaims, CodecError> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation())
            .map_err(|e| match e.kind() {
                JwtErrorKind::InvalidSignature | JwtErrorKind::InvalidIssuer => {
                    CodecError::SignatureInvalid
                }
                JwtErrorKind::ExpiredSignature => CodecError::Expired,
                _ => CodecError::Malformed,
            })?;
        Ok(data.claims)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is compared exactly in `decode`
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation
    }
}
