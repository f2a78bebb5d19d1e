use service_core::error::AppError;
use service_core::grpc::IntoStatus;
use thiserror::Error;
use tonic::Status;

use super::codec::CodecError;
use super::permissions::SourceError;
use super::store::StoreError;
use crate::models::IdentifierError;

/// Caller-facing category of an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed input. Never retried.
    Validation,
    /// Credential rejected; the caller has to authenticate again.
    Auth,
    PermissionDenied,
    NotFound,
    /// Infrastructure failure. Safe to retry with backoff.
    Internal,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    SignatureInvalid,

    #[error("Token expired")]
    Expired,

    #[error("Token revoked")]
    Revoked,

    #[error("Unknown credential")]
    UnknownCredential,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token does not belong to this tenant")]
    TenantMismatch,

    #[error("Token belongs to another user")]
    OwnerMismatch,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Revocation store error: {0}")]
    Store(#[from] StoreError),

    #[error("Permission source error: {0}")]
    Source(#[from] SourceError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Validation(_) => ErrorKind::Validation,
            AuthError::Malformed
            | AuthError::SignatureInvalid
            | AuthError::Expired
            | AuthError::Revoked
            | AuthError::UnknownCredential
            | AuthError::InvalidCredentials
            | AuthError::TenantMismatch
            | AuthError::OwnerMismatch => ErrorKind::Auth,
            AuthError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            AuthError::NotFound(_) => ErrorKind::NotFound,
            AuthError::Store(_) | AuthError::Source(_) | AuthError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Only transient infrastructure failures qualify. Authentication
    /// failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::Store(e) => e.is_transient(),
            AuthError::Source(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<CodecError> for AuthError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Malformed => AuthError::Malformed,
            CodecError::SignatureInvalid => AuthError::SignatureInvalid,
            CodecError::Expired => AuthError::Expired,
            CodecError::Signing(msg) => AuthError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl From<IdentifierError> for AuthError {
    fn from(err: IdentifierError) -> Self {
        AuthError::Validation(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let retryable = err.is_retryable();
        match err.kind() {
            ErrorKind::Validation => AppError::BadRequest(anyhow::anyhow!(err.to_string())),
            ErrorKind::Auth => AppError::Unauthorized(anyhow::anyhow!(err.to_string())),
            ErrorKind::PermissionDenied => AppError::Forbidden(anyhow::anyhow!(err.to_string())),
            ErrorKind::NotFound => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            ErrorKind::Internal if retryable => AppError::ServiceUnavailable(anyhow::Error::new(err)),
            ErrorKind::Internal => AppError::InternalError(anyhow::Error::new(err)),
        }
    }
}

impl IntoStatus for AuthError {
    fn into_status(self) -> Status {
        AppError::from(self).into_status()
    }
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        err.into_status()
    }
}
