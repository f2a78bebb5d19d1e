//! Services layer for tenant-auth.
//!
//! Credential issuing and revocation, permission resolution and the
//! orchestrator that composes them.

pub mod access_token;
pub mod audit;
pub mod auth;
pub mod codec;
pub mod error;
pub mod permissions;
pub mod refresh_token;
pub mod store;

pub use access_token::{AccessCredential, AccessTokenService};
pub use audit::{AuditSink, MemoryAuditSink, TracingAuditSink};
pub use auth::AuthService;
pub use codec::{AccessClaims, CodecError, CredentialCodec};
pub use error::{AuthError, ErrorKind};
pub use permissions::{
    MemoryPermissionSource, MongoPermissionSource, PermissionCriteria, PermissionQuery,
    PermissionResolver, PermissionSource, RoleCriteria, RoleQuery, SourceError,
};
pub use refresh_token::{RefreshCredential, RefreshTokenService};
pub use store::{
    MemoryRevocationStore, RedisRevocationStore, RetryingStore, RevocationStore, StoreError,
};
