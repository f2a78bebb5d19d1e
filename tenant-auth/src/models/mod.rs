pub mod audit;
pub mod credential;
pub mod identity;
pub mod rbac;

pub use audit::{AuditEvent, AuditEventType};
pub use credential::{
    AccessCredentialMetadata, CredentialEntry, CredentialKind, RefreshCredentialMetadata,
};
pub use identity::{IdentifierError, TenantId, UserId, MAX_IDENTIFIER_LEN};
pub use rbac::{
    EffectivePermissionSet, Permission, PermissionKey, Role, RoleStatus, UserRoleAssignment,
    WILDCARD,
};
