//! Roles, permissions and the computed effective permission set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::identity::{TenantId, UserId};

pub const WILDCARD: &str = "*";

/// Permission identity within a tenant: `resource:action`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionKey {
    pub resource: String,
    pub action: String,
}

impl PermissionKey {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Whether holding `self` grants `requested`. `*` matches any resource
    /// or action.
    pub fn grants(&self, requested: &PermissionKey) -> bool {
        (self.resource == WILDCARD || self.resource == requested.resource)
            && (self.action == WILDCARD || self.action == requested.action)
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl FromStr for PermissionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((resource, action))
                if !resource.is_empty() && !action.is_empty() && !action.contains(':') =>
            {
                Ok(Self::new(resource, action))
            }
            _ => Err(format!("Invalid permission string: {}", s)),
        }
    }
}

impl TryFrom<String> for PermissionKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PermissionKey> for String {
    fn from(key: PermissionKey) -> Self {
        key.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(rename = "_id")]
    pub permission_id: String,
    pub tenant_id: TenantId,
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_dangerous: bool,
}

impl Permission {
    pub fn new(
        tenant_id: TenantId,
        permission_id: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            permission_id: permission_id.into(),
            tenant_id,
            resource: resource.into(),
            action: action.into(),
            description: String::new(),
            is_dangerous: false,
        }
    }

    pub fn key(&self) -> PermissionKey {
        PermissionKey::new(self.resource.clone(), self.action.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoleStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(rename = "_id")]
    pub role_id: String,
    pub tenant_id: TenantId,
    pub name: String,
    #[serde(rename = "permissions", default)]
    pub permission_ids: Vec<String>,
    #[serde(default)]
    pub is_tenant_admin: bool,
    #[serde(default)]
    pub status: RoleStatus,
}

impl Role {
    pub fn new(tenant_id: TenantId, role_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            tenant_id,
            name: name.into(),
            permission_ids: Vec::new(),
            is_tenant_admin: false,
            status: RoleStatus::Active,
        }
    }

    pub fn with_permissions<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permission_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn tenant_admin(mut self) -> Self {
        self.is_tenant_admin = true;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == RoleStatus::Active
    }
}

/// Edge between a user and a role. Assignments may carry an expiry, after
/// which the role no longer contributes permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRoleAssignment {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role_id: String,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserRoleAssignment {
    pub fn new(
        tenant_id: TenantId,
        user_id: UserId,
        role_id: impl Into<String>,
        assigned_by: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            user_id,
            role_id: role_id.into(),
            assigned_at: Utc::now(),
            assigned_by: assigned_by.into(),
            expires_at: None,
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |exp| now < exp)
    }
}

/// Deduplicated union of role-derived and directly granted permissions for
/// one user. Computed per request, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectivePermissionSet {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub is_tenant_admin: bool,
    pub role_ids: BTreeSet<String>,
    permissions: BTreeMap<PermissionKey, Permission>,
}

impl EffectivePermissionSet {
    pub fn new(tenant_id: TenantId, user_id: UserId) -> Self {
        Self {
            tenant_id,
            user_id,
            is_tenant_admin: false,
            role_ids: BTreeSet::new(),
            permissions: BTreeMap::new(),
        }
    }

    /// Returns `false` if a permission with the same key was already present.
    pub fn insert(&mut self, permission: Permission) -> bool {
        let key = permission.key();
        if self.permissions.contains_key(&key) {
            return false;
        }
        self.permissions.insert(key, permission);
        true
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn contains(&self, key: &PermissionKey) -> bool {
        self.permissions.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &PermissionKey> {
        self.permissions.keys()
    }

    pub fn permissions(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.values()
    }

    /// Tenant admins hold every permission in their tenant; everyone else
    /// needs an exact or wildcard grant.
    pub fn allows(&self, requested: &PermissionKey) -> bool {
        self.is_tenant_admin
            || self.permissions.contains_key(requested)
            || self.permissions.keys().any(|held| held.grants(requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::parse("acme").unwrap()
    }

    #[test]
    fn test_permission_key_parsing() {
        let key: PermissionKey = "orders:read".parse().unwrap();
        assert_eq!(key, PermissionKey::new("orders", "read"));
        assert_eq!(key.to_string(), "orders:read");
        assert!("orders".parse::<PermissionKey>().is_err());
        assert!(":read".parse::<PermissionKey>().is_err());
        assert!("a:b:c".parse::<PermissionKey>().is_err());
    }

    #[test]
    fn test_wildcard_grants() {
        let requested = PermissionKey::new("orders", "delete");
        assert!(PermissionKey::new("*", "*").grants(&requested));
        assert!(PermissionKey::new("orders", "*").grants(&requested));
        assert!(PermissionKey::new("*", "delete").grants(&requested));
        assert!(!PermissionKey::new("orders", "read").grants(&requested));
        assert!(!PermissionKey::new("invoices", "*").grants(&requested));
    }

    #[test]
    fn test_set_deduplicates_by_key_not_id() {
        let mut set = EffectivePermissionSet::new(tenant(), UserId::parse("u1").unwrap());
        assert!(set.insert(Permission::new(tenant(), "p1", "orders", "read")));
        assert!(!set.insert(Permission::new(tenant(), "p1-copy", "orders", "read")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_allows() {
        let mut set = EffectivePermissionSet::new(tenant(), UserId::parse("u1").unwrap());
        set.insert(Permission::new(tenant(), "p1", "orders", "*"));
        assert!(set.allows(&PermissionKey::new("orders", "write")));
        assert!(!set.allows(&PermissionKey::new("vendors", "write")));

        set.is_tenant_admin = true;
        assert!(set.allows(&PermissionKey::new("vendors", "write")));
    }

    #[test]
    fn test_assignment_expiry() {
        let mut a = UserRoleAssignment::new(tenant(), UserId::parse("u1").unwrap(), "r1", "admin");
        assert!(a.is_active_at(Utc::now()));
        a.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(!a.is_active_at(Utc::now()));
    }

    #[test]
    fn test_role_document_shape() {
        let role: Role = serde_json::from_value(serde_json::json!({
            "_id": "r1",
            "tenant_id": "acme",
            "name": "viewer",
            "permissions": ["p1", "p2"]
        }))
        .unwrap();
        assert_eq!(role.permission_ids, vec!["p1", "p2"]);
        assert!(role.is_active());
        assert!(!role.is_tenant_admin);
    }
}
