//! Effective-permission resolution over a batched, read-only permission source.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

use super::error::AuthError;
use crate::config::SystemIds;
use crate::models::{EffectivePermissionSet, Permission, PermissionKey, Role, TenantId, UserId};

pub use self::memory::MemoryPermissionSource;
pub use self::mongo::MongoPermissionSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Permission source unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

impl From<mongodb::error::Error> for SourceError {
    fn from(err: mongodb::error::Error) -> Self {
        SourceError::Unavailable(anyhow::Error::new(err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleCriteria {
    ById(Vec<String>),
    ByName(String),
    /// Roles currently assigned to the user
    ByAssignee(UserId),
    /// Roles that include the permission
    ByPermission(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleQuery {
    pub tenant_id: TenantId,
    pub criteria: RoleCriteria,
}

impl RoleQuery {
    pub fn new(tenant_id: TenantId, criteria: RoleCriteria) -> Self {
        Self {
            tenant_id,
            criteria,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionCriteria {
    ById(Vec<String>),
    ByKey(PermissionKey),
    /// Union of the permissions referenced by the roles
    ByRole(Vec<String>),
    /// Permissions granted to the user directly, outside any role
    ByGrantee(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionQuery {
    pub tenant_id: TenantId,
    pub criteria: PermissionCriteria,
}

impl PermissionQuery {
    pub fn new(tenant_id: TenantId, criteria: PermissionCriteria) -> Self {
        Self {
            tenant_id,
            criteria,
        }
    }
}

/// Read-only, batched access to role and permission data. Each call is one
/// round trip regardless of how many ids it names.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn find_roles(&self, query: &RoleQuery) -> Result<Vec<Role>, SourceError>;

    async fn find_permissions(
        &self,
        query: &PermissionQuery,
    ) -> Result<Vec<Permission>, SourceError>;

    async fn health_check(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct PermissionResolver {
    source: Arc<dyn PermissionSource>,
    system: SystemIds,
}

impl PermissionResolver {
    pub fn new(source: Arc<dyn PermissionSource>, system: SystemIds) -> Self {
        Self { source, system }
    }

    pub fn system_ids(&self) -> &SystemIds {
        &self.system
    }

    pub fn is_system_tenant(&self, tenant_id: &TenantId) -> bool {
        self.system.is_system_tenant(tenant_id)
    }

    pub async fn health_check(&self) -> Result<(), AuthError> {
        Ok(self.source.health_check().await?)
    }

    /// Compute the user's effective permission set with at most three
    /// lookups: assigned roles, the union of their permissions, and the
    /// user's direct grants.
    ///
    /// Rows from another tenant, inactive roles and dangling permission ids
    /// are skipped and logged; they never fail the resolution.
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, user_id = %user_id))]
    pub async fn resolve(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<EffectivePermissionSet, AuthError> {
        let mut set = EffectivePermissionSet::new(tenant_id.clone(), user_id.clone());

        let roles = self.active_roles(tenant_id, user_id).await?;
        let mut wanted = BTreeSet::new();
        for role in &roles {
            set.is_tenant_admin |= role.is_tenant_admin;
            set.role_ids.insert(role.role_id.clone());
            wanted.extend(role.permission_ids.iter().cloned());
        }

        if !wanted.is_empty() {
            let query = PermissionQuery::new(
                tenant_id.clone(),
                PermissionCriteria::ById(wanted.iter().cloned().collect()),
            );
            let mut found = BTreeSet::new();
            for permission in self.source.find_permissions(&query).await? {
                if !wanted.contains(&permission.permission_id) {
                    continue;
                }
                if let Some(permission) = same_tenant(tenant_id, permission) {
                    found.insert(permission.permission_id.clone());
                    set.insert(permission);
                }
            }

            let dangling = wanted.difference(&found).count();
            if dangling > 0 {
                tracing::warn!(
                    dangling,
                    "Skipping role permission references that did not resolve"
                );
            }
        }

        let direct = PermissionQuery::new(
            tenant_id.clone(),
            PermissionCriteria::ByGrantee(user_id.clone()),
        );
        for permission in self.source.find_permissions(&direct).await? {
            if let Some(permission) = same_tenant(tenant_id, permission) {
                set.insert(permission);
            }
        }

        tracing::debug!(
            permissions = set.len(),
            roles = set.role_ids.len(),
            is_tenant_admin = set.is_tenant_admin,
            "Resolved effective permissions"
        );
        Ok(set)
    }

    /// Active roles assigned to the user in their own tenant.
    pub async fn user_roles(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<Vec<Role>, AuthError> {
        self.active_roles(tenant_id, user_id).await
    }

    pub async fn is_tenant_admin(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<bool, AuthError> {
        if self.system.is_system_admin(tenant_id, user_id) {
            return Ok(true);
        }
        let roles = self.active_roles(tenant_id, user_id).await?;
        Ok(roles.iter().any(|r| r.is_tenant_admin))
    }

    /// Evaluate several permissions against one resolution.
    pub async fn check_permissions(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        requested: &[PermissionKey],
    ) -> Result<BTreeMap<PermissionKey, bool>, AuthError> {
        let set = self.resolve(tenant_id, user_id).await?;
        Ok(requested
            .iter()
            .map(|key| (key.clone(), set.allows(key)))
            .collect())
    }

    /// Authorize `permission` for an action on `target_tenant_id`.
    ///
    /// Tenant admins may do anything inside their own tenant. Users of the
    /// system tenant may act on any tenant if they hold the permission.
    /// Everyone else is confined to their own tenant.
    pub async fn has_permission(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        permission: &PermissionKey,
        target_tenant_id: &TenantId,
    ) -> Result<(), AuthError> {
        let set = self.resolve(tenant_id, user_id).await?;
        let same_tenant = tenant_id == target_tenant_id;

        if same_tenant && set.is_tenant_admin {
            return Ok(());
        }

        if !same_tenant && !self.is_system_tenant(tenant_id) {
            tracing::warn!(
                tenant_id = %tenant_id,
                user_id = %user_id,
                target_tenant_id = %target_tenant_id,
                "Cross-tenant permission check denied"
            );
            return Err(AuthError::PermissionDenied(permission.to_string()));
        }

        if set.allows(permission) {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied(permission.to_string()))
        }
    }

    /// Require the caller to administer `target_tenant_id`: a tenant admin of
    /// that tenant, or a tenant admin of the system tenant.
    pub async fn ensure_tenant_admin_scope(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        target_tenant_id: &TenantId,
    ) -> Result<(), AuthError> {
        let in_scope = tenant_id == target_tenant_id || self.is_system_tenant(tenant_id);
        if in_scope && self.is_tenant_admin(tenant_id, user_id).await? {
            return Ok(());
        }
        Err(AuthError::PermissionDenied(format!(
            "tenant admin scope required for {}",
            target_tenant_id
        )))
    }

    async fn active_roles(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<Vec<Role>, AuthError> {
        let query = RoleQuery::new(tenant_id.clone(), RoleCriteria::ByAssignee(user_id.clone()));
        let roles = self.source.find_roles(&query).await?;
        Ok(roles
            .into_iter()
            .filter(|role| {
                if &role.tenant_id != tenant_id {
                    tracing::warn!(
                        role_id = %role.role_id,
                        role_tenant_id = %role.tenant_id,
                        "Skipping role assigned across tenants"
                    );
                    return false;
                }
                if !role.is_active() {
                    tracing::debug!(role_id = %role.role_id, "Skipping inactive role");
                    return false;
                }
                true
            })
            .collect())
    }
}

fn same_tenant(tenant_id: &TenantId, permission: Permission) -> Option<Permission> {
    if &permission.tenant_id == tenant_id {
        Some(permission)
    } else {
        tracing::warn!(
            permission_id = %permission.permission_id,
            permission_tenant_id = %permission.tenant_id,
            "Skipping permission from another tenant"
        );
        None
    }
}
