use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use super::{
    PermissionCriteria, PermissionQuery, PermissionSource, RoleCriteria, RoleQuery, SourceError,
};
use crate::models::{Permission, Role, TenantId, UserId, UserRoleAssignment};

#[derive(Default)]
struct UserGrants {
    assignments: Vec<UserRoleAssignment>,
    additional_permission_ids: Vec<String>,
}

/// In-process permission data. Filters by tenant the same way the document
/// store does and counts lookups so callers can assert batching.
#[derive(Default)]
pub struct MemoryPermissionSource {
    roles: RwLock<Vec<Role>>,
    permissions: RwLock<Vec<Permission>>,
    users: RwLock<HashMap<(TenantId, UserId), UserGrants>>,
    lookups: AtomicUsize,
}

fn poisoned(what: &str, e: impl std::fmt::Display) -> SourceError {
    SourceError::Unavailable(anyhow::anyhow!("{} lock poisoned: {}", what, e))
}

impl MemoryPermissionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_role(&self, role: Role) -> Result<(), SourceError> {
        let mut roles = self.roles.write().map_err(|e| poisoned("roles", e))?;
        roles.retain(|r| !(r.tenant_id == role.tenant_id && r.role_id == role.role_id));
        roles.push(role);
        Ok(())
    }

    pub fn add_permission(&self, permission: Permission) -> Result<(), SourceError> {
        let mut permissions = self
            .permissions
            .write()
            .map_err(|e| poisoned("permissions", e))?;
        permissions.retain(|p| {
            !(p.tenant_id == permission.tenant_id && p.permission_id == permission.permission_id)
        });
        permissions.push(permission);
        Ok(())
    }

    pub fn assign_role(&self, assignment: UserRoleAssignment) -> Result<(), SourceError> {
        let mut users = self.users.write().map_err(|e| poisoned("users", e))?;
        users
            .entry((assignment.tenant_id.clone(), assignment.user_id.clone()))
            .or_default()
            .assignments
            .push(assignment);
        Ok(())
    }

    pub fn grant_permission(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        permission_id: impl Into<String>,
    ) -> Result<(), SourceError> {
        let mut users = self.users.write().map_err(|e| poisoned("users", e))?;
        users
            .entry((tenant_id.clone(), user_id.clone()))
            .or_default()
            .additional_permission_ids
            .push(permission_id.into());
        Ok(())
    }

    /// Number of `find_*` calls served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn reset_lookups(&self) {
        self.lookups.store(0, Ordering::SeqCst);
    }

    fn permissions_where<F>(&self, tenant_id: &TenantId, pred: F) -> Result<Vec<Permission>, SourceError>
    where
        F: Fn(&Permission) -> bool,
    {
        let permissions = self
            .permissions
            .read()
            .map_err(|e| poisoned("permissions", e))?;
        Ok(permissions
            .iter()
            .filter(|p| &p.tenant_id == tenant_id && pred(p))
            .cloned()
            .collect())
    }

    fn roles_where<F>(&self, tenant_id: &TenantId, pred: F) -> Result<Vec<Role>, SourceError>
    where
        F: Fn(&Role) -> bool,
    {
        let roles = self.roles.read().map_err(|e| poisoned("roles", e))?;
        Ok(roles
            .iter()
            .filter(|r| &r.tenant_id == tenant_id && pred(r))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PermissionSource for MemoryPermissionSource {
    async fn find_roles(&self, query: &RoleQuery) -> Result<Vec<Role>, SourceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let tenant_id = &query.tenant_id;

        match &query.criteria {
            RoleCriteria::ById(ids) => self.roles_where(tenant_id, |r| ids.contains(&r.role_id)),
            RoleCriteria::ByName(name) => self.roles_where(tenant_id, |r| &r.name == name),
            RoleCriteria::ByPermission(permission_id) => {
                self.roles_where(tenant_id, |r| r.permission_ids.contains(permission_id))
            }
            RoleCriteria::ByAssignee(user_id) => {
                let now = Utc::now();
                let role_ids: BTreeSet<String> = {
                    let users = self.users.read().map_err(|e| poisoned("users", e))?;
                    users
                        .get(&(tenant_id.clone(), user_id.clone()))
                        .map(|grants| {
                            grants
                                .assignments
                                .iter()
                                .filter(|a| a.is_active_at(now))
                                .map(|a| a.role_id.clone())
                                .collect()
                        })
                        .unwrap_or_default()
                };
                self.roles_where(tenant_id, |r| role_ids.contains(&r.role_id))
            }
        }
    }

    async fn find_permissions(
        &self,
        query: &PermissionQuery,
    ) -> Result<Vec<Permission>, SourceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let tenant_id = &query.tenant_id;

        match &query.criteria {
            PermissionCriteria::ById(ids) => {
                self.permissions_where(tenant_id, |p| ids.contains(&p.permission_id))
            }
            PermissionCriteria::ByKey(key) => {
                self.permissions_where(tenant_id, |p| &p.key() == key)
            }
            PermissionCriteria::ByRole(role_ids) => {
                let wanted: BTreeSet<String> = self
                    .roles_where(tenant_id, |r| role_ids.contains(&r.role_id))?
                    .into_iter()
                    .flat_map(|r| r.permission_ids)
                    .collect();
                self.permissions_where(tenant_id, |p| wanted.contains(&p.permission_id))
            }
            PermissionCriteria::ByGrantee(user_id) => {
                let wanted: BTreeSet<String> = {
                    let users = self.users.read().map_err(|e| poisoned("users", e))?;
                    users
                        .get(&(tenant_id.clone(), user_id.clone()))
                        .map(|grants| grants.additional_permission_ids.iter().cloned().collect())
                        .unwrap_or_default()
                };
                self.permissions_where(tenant_id, |p| wanted.contains(&p.permission_id))
            }
        }
    }
}
