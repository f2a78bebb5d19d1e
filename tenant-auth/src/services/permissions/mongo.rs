use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Document};
use mongodb::{Client as MongoClient, Collection, Cursor, Database};
use serde::de::DeserializeOwned;

use super::{
    PermissionCriteria, PermissionQuery, PermissionSource, RoleCriteria, RoleQuery, SourceError,
};
use crate::models::{Permission, Role, TenantId, UserId};

pub const ROLES: &str = "roles";
pub const PERMISSIONS: &str = "permissions";
pub const USERS: &str = "users";

/// Permission data held in MongoDB.
///
/// `users` documents carry `tenant_id`, a `roles` array of
/// `{ role_id, assigned_at, assigned_by, expires_at }` and an
/// `additional_permissions` array of permission ids. Role documents list
/// their permission ids under `permissions`.
#[derive(Clone)]
pub struct MongoPermissionSource {
    client: MongoClient,
    db: Database,
}

impl MongoPermissionSource {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, SourceError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            SourceError::from(e)
        })?;
        let db = client.database(database);
        Ok(Self { client, db })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection(name)
    }
}

#[async_trait]
impl PermissionSource for MongoPermissionSource {
    async fn health_check(&self) -> Result<(), SourceError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                SourceError::from(e)
            })?;
        Ok(())
    }

    async fn find_roles(&self, query: &RoleQuery) -> Result<Vec<Role>, SourceError> {
        let cursor = match &query.criteria {
            RoleCriteria::ByAssignee(user_id) => {
                let pipeline =
                    assigned_roles_pipeline(&query.tenant_id, user_id, bson::DateTime::now());
                self.collection(USERS).aggregate(pipeline, None).await?
            }
            _ => match role_filter(query) {
                Some(filter) => self.collection(ROLES).find(filter, None).await?,
                None => return Ok(Vec::new()),
            },
        };
        collect(cursor, ROLES).await
    }

    async fn find_permissions(
        &self,
        query: &PermissionQuery,
    ) -> Result<Vec<Permission>, SourceError> {
        let cursor = match &query.criteria {
            PermissionCriteria::ByRole(role_ids) => {
                if role_ids.is_empty() {
                    return Ok(Vec::new());
                }
                let pipeline = role_permissions_pipeline(&query.tenant_id, role_ids);
                self.collection(ROLES).aggregate(pipeline, None).await?
            }
            PermissionCriteria::ByGrantee(user_id) => {
                let pipeline = granted_permissions_pipeline(&query.tenant_id, user_id);
                self.collection(USERS).aggregate(pipeline, None).await?
            }
            _ => match permission_filter(query) {
                Some(filter) => self.collection(PERMISSIONS).find(filter, None).await?,
                None => return Ok(Vec::new()),
            },
        };
        collect(cursor, PERMISSIONS).await
    }
}

/// Drain a cursor, skipping documents that do not decode.
async fn collect<T: DeserializeOwned>(
    mut cursor: Cursor<Document>,
    collection: &str,
) -> Result<Vec<T>, SourceError> {
    let mut out = Vec::new();
    while let Some(document) = cursor.try_next().await? {
        match bson::from_document::<T>(document) {
            Ok(item) => out.push(item),
            Err(e) => {
                tracing::warn!(collection = %collection, error = %e, "Skipping undecodable document");
            }
        }
    }
    Ok(out)
}

/// Filter for the direct role criteria. `None` means nothing can match.
pub fn role_filter(query: &RoleQuery) -> Option<Document> {
    let tenant = query.tenant_id.as_str();
    match &query.criteria {
        RoleCriteria::ById(ids) if ids.is_empty() => None,
        RoleCriteria::ById(ids) => {
            Some(doc! { "tenant_id": tenant, "_id": { "$in": ids.to_vec() } })
        }
        RoleCriteria::ByName(name) => Some(doc! { "tenant_id": tenant, "name": name.as_str() }),
        RoleCriteria::ByPermission(permission_id) => {
            Some(doc! { "tenant_id": tenant, "permissions": permission_id.as_str() })
        }
        RoleCriteria::ByAssignee(_) => None,
    }
}

pub fn permission_filter(query: &PermissionQuery) -> Option<Document> {
    let tenant = query.tenant_id.as_str();
    match &query.criteria {
        PermissionCriteria::ById(ids) if ids.is_empty() => None,
        PermissionCriteria::ById(ids) => {
            Some(doc! { "tenant_id": tenant, "_id": { "$in": ids.to_vec() } })
        }
        PermissionCriteria::ByKey(key) => Some(doc! {
            "tenant_id": tenant,
            "resource": key.resource.as_str(),
            "action": key.action.as_str(),
        }),
        PermissionCriteria::ByRole(_) | PermissionCriteria::ByGrantee(_) => None,
    }
}

/// Roles assigned to the user whose assignment has not expired at `now`.
pub fn assigned_roles_pipeline(
    tenant_id: &TenantId,
    user_id: &UserId,
    now: bson::DateTime,
) -> Vec<Document> {
    let tenant = tenant_id.as_str();
    vec![
        doc! { "$match": { "_id": user_id.as_str(), "tenant_id": tenant } },
        doc! { "$unwind": "$roles" },
        doc! { "$match": { "$or": [
            { "roles.expires_at": null },
            { "roles.expires_at": { "$gt": now } },
        ] } },
        doc! { "$lookup": {
            "from": ROLES,
            "localField": "roles.role_id",
            "foreignField": "_id",
            "as": "role",
        } },
        doc! { "$unwind": "$role" },
        doc! { "$match": { "role.tenant_id": tenant } },
        doc! { "$replaceRoot": { "newRoot": "$role" } },
    ]
}

/// Union of the permissions referenced by the given roles, one document per
/// permission.
pub fn role_permissions_pipeline(tenant_id: &TenantId, role_ids: &[String]) -> Vec<Document> {
    let tenant = tenant_id.as_str();
    vec![
        doc! { "$match": { "tenant_id": tenant, "_id": { "$in": role_ids.to_vec() } } },
        doc! { "$unwind": "$permissions" },
        doc! { "$group": { "_id": "$permissions" } },
        doc! { "$lookup": {
            "from": PERMISSIONS,
            "localField": "_id",
            "foreignField": "_id",
            "as": "permission",
        } },
        doc! { "$unwind": "$permission" },
        doc! { "$match": { "permission.tenant_id": tenant } },
        doc! { "$replaceRoot": { "newRoot": "$permission" } },
    ]
}

pub fn granted_permissions_pipeline(tenant_id: &TenantId, user_id: &UserId) -> Vec<Document> {
    let tenant = tenant_id.as_str();
    vec![
        doc! { "$match": { "_id": user_id.as_str(), "tenant_id": tenant } },
        doc! { "$project": { "ids": { "$ifNull": ["$additional_permissions", []] } } },
        doc! { "$unwind": "$ids" },
        doc! { "$lookup": {
            "from": PERMISSIONS,
            "localField": "ids",
            "foreignField": "_id",
            "as": "permission",
        } },
        doc! { "$unwind": "$permission" },
        doc! { "$match": { "permission.tenant_id": tenant } },
        doc! { "$replaceRoot": { "newRoot": "$permission" } },
    ]
}
