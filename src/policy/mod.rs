//! Policy evaluation.
//!
//! Every decision re-reads roles and custom grants from the store; nothing
//! is trusted from token claims. Revoking a role or grant therefore takes
//! effect on the very next authorization check, not at token expiry.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, warn};

use crate::store::{Permission, Store};

/// One database a user may connect to, shaped for the `databases` listing.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub db_type: String,
    pub permissions: String,
    pub status: String,
    pub description: String,
}

pub struct Engine {
    store: Arc<Store>,
}

impl Engine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Union of role permissions and custom grants, read fresh. A missing
    /// user yields an empty set, not an error.
    async fn fresh_permissions(&self, username: &str) -> Option<Vec<Permission>> {
        let user = match self.store.get_user(username).await {
            Ok(user) => user,
            Err(_) => {
                warn!("user not found during policy check: {}", username);
                return None;
            }
        };

        let mut permissions = match self.store.permissions_for_roles(&user.roles).await {
            Ok(perms) => perms,
            Err(e) => {
                error!("failed to resolve role permissions for {}: {}", username, e);
                return None;
            }
        };
        permissions.extend(user.custom_permissions);
        Some(permissions)
    }

    /// True iff any effective permission names `database_name`.
    pub async fn can_access(&self, username: &str, database_name: &str) -> bool {
        match self.fresh_permissions(username).await {
            Some(perms) => perms.iter().any(|p| p.database == database_name),
            None => false,
        }
    }

    /// Databases the user may connect to. The level shown is the first
    /// matching permission's; callers must not depend on ordering.
    pub async fn allowed_databases(&self, username: &str) -> Vec<DatabaseInfo> {
        let Some(perms) = self.fresh_permissions(username).await else {
            return Vec::new();
        };

        let databases = match self.store.list_databases().await {
            Ok(databases) => databases,
            Err(e) => {
                error!("failed to list databases: {}", e);
                return Vec::new();
            }
        };

        databases
            .into_iter()
            .filter_map(|db| {
                perms
                    .iter()
                    .find(|p| p.database == db.name)
                    .map(|p| DatabaseInfo {
                        name: db.name,
                        db_type: db.db_type,
                        permissions: p.level.clone(),
                        status: "online".to_string(),
                        description: db.description,
                    })
            })
            .collect()
    }

    /// First matching permission level for the database, if any.
    pub async fn level_for(&self, username: &str, database_name: &str) -> Option<String> {
        self.fresh_permissions(username)
            .await?
            .into_iter()
            .find(|p| p.database == database_name)
            .map(|p| p.level)
    }
}
