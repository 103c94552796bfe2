use std::sync::Arc;

use crate::store::{Permission, Store, StoreError};

use super::AuthError;

/// A user with their effective permission set resolved at a point in time.
/// Snapshots like this are for display only; authorization decisions always
/// go back to the store through the policy engine.
#[derive(Debug, Clone)]
pub struct UserWithPermissions {
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<Permission>,
}

/// Verifies user credentials against the store.
pub struct Authenticator {
    store: Arc<Store>,
}

impl Authenticator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Validates username and password and returns the user with resolved
    /// permissions. Every failure mode collapses to `InvalidCredentials` so
    /// the response does not leak which part was wrong.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<UserWithPermissions, AuthError> {
        self.store
            .verify_password(username, password)
            .await
            .map_err(|_| AuthError::InvalidCredentials)?;

        let user = self.store.get_user(username).await?;
        let mut permissions = self.store.permissions_for_roles(&user.roles).await?;
        permissions.extend(user.custom_permissions.iter().cloned());

        Ok(UserWithPermissions {
            username: user.username,
            roles: user.roles,
            permissions,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::store::test_support::open_store;
    use crate::store::{Database, Role};

    use super::*;

    async fn seed(store: &Arc<Store>) {
        store
            .save_database(&Database {
                name: "salesdb".into(),
                db_type: "mysql".into(),
                description: String::new(),
                backend_addr: "127.0.0.1:3306".into(),
                admin_username: "root".into(),
                admin_password: "pw".into(),
                available_permissions: vec!["read".into()],
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .save_role(&Role {
                name: "reader".into(),
                description: String::new(),
                permissions: vec![Permission {
                    database: "salesdb".into(),
                    level: "read".into(),
                }],
            })
            .await
            .unwrap();
        store
            .create_user_with_password("alice@ex.com", "pa55word", vec!["reader".into()], vec![])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn resolves_permissions_on_success() {
        let (store, _dir) = open_store().await;
        let store = Arc::new(store);
        seed(&store).await;

        let auth = Authenticator::new(Arc::clone(&store));
        let user = auth.authenticate("alice@ex.com", "pa55word").await.unwrap();
        assert_eq!(user.username, "alice@ex.com");
        assert_eq!(user.roles, vec!["reader"]);
        assert_eq!(user.permissions.len(), 1);
        assert_eq!(user.permissions[0].database, "salesdb");
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_identical() {
        let (store, _dir) = open_store().await;
        let store = Arc::new(store);
        seed(&store).await;

        let auth = Authenticator::new(Arc::clone(&store));
        let a = auth.authenticate("alice@ex.com", "wrong").await;
        let b = auth.authenticate("nobody@ex.com", "pa55word").await;
        assert!(matches!(a, Err(AuthError::InvalidCredentials)));
        assert!(matches!(b, Err(AuthError::InvalidCredentials)));
    }
}
