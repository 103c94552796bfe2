use sqlx::Row;

use super::{Permission, Role, Store, StoreError};

impl Store {
    /// Inserts or updates a role and replaces its permission set. Runs in a
    /// single transaction so readers never observe a half-applied edit.
    pub async fn save_role(&self, role: &Role) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO roles (name, description) VALUES (?, ?)
             ON CONFLICT(name) DO UPDATE SET description = excluded.description",
        )
        .bind(&role.name)
        .bind(&role.description)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM role_permissions WHERE role_name = ?")
            .bind(&role.name)
            .execute(&mut *tx)
            .await?;

        for perm in &role.permissions {
            sqlx::query(
                "INSERT INTO role_permissions (role_name, database_name, level)
                 VALUES (?, ?, ?)",
            )
            .bind(&role.name)
            .bind(&perm.database)
            .bind(&perm.level)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Fetches a role by name, including its permissions.
    pub async fn get_role(&self, name: &str) -> Result<Role, StoreError> {
        let row = sqlx::query("SELECT name, description FROM roles WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("role {name}")))?;

        Ok(Role {
            name: row.get("name"),
            description: row.get("description"),
            permissions: self.permissions_for_role(name).await?,
        })
    }

    /// Returns all roles with their permissions, ordered by name.
    pub async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query("SELECT name, description FROM roles ORDER BY name")
            .fetch_all(self.pool())
            .await?;

        let mut roles = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("name");
            roles.push(Role {
                permissions: self.permissions_for_role(&name).await?,
                name,
                description: row.get("description"),
            });
        }
        Ok(roles)
    }

    /// Removes a role; user assignments and permissions cascade away.
    pub async fn delete_role(&self, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM roles WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("role {name}")));
        }
        Ok(())
    }

    /// Aggregates the permissions granted by all of the supplied roles.
    pub async fn permissions_for_roles(
        &self,
        role_names: &[String],
    ) -> Result<Vec<Permission>, StoreError> {
        if role_names.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; role_names.len()].join(",");
        let sql = format!(
            "SELECT database_name, level FROM role_permissions WHERE role_name IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql);
        for name in role_names {
            query = query.bind(name);
        }

        let rows = query.fetch_all(self.pool()).await?;
        Ok(rows
            .into_iter()
            .map(|row| Permission {
                database: row.get("database_name"),
                level: row.get("level"),
            })
            .collect())
    }

    /// Lists usernames directly assigned the role. Users who hold equivalent
    /// permissions through other roles are not included.
    pub async fn users_for_role(&self, role_name: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT username FROM user_roles WHERE role_name = ? ORDER BY username",
        )
        .bind(role_name)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|row| row.get("username")).collect())
    }

    async fn permissions_for_role(&self, role_name: &str) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query(
            "SELECT database_name, level FROM role_permissions WHERE role_name = ?",
        )
        .bind(role_name)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| Permission {
                database: row.get("database_name"),
                level: row.get("level"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::super::test_support::open_store;
    use super::super::Database;
    use super::*;

    async fn seed_database(store: &Store, name: &str) {
        store
            .save_database(&Database {
                name: name.into(),
                db_type: "mysql".into(),
                description: String::new(),
                backend_addr: "127.0.0.1:3306".into(),
                admin_username: "root".into(),
                admin_password: "pw".into(),
                available_permissions: vec!["read".into(), "write".into(), "admin".into()],
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn perm(database: &str, level: &str) -> Permission {
        Permission {
            database: database.into(),
            level: level.into(),
        }
    }

    #[tokio::test]
    async fn save_replaces_permission_set_atomically() {
        let (store, _dir) = open_store().await;
        seed_database(&store, "salesdb").await;
        seed_database(&store, "hrdb").await;

        let mut role = Role {
            name: "reader".into(),
            description: "read access".into(),
            permissions: vec![perm("salesdb", "read"), perm("hrdb", "read")],
        };
        store.save_role(&role).await.unwrap();
        assert_eq!(store.get_role("reader").await.unwrap().permissions.len(), 2);

        role.permissions = vec![perm("salesdb", "write")];
        store.save_role(&role).await.unwrap();

        let reloaded = store.get_role("reader").await.unwrap();
        assert_eq!(reloaded.permissions, vec![perm("salesdb", "write")]);
    }

    #[tokio::test]
    async fn permissions_for_roles_aggregates() {
        let (store, _dir) = open_store().await;
        seed_database(&store, "salesdb").await;
        seed_database(&store, "hrdb").await;

        store
            .save_role(&Role {
                name: "reader".into(),
                description: String::new(),
                permissions: vec![perm("salesdb", "read")],
            })
            .await
            .unwrap();
        store
            .save_role(&Role {
                name: "hr".into(),
                description: String::new(),
                permissions: vec![perm("hrdb", "write")],
            })
            .await
            .unwrap();

        let perms = store
            .permissions_for_roles(&["reader".into(), "hr".into()])
            .await
            .unwrap();
        assert_eq!(perms.len(), 2);

        assert!(store.permissions_for_roles(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_database_cascades_role_permissions() {
        let (store, _dir) = open_store().await;
        seed_database(&store, "salesdb").await;
        store
            .save_role(&Role {
                name: "reader".into(),
                description: String::new(),
                permissions: vec![perm("salesdb", "read")],
            })
            .await
            .unwrap();

        store.delete_database("salesdb").await.unwrap();
        assert!(store.get_role("reader").await.unwrap().permissions.is_empty());
    }
}
