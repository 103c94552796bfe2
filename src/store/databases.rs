use chrono::{DateTime, Utc};
use sqlx::Row;

use super::{Database, Store, StoreError};

impl Store {
    /// Inserts or updates a database definition. The admin password is
    /// encrypted before it is written.
    pub async fn save_database(&self, def: &Database) -> Result<(), StoreError> {
        let perms_json = serde_json::to_string(&def.available_permissions)?;
        let encrypted = self.encrypt(def.admin_password.as_bytes())?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO databases
                (name, type, description, backend_addr, admin_username,
                 admin_password, available_permissions, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                type = excluded.type,
                description = excluded.description,
                backend_addr = excluded.backend_addr,
                admin_username = excluded.admin_username,
                admin_password = excluded.admin_password,
                available_permissions = excluded.available_permissions,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&def.name)
        .bind(&def.db_type)
        .bind(&def.description)
        .bind(&def.backend_addr)
        .bind(&def.admin_username)
        .bind(&encrypted)
        .bind(&perms_json)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Fetches a single database definition with the password decrypted.
    pub async fn get_database(&self, name: &str) -> Result<Database, StoreError> {
        let row = sqlx::query(
            "SELECT name, type, description, backend_addr, admin_username,
                    admin_password, available_permissions, created_at, updated_at
             FROM databases WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("database {name}")))?;

        self.database_from_row(&row)
    }

    /// Returns all defined databases ordered by name.
    pub async fn list_databases(&self) -> Result<Vec<Database>, StoreError> {
        let rows = sqlx::query(
            "SELECT name, type, description, backend_addr, admin_username,
                    admin_password, available_permissions, created_at, updated_at
             FROM databases ORDER BY name",
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(|row| self.database_from_row(row)).collect()
    }

    /// Removes a database definition; dependent permission rows cascade.
    pub async fn delete_database(&self, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM databases WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("database {name}")));
        }
        Ok(())
    }

    fn database_from_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Database, StoreError> {
        let encrypted: Vec<u8> = row.get("admin_password");
        let admin_password = String::from_utf8_lossy(&self.decrypt(&encrypted)?).into_owned();
        let perms_json: String = row.get("available_permissions");
        let available_permissions: Vec<String> = serde_json::from_str(&perms_json)?;
        let created_at: DateTime<Utc> = row.get("created_at");
        let updated_at: DateTime<Utc> = row.get("updated_at");

        Ok(Database {
            name: row.get("name"),
            db_type: row.get("type"),
            description: row.get("description"),
            backend_addr: row.get("backend_addr"),
            admin_username: row.get("admin_username"),
            admin_password,
            available_permissions,
            created_at,
            updated_at,
        })
    }
}
