use chrono::Utc;
use sqlx::Row;

use super::users::{hash_password, verify_hash};
use super::{Admin, Store, StoreError};

impl Store {
    /// Creates an admin account with a bcrypt-hashed password.
    pub async fn create_admin(
        &self,
        username: &str,
        password: &str,
        name: &str,
        email: &str,
    ) -> Result<(), StoreError> {
        let password_hash = hash_password(password).await?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO admins (username, password_hash, name, email, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(&password_hash)
        .bind(name)
        .bind(email)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn get_admin(&self, username: &str) -> Result<Admin, StoreError> {
        let row = sqlx::query(
            "SELECT username, password_hash, name, email, created_at, updated_at, last_login_at
             FROM admins WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("admin {username}")))?;

        Ok(admin_from_row(&row))
    }

    pub async fn list_admins(&self) -> Result<Vec<Admin>, StoreError> {
        let rows = sqlx::query(
            "SELECT username, password_hash, name, email, created_at, updated_at, last_login_at
             FROM admins ORDER BY created_at DESC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(admin_from_row).collect())
    }

    pub async fn delete_admin(&self, username: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM admins WHERE username = ?")
            .bind(username)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("admin {username}")));
        }
        Ok(())
    }

    /// Checks the password; `Ok(false)` means a bad password, `Err` means
    /// the admin does not exist or verification itself failed.
    pub async fn verify_admin_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, StoreError> {
        let admin = self.get_admin(username).await?;
        verify_hash(password, &admin.password_hash).await
    }

    pub async fn update_admin_last_login(&self, username: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE admins SET last_login_at = ? WHERE username = ?")
            .bind(Utc::now())
            .bind(username)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

fn admin_from_row(row: &sqlx::sqlite::SqliteRow) -> Admin {
    Admin {
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        name: row.get("name"),
        email: row.get("email"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_login_at: row.get("last_login_at"),
    }
}
