use chrono::Utc;
use sqlx::Row;

use super::{Permission, Store, StoreError, User};

impl Store {
    /// Writes the user record (expects `password_hash` to be populated) and
    /// replaces role assignments and custom permissions in one transaction.
    pub async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        if user.password_hash.is_empty() {
            return Err(StoreError::Password("user password hash is required".into()));
        }

        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO users (username, password_hash, created_at) VALUES (?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET password_hash = excluded.password_hash",
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM user_roles WHERE username = ?")
            .bind(&user.username)
            .execute(&mut *tx)
            .await?;
        for role in &user.roles {
            sqlx::query("INSERT INTO user_roles (username, role_name) VALUES (?, ?)")
                .bind(&user.username)
                .bind(role)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM user_custom_permissions WHERE username = ?")
            .bind(&user.username)
            .execute(&mut *tx)
            .await?;
        for perm in &user.custom_permissions {
            sqlx::query(
                "INSERT INTO user_custom_permissions (username, database_name, level)
                 VALUES (?, ?, ?)",
            )
            .bind(&user.username)
            .bind(&perm.database)
            .bind(&perm.level)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Hashes the password with bcrypt then delegates to [`Store::save_user`].
    pub async fn create_user_with_password(
        &self,
        username: &str,
        plain_password: &str,
        roles: Vec<String>,
        custom_permissions: Vec<Permission>,
    ) -> Result<(), StoreError> {
        let password_hash = hash_password(plain_password).await?;
        self.save_user(&User {
            username: username.to_string(),
            password_hash,
            roles,
            custom_permissions,
            created_at: Utc::now(),
        })
        .await
    }

    /// Fetches the user with roles and custom permissions resolved.
    pub async fn get_user(&self, username: &str) -> Result<User, StoreError> {
        let row = sqlx::query(
            "SELECT username, password_hash, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("user {username}")))?;

        Ok(User {
            username: row.get("username"),
            password_hash: row.get("password_hash"),
            roles: self.user_roles(username).await?,
            custom_permissions: self.user_custom_permissions(username).await?,
            created_at: row.get("created_at"),
        })
    }

    /// Returns all users with their role bindings, ordered by username.
    pub async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query(
            "SELECT username, password_hash, created_at FROM users ORDER BY username",
        )
        .fetch_all(self.pool())
        .await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            let username: String = row.get("username");
            users.push(User {
                roles: self.user_roles(&username).await?,
                custom_permissions: self.user_custom_permissions(&username).await?,
                username,
                password_hash: row.get("password_hash"),
                created_at: row.get("created_at"),
            });
        }
        Ok(users)
    }

    /// Removes a user; role assignments, custom permissions, and refresh
    /// tokens cascade away.
    pub async fn delete_user(&self, username: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE username = ?")
            .bind(username)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {username}")));
        }
        Ok(())
    }

    /// Verifies a user's password against the stored bcrypt hash.
    pub async fn verify_password(
        &self,
        username: &str,
        plain_password: &str,
    ) -> Result<(), StoreError> {
        let user = self.get_user(username).await?;
        if verify_hash(plain_password, &user.password_hash).await? {
            Ok(())
        } else {
            Err(StoreError::Password("invalid password".into()))
        }
    }

    /// Replaces an existing user's password.
    pub async fn set_user_password(
        &self,
        username: &str,
        plain_password: &str,
    ) -> Result<(), StoreError> {
        let password_hash = hash_password(plain_password).await?;
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE username = ?")
            .bind(&password_hash)
            .bind(username)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {username}")));
        }
        Ok(())
    }

    async fn user_roles(&self, username: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT role_name FROM user_roles WHERE username = ? ORDER BY role_name",
        )
        .bind(username)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|row| row.get("role_name")).collect())
    }

    async fn user_custom_permissions(
        &self,
        username: &str,
    ) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query(
            "SELECT database_name, level FROM user_custom_permissions WHERE username = ?",
        )
        .bind(username)
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

/// bcrypt is CPU-bound; both directions run on the blocking pool.
pub(crate) async fn hash_password(plain: &str) -> Result<String, StoreError> {
    let plain = plain.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(plain, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| StoreError::Password(format!("join error: {e}")))?
        .map_err(|e| StoreError::Password(e.to_string()))
}

pub(crate) async fn verify_hash(plain: &str, hash: &str) -> Result<bool, StoreError> {
    let plain = plain.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hash))
        .await
        .map_err(|e| StoreError::Password(format!("join error: {e}")))?
        .map_err(|e| StoreError::Password(e.to_string()))
}
