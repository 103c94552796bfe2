//! SQLite-backed metadata store.
//!
//! Owns the connection pool and exposes CRUD helpers for gateway metadata:
//! backend databases, roles, users, admins, and refresh tokens. Secret
//! columns are encrypted with the 32-byte process key before they hit disk.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

mod admins;
mod crypto;
mod databases;
mod roles;
mod tokens;
mod types;
mod users;

pub use types::{Admin, Database, Permission, RefreshToken, Role, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid refresh token: {0}")]
    InvalidToken(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("password hashing error: {0}")]
    Password(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Owns the SQLite pool and the column-encryption key.
pub struct Store {
    pool: SqlitePool,
    encryption_key: [u8; 32],
}

impl Store {
    /// Opens (or creates) the database at `path` and applies the schema.
    /// Foreign keys are enforced and writers wait up to 5 seconds on a
    /// locked database before giving up.
    pub async fn open(path: &Path, encryption_key: [u8; 32]) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            encryption_key,
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Releases the pool. Safe to call once at shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        crypto::encrypt(&self.encryption_key, plaintext)
    }

    pub(crate) fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, StoreError> {
        crypto::decrypt(&self.encryption_key, payload)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        const SCHEMA: &[&str] = &[
            "CREATE TABLE IF NOT EXISTS databases (
                name TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                backend_addr TEXT NOT NULL,
                admin_username TEXT NOT NULL,
                admin_password BLOB NOT NULL,
                available_permissions TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS roles (
                name TEXT PRIMARY KEY,
                description TEXT NOT NULL DEFAULT ''
            )",
            "CREATE TABLE IF NOT EXISTS role_permissions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                role_name TEXT NOT NULL,
                database_name TEXT NOT NULL,
                level TEXT NOT NULL,
                UNIQUE(role_name, database_name),
                FOREIGN KEY(role_name) REFERENCES roles(name) ON DELETE CASCADE,
                FOREIGN KEY(database_name) REFERENCES databases(name) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS admins (
                username TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                name TEXT NOT NULL,
                email TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_login_at TEXT
            )",
            "CREATE TABLE IF NOT EXISTS user_roles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                role_name TEXT NOT NULL,
                UNIQUE(username, role_name),
                FOREIGN KEY(username) REFERENCES users(username) ON DELETE CASCADE,
                FOREIGN KEY(role_name) REFERENCES roles(name) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS user_custom_permissions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                database_name TEXT NOT NULL,
                level TEXT NOT NULL,
                UNIQUE(username, database_name, level),
                FOREIGN KEY(username) REFERENCES users(username) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS refresh_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token_hash TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_used_at TEXT NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0,
                revoked_at TEXT,
                user_agent TEXT NOT NULL DEFAULT '',
                ip_address TEXT NOT NULL DEFAULT '',
                FOREIGN KEY(username) REFERENCES users(username) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_username
                ON refresh_tokens(username)",
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_token_hash
                ON refresh_tokens(token_hash)",
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_expires_at
                ON refresh_tokens(expires_at)",
        ];

        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::open_store;

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let (store, dir) = open_store().await;
        store.init_schema().await.expect("second init");
        store.close().await;
        drop(dir);
    }
}
