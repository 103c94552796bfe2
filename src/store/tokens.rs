use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::Row;

use super::{RefreshToken, Store, StoreError};

/// SHA-256 of the opaque token, hex-encoded. Only this ever reaches disk.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl Store {
    /// Generates and stores a refresh token for `username`, returning the
    /// plaintext. The plaintext is never written anywhere.
    pub async fn create_refresh_token(
        &self,
        username: &str,
        user_agent: &str,
        ip_address: &str,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        let token = generate_token();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO refresh_tokens
                (token_hash, username, expires_at, created_at, last_used_at,
                 user_agent, ip_address)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(hash_token(&token))
        .bind(username)
        .bind(now + ttl)
        .bind(now)
        .bind(now)
        .bind(user_agent)
        .bind(ip_address)
        .execute(self.pool())
        .await?;

        Ok(token)
    }

    /// Looks a token up by hash and checks revocation and expiry. A valid
    /// token gets its `last_used_at` bumped.
    pub async fn validate_refresh_token(&self, token: &str) -> Result<RefreshToken, StoreError> {
        let row = sqlx::query(
            "SELECT id, token_hash, username, expires_at, created_at, last_used_at,
                    revoked, revoked_at, user_agent, ip_address
             FROM refresh_tokens WHERE token_hash = ?",
        )
        .bind(hash_token(token))
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::InvalidToken("unknown token".into()))?;

        let record = refresh_token_from_row(&row);
        let now = Utc::now();
        if record.revoked {
            return Err(StoreError::InvalidToken("token has been revoked".into()));
        }
        if now >= record.expires_at {
            return Err(StoreError::InvalidToken("token has expired".into()));
        }

        sqlx::query("UPDATE refresh_tokens SET last_used_at = ? WHERE id = ?")
            .bind(now)
            .bind(record.id)
            .execute(self.pool())
            .await?;

        Ok(record)
    }

    /// Rotates a refresh token: validates it, revokes it, and issues a
    /// replacement, all inside one transaction. The conditional revocation
    /// (`revoked = 0` guard) is the serialization point, so a concurrent
    /// replay of the same token loses the race and fails.
    pub async fn rotate_refresh_token(
        &self,
        token: &str,
        user_agent: &str,
        ip_address: &str,
        ttl: Duration,
    ) -> Result<(String, String), StoreError> {
        let presented_hash = hash_token(token);
        let now = Utc::now();
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query(
            "SELECT id, token_hash, username, expires_at, created_at, last_used_at,
                    revoked, revoked_at, user_agent, ip_address
             FROM refresh_tokens WHERE token_hash = ?",
        )
        .bind(&presented_hash)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::InvalidToken("unknown token".into()))?;

        let record = refresh_token_from_row(&row);
        if record.revoked {
            return Err(StoreError::InvalidToken("token has been revoked".into()));
        }
        if now >= record.expires_at {
            return Err(StoreError::InvalidToken("token has expired".into()));
        }

        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ?
             WHERE token_hash = ? AND revoked = 0",
        )
        .bind(now)
        .bind(&presented_hash)
        .execute(&mut *tx)
        .await?;
        if revoked.rows_affected() == 0 {
            return Err(StoreError::InvalidToken("token already rotated".into()));
        }

        let replacement = generate_token();
        sqlx::query(
            "INSERT INTO refresh_tokens
                (token_hash, username, expires_at, created_at, last_used_at,
                 user_agent, ip_address)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(hash_token(&replacement))
        .bind(&record.username)
        .bind(now + ttl)
        .bind(now)
        .bind(now)
        .bind(user_agent)
        .bind(ip_address)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((replacement, record.username))
    }

    /// Marks a token revoked. Fails if it is unknown or already revoked.
    pub async fn revoke_refresh_token(&self, token: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ?
             WHERE token_hash = ? AND revoked = 0",
        )
        .bind(Utc::now())
        .bind(hash_token(token))
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidToken(
                "token not found or already revoked".into(),
            ));
        }
        Ok(())
    }

    /// Revokes every live refresh token belonging to `username`.
    pub async fn revoke_all_user_tokens(&self, username: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ?
             WHERE username = ? AND revoked = 0",
        )
        .bind(Utc::now())
        .bind(username)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Deletes rows that expired over a day ago, plus revoked rows older
    /// than seven days. Run periodically.
    pub async fn cleanup_expired_tokens(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let expired = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < ?")
            .bind(now - Duration::days(1))
            .execute(self.pool())
            .await?;

        sqlx::query("DELETE FROM refresh_tokens WHERE revoked = 1 AND revoked_at < ?")
            .bind(now - Duration::days(7))
            .execute(self.pool())
            .await?;

        Ok(expired.rows_affected())
    }

    /// All live (non-revoked, unexpired) tokens for one user, most recently
    /// used first.
    pub async fn get_user_active_logins(
        &self,
        username: &str,
    ) -> Result<Vec<RefreshToken>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, token_hash, username, expires_at, created_at, last_used_at,
                    revoked, revoked_at, user_agent, ip_address
             FROM refresh_tokens
             WHERE username = ? AND revoked = 0 AND expires_at > ?
             ORDER BY last_used_at DESC",
        )
        .bind(username)
        .bind(Utc::now())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(refresh_token_from_row).collect())
    }

    /// All live tokens across users. Callers must enforce authorization.
    pub async fn get_all_active_logins(&self) -> Result<Vec<RefreshToken>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, token_hash, username, expires_at, created_at, last_used_at,
                    revoked, revoked_at, user_agent, ip_address
             FROM refresh_tokens
             WHERE revoked = 0 AND expires_at > ?
             ORDER BY last_used_at DESC",
        )
        .bind(Utc::now())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(refresh_token_from_row).collect())
    }

    /// Revokes one login by row id, scoped to its owner so a caller can only
    /// revoke their own sessions.
    pub async fn revoke_active_login_by_id(
        &self,
        id: i64,
        username: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ?
             WHERE id = ? AND username = ? AND revoked = 0",
        )
        .bind(Utc::now())
        .bind(id)
        .bind(username)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("active login {id}")));
        }
        Ok(())
    }
}

fn refresh_token_from_row(row: &sqlx::sqlite::SqliteRow) -> RefreshToken {
    let expires_at: DateTime<Utc> = row.get("expires_at");
    RefreshToken {
        id: row.get("id"),
        token_hash: row.get("token_hash"),
        username: row.get("username"),
        expires_at,
        created_at: row.get("created_at"),
        last_used_at: row.get("last_used_at"),
        revoked: row.get("revoked"),
        revoked_at: row.get("revoked_at"),
        user_agent: row.get("user_agent"),
        ip_address: row.get("ip_address"),
    }
}
