use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A grant of one permission level on one backend database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub database: String,
    pub level: String,
}

/// A registered backend database definition.
///
/// `admin_password` is held in cleartext only in memory; at rest it is an
/// AES-256-GCM blob and it is never serialized over the API.
#[derive(Debug, Clone)]
pub struct Database {
    pub name: String,
    pub db_type: String,
    pub description: String,
    pub backend_addr: String,
    pub admin_username: String,
    pub admin_password: String,
    pub available_permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named bundle of permissions assignable to users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub description: String,
    pub permissions: Vec<Permission>,
}

/// A gateway end user. `password_hash` is a bcrypt string.
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub roles: Vec<String>,
    pub custom_permissions: Vec<Permission>,
    pub created_at: DateTime<Utc>,
}

/// An administrative account for the management surface.
#[derive(Debug, Clone)]
pub struct Admin {
    pub username: String,
    pub password_hash: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// A stored refresh token. Only the SHA-256 hash of the opaque token is
/// persisted; the plaintext exists solely in the issuing response.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub id: i64,
    pub token_hash: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub user_agent: String,
    pub ip_address: String,
}

impl RefreshToken {
    /// A token is usable iff it is not revoked and not past its expiry.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }
}
