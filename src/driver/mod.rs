//! Vendor-specific backend drivers.
//!
//! A [`Driver`] is constructed per session and owns a privileged connection
//! to the backend (construction fails fast if the backend is unreachable).
//! It can provision and drop the session's temporary account and dial plain
//! TCP connections for the forwarder. Adding a vendor means adding a
//! [`Vendor`] variant and an implementation, not touching callers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::store::{Database, Store};

mod mssql;
mod mysql;

/// Prefix of every account the gateway provisions on a backend.
pub const TEMP_USER_PREFIX: &str = "zgate_";

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unsupported database type: {0}")]
    Unsupported(String),

    #[error("invalid backend address: {0}")]
    InvalidAddr(String),

    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("provisioning failed: {0}")]
    Provision(String),

    #[error("backend query failed: {0}")]
    Sql(String),

    #[error("operation canceled")]
    Canceled,
}

/// Credentials of the ephemeral account provisioned for one session.
#[derive(Debug, Clone)]
pub struct TempCredentials {
    pub username: String,
    pub password: String,
}

/// Capability set every vendor must provide.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Opens a raw TCP connection to the backend for forwarding. Aborts if
    /// the session's cancellation signal fires mid-dial.
    async fn connect_tcp(
        &self,
        addr: &str,
        cancel: &CancellationToken,
    ) -> Result<TcpStream, DriverError>;

    /// Creates the temporary account and applies grants for `levels`.
    /// Unknown levels are skipped with a warning; failed grants are logged
    /// but do not fail the call (the backend stays fail-closed at query
    /// time for anything not granted).
    async fn create_temp_user(
        &self,
        username: &str,
        password: &str,
        levels: &[String],
    ) -> Result<(), DriverError>;

    /// Removes the temporary account. Safe on a partially created account
    /// and a no-op if the account does not exist.
    async fn drop_temp_user(&self, username: &str) -> Result<(), DriverError>;

    /// Drops every account carrying the gateway prefix. Used by the startup
    /// sweep to reap accounts orphaned by a crash. Returns how many were
    /// dropped.
    async fn sweep_temp_users(&self) -> Result<u32, DriverError>;

    /// Releases the privileged connection.
    async fn close(&self);

    fn vendor(&self) -> Vendor;
}

/// Supported backend vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Mysql,
    Mssql,
}

impl Vendor {
    /// Opens a privileged connection to the backend and returns the driver.
    /// Fails with `Unreachable` if the initial connection or ping fails.
    pub async fn connect(self, database: &Database) -> Result<Arc<dyn Driver>, DriverError> {
        match self {
            Vendor::Mysql => Ok(Arc::new(mysql::MySqlDriver::connect(database).await?)),
            Vendor::Mssql => Ok(Arc::new(mssql::MssqlDriver::connect(database).await?)),
        }
    }
}

impl FromStr for Vendor {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mysql" => Ok(Vendor::Mysql),
            "mssql" => Ok(Vendor::Mssql),
            other => Err(DriverError::Unsupported(other.to_string())),
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vendor::Mysql => write!(f, "mysql"),
            Vendor::Mssql => write!(f, "mssql"),
        }
    }
}

/// Read-mostly cache mapping configured database types to vendors.
/// Initialized at startup so an unsupported type fails the boot, not the
/// first connect.
pub struct DriverRegistry {
    vendors: RwLock<HashMap<String, Vendor>>,
}

impl DriverRegistry {
    pub async fn initialize(store: &Store) -> Result<Self, DriverError> {
        let mut vendors = HashMap::new();
        let databases = store
            .list_databases()
            .await
            .map_err(|e| DriverError::Sql(e.to_string()))?;

        for db in databases {
            if vendors.contains_key(&db.db_type) {
                continue;
            }
            let vendor = Vendor::from_str(&db.db_type)?;
            tracing::info!("driver initialized for type {}", db.db_type);
            vendors.insert(db.db_type, vendor);
        }

        Ok(Self {
            vendors: RwLock::new(vendors),
        })
    }

    /// Resolves the vendor for a database type, learning new types lazily.
    pub async fn vendor_for(&self, db_type: &str) -> Result<Vendor, DriverError> {
        if let Some(vendor) = self.vendors.read().await.get(db_type) {
            return Ok(*vendor);
        }
        let vendor = Vendor::from_str(db_type)?;
        self.vendors
            .write()
            .await
            .insert(db_type.to_string(), vendor);
        Ok(vendor)
    }
}

/// Dials the backend, aborting if the cancellation signal fires first.
pub(crate) async fn dial(
    addr: &str,
    cancel: &CancellationToken,
) -> Result<TcpStream, DriverError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(DriverError::Canceled),
        result = TcpStream::connect(addr) => result
            .map_err(|e| DriverError::Unreachable(format!("failed to connect to {addr}: {e}"))),
    }
}

/// Splits a `host:port` backend address.
pub(crate) fn parse_backend_addr(addr: &str) -> Result<(String, u16), DriverError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| DriverError::InvalidAddr(addr.to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| DriverError::InvalidAddr(addr.to_string()))?;
    if host.is_empty() {
        return Err(DriverError::InvalidAddr(addr.to_string()));
    }
    Ok((host.to_string(), port))
}

/// Generated credentials are interpolated into DDL, so every character must
/// stay inside this domain.
pub(crate) fn is_safe_credential(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '#' | '$'))
}

/// Builds a unique temporary username: `zgate_<base>_<hex8>`. Characters of
/// `base` outside `[A-Za-z0-9_]` are mapped to `_` to keep the DDL-safe
/// domain.
pub fn generate_temp_username(base: &str) -> String {
    let safe_base: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut bytes = [0u8; 4];
    OsRng.fill_bytes(&mut bytes);
    format!("{TEMP_USER_PREFIX}{safe_base}_{}", hex::encode(bytes))
}

/// Builds a random password shaped `Z<hex8>#<hex8>$G<hex8>`: the fixed
/// uppercase letters and symbols satisfy "medium" password policies
/// (length, digit, mixed case, special character) on both vendors.
pub fn generate_temp_password() -> String {
    let mut bytes = [0u8; 12];
    OsRng.fill_bytes(&mut bytes);
    let hex = hex::encode(bytes);
    format!("Z{}#{}$G{}", &hex[..8], &hex[8..16], &hex[16..24])
}

/// Part of the login name before the first `@`, e.g. `alice` from
/// `alice@ex.com`.
pub fn username_base(username: &str) -> &str {
    username.split('@').next().unwrap_or(username)
}
