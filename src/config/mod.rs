use std::env;
use std::path::PathBuf;

use thiserror::Error;

const STORE_PATH_ENV: &str = "ZGATE_STORE_PATH";
const STORE_KEY_ENV: &str = "ZGATE_STORE_KEY";
const JWT_SECRET_ENV: &str = "ZGATE_JWT_SECRET";
const PORT_ENV: &str = "ZGATE_PORT";

const DEFAULT_STORE_PATH: &str = "data/zgate.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("failed to decode {0} as hex: {1}")]
    InvalidHex(&'static str, hex::FromHexError),

    #[error("decoded {0} must be exactly 32 bytes, got {1}")]
    InvalidKeyLength(&'static str, usize),
}

/// Process configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the HTTP API, always `:`-prefixed or `host:port`.
    pub api_addr: String,
    /// Path of the SQLite metadata store.
    pub store_path: PathBuf,
    /// AES-256 key protecting secret columns in the store.
    pub store_key: [u8; 32],
    /// HMAC secret for access-token signing.
    pub jwt_secret: String,
}

impl Config {
    /// Reads configuration from the environment. `api_addr_override` (from
    /// the `--api-addr` flag) takes precedence over `ZGATE_PORT`.
    pub fn from_env(api_addr_override: Option<String>) -> Result<Self, ConfigError> {
        let api_addr = match api_addr_override {
            Some(addr) => addr,
            None => env::var(PORT_ENV).map_err(|_| ConfigError::Missing(PORT_ENV))?,
        };
        let api_addr = normalize_addr(api_addr);

        let store_key = decode_store_key(
            &env::var(STORE_KEY_ENV).map_err(|_| ConfigError::Missing(STORE_KEY_ENV))?,
        )?;

        let jwt_secret =
            env::var(JWT_SECRET_ENV).map_err(|_| ConfigError::Missing(JWT_SECRET_ENV))?;

        let store_path = env::var(STORE_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORE_PATH));

        Ok(Self {
            api_addr,
            store_path,
            store_key,
            jwt_secret,
        })
    }
}

/// A bare port like `8080` becomes `:8080`; full addresses pass through.
fn normalize_addr(addr: String) -> String {
    if addr.contains(':') {
        addr
    } else {
        format!(":{addr}")
    }
}

fn decode_store_key(key_hex: &str) -> Result<[u8; 32], ConfigError> {
    let bytes =
        hex::decode(key_hex.trim()).map_err(|e| ConfigError::InvalidHex(STORE_KEY_ENV, e))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| ConfigError::InvalidKeyLength(STORE_KEY_ENV, len))
}

/// Turns a `:port` or `host:port` listen address into something a socket can
/// bind: an empty host means all interfaces.
pub fn bind_addr(api_addr: &str) -> String {
    match api_addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => api_addr.to_string(),
    }
}
