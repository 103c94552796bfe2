//! Access-token minting and validation.
//!
//! Access tokens are short-lived HS256 JWTs carrying only the username and a
//! random `jti`. Permissions never ride in the claims, so policy must be
//! re-read from the store on every decision. Refresh tokens are opaque
//! random strings managed by the store (`store::tokens`).

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod authenticator;

pub use authenticator::{Authenticator, UserWithPermissions};

pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

const ISSUER: &str = "zGate";

pub fn refresh_token_ttl() -> Duration {
    Duration::days(REFRESH_TOKEN_TTL_DAYS)
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("failed to sign token: {0}")]
    TokenGeneration(jsonwebtoken::errors::Error),

    #[error("invalid token: {0}")]
    InvalidToken(jsonwebtoken::errors::Error),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

/// JWT claims: identity only, no permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Signs and validates access tokens with a process-wide HMAC secret.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Mints an access token for `username`. Returns the signed token and
    /// its expiry instant.
    pub fn issue(&self, username: &str) -> Result<(String, DateTime<Utc>), AuthError> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(ACCESS_TOKEN_TTL_SECS);

        let claims = Claims {
            username: username.to_string(),
            jti: generate_jti(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: ISSUER.to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(AuthError::TokenGeneration)?;
        Ok((token, expires_at))
    }

    /// Verifies signature, algorithm, and expiry. Tokens signed with
    /// anything but HS256 (including `alg=none`) are rejected.
    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(AuthError::InvalidToken)
    }
}

/// 128 bits of randomness, hex-encoded, for revocation tracking.
fn generate_jti() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
