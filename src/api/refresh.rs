use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::refresh_token_ttl;
use crate::error::ApiError;

use super::login::TokenResponse;
use super::middleware::{client_ip, user_agent};
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// POST /api/refresh
///
/// Rotation happens inside one store transaction: the presented token is
/// revoked before the replacement exists, so a replayed token can never
/// yield a second live pair.
pub async fn refresh(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    if req.refresh_token.is_empty() {
        return Err(ApiError::bad_request("refresh_token is required"));
    }

    let ip_address = client_ip(&headers, addr);
    let (refresh_token, username) = state
        .store
        .rotate_refresh_token(
            &req.refresh_token,
            &user_agent(&headers),
            &ip_address,
            refresh_token_ttl(),
        )
        .await
        .map_err(|e| match e {
            crate::store::StoreError::InvalidToken(reason) => {
                warn!("refresh rejected: {}", reason);
                ApiError::unauthorized("invalid or expired refresh token")
            }
            other => ApiError::from(other),
        })?;

    // The user may have been deleted since the token was issued.
    state
        .store
        .get_user(&username)
        .await
        .map_err(|_| ApiError::unauthorized("user not found"))?;

    let (access_token, expires_at) = state.tokens.issue(&username)?;

    info!("token refreshed for {} from {}", username, ip_address);

    Ok(Json(TokenResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: (expires_at - Utc::now()).num_seconds(),
        username,
    }))
}
