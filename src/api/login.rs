use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::refresh_token_ttl;
use crate::error::ApiError;

use super::middleware::{client_ip, user_agent};
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// OAuth2-style token response, shared by login and refresh.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub username: String,
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    info!("login attempt for {}", req.username);

    let user = state
        .authenticator
        .authenticate(&req.username, &req.password)
        .await
        .map_err(|e| {
            warn!("authentication failed for {}: {}", req.username, e);
            ApiError::unauthorized("invalid credentials")
        })?;

    let (access_token, expires_at) = state.tokens.issue(&user.username)?;

    let ip_address = client_ip(&headers, addr);
    let refresh_token = state
        .store
        .create_refresh_token(
            &user.username,
            &user_agent(&headers),
            &ip_address,
            refresh_token_ttl(),
        )
        .await?;

    info!("login successful for {} from {}", user.username, ip_address);

    Ok(Json(TokenResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: (expires_at - Utc::now()).num_seconds(),
        username: user.username,
    }))
}
