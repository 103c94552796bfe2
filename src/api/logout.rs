use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::ApiError;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// POST /api/logout
///
/// Always succeeds: a token that is already revoked or expired means the
/// caller is logged out either way.
pub async fn logout(
    State(state): State<AppState>,
    Json(req): Json<LogoutRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.refresh_token.is_empty() {
        return Err(ApiError::bad_request("refresh_token is required"));
    }

    if let Err(e) = state.store.revoke_refresh_token(&req.refresh_token).await {
        warn!("failed to revoke refresh token at logout: {}", e);
    }

    info!("user logged out");
    Ok(Json(json!({ "message": "Logged out successfully" })))
}
