use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::store::RefreshToken;

use super::{AppState, AuthContext};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Serialize)]
pub struct ActiveLoginInfo {
    pub id: i64,
    pub created_at: String,
    pub last_used_at: String,
    pub expires_at: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
}

impl From<&RefreshToken> for ActiveLoginInfo {
    fn from(token: &RefreshToken) -> Self {
        Self {
            id: token.id,
            created_at: token.created_at.format(TIMESTAMP_FORMAT).to_string(),
            last_used_at: token.last_used_at.format(TIMESTAMP_FORMAT).to_string(),
            expires_at: token.expires_at.format(TIMESTAMP_FORMAT).to_string(),
            user_agent: token.user_agent.clone(),
            ip_address: token.ip_address.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ActiveLoginsResponse {
    pub active_logins: Vec<ActiveLoginInfo>,
    pub total: usize,
}

/// GET /api/active-logins
pub async fn list_active_logins(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ActiveLoginsResponse>, ApiError> {
    let logins = state
        .store
        .get_user_active_logins(&auth.claims.username)
        .await?;

    let active_logins: Vec<ActiveLoginInfo> = logins.iter().map(Into::into).collect();
    Ok(Json(ActiveLoginsResponse {
        total: active_logins.len(),
        active_logins,
    }))
}

/// DELETE /api/active-logins/{id}
///
/// Scoped to the caller: revoking another user's login (or a nonexistent
/// id) is indistinguishable from not found.
pub async fn revoke_active_login(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state
        .store
        .revoke_active_login_by_id(id, &auth.claims.username)
        .await
        .map_err(|e| {
            warn!("failed to revoke active login {}: {}", id, e);
            ApiError::not_found("session not found or already revoked")
        })?;

    info!(
        "active login {} revoked by {}",
        id, auth.claims.username
    );
    Ok(Json(json!({ "message": "Active login revoked successfully" })))
}
