use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::ApiError;

use super::{AppState, AuthContext};

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub database_name: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub port: u16,
    pub database_name: String,
    pub message: String,
    pub temp_username: String,
    pub temp_password: String,
}

/// POST /api/connect
///
/// Policy is checked here, against the store, before the session manager is
/// ever involved; the manager itself does not re-check access.
pub async fn connect(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, ApiError> {
    info!(
        "connect request from {} for {}",
        auth.claims.username, req.database_name
    );

    if !state
        .policy
        .can_access(&auth.claims.username, &req.database_name)
        .await
    {
        warn!(
            "access denied for {} on {}",
            auth.claims.username, req.database_name
        );
        return Err(ApiError::forbidden("access denied"));
    }

    let session = state
        .sessions
        .start_session(&auth.token, &auth.claims, &req.database_name)
        .await?;

    info!(
        "proxy session started for {} on {} at port {}",
        auth.claims.username, req.database_name, session.port
    );

    Ok(Json(ConnectResponse {
        port: session.port,
        database_name: req.database_name,
        message: "Proxy started successfully".to_string(),
        temp_username: session.temp_credentials.username.clone(),
        temp_password: session.temp_credentials.password.clone(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DisconnectRequest {
    pub database_name: String,
}

/// POST /api/disconnect
pub async fn disconnect(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<DisconnectRequest>,
) -> Result<Json<Value>, ApiError> {
    info!(
        "disconnect request from {} for {}",
        auth.claims.username, req.database_name
    );

    state.sessions.stop_session(&auth.token).await?;

    Ok(Json(json!({ "message": "Disconnected successfully" })))
}
