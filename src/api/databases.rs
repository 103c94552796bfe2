use axum::extract::State;
use axum::{Extension, Json};
use tracing::info;

use crate::error::ApiError;
use crate::policy::DatabaseInfo;

use super::{AppState, AuthContext};

/// GET /api/databases
pub async fn list_databases(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<DatabaseInfo>>, ApiError> {
    let databases = state.policy.allowed_databases(&auth.claims.username).await;
    info!(
        "listed {} databases for {}",
        databases.len(),
        auth.claims.username
    );
    Ok(Json(databases))
}
