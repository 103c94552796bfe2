use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::auth::Claims;
use crate::error::ApiError;

use super::AppState;

/// Authenticated request context injected by the middleware. Handlers keep
/// the raw token because it keys the session registry.
#[derive(Clone)]
pub struct AuthContext {
    pub claims: Claims,
    pub token: String,
}

/// Validates the bearer token and injects [`AuthContext`] into the request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer(&headers).map_err(|msg| {
        warn!("{}", msg);
        ApiError::unauthorized(msg)
    })?;

    let claims = state.tokens.validate(&token).map_err(|e| {
        warn!("invalid token: {}", e);
        ApiError::unauthorized("invalid token")
    })?;

    request.extensions_mut().insert(AuthContext { claims, token });
    Ok(next.run(request).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<String, &'static str> {
    let header = headers
        .get("authorization")
        .ok_or("missing authorization header")?;
    let value = header
        .to_str()
        .map_err(|_| "invalid authorization header")?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or("authorization header must use Bearer token format")?;
    if token.trim().is_empty() {
        return Err("empty bearer token");
    }
    Ok(token.to_string())
}

/// Client IP for audit columns: proxy headers first, socket address last.
pub(super) fn client_ip(headers: &HeaderMap, fallback: std::net::SocketAddr) -> String {
    for name in ["x-forwarded-for", "x-real-ip"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }
    fallback.to_string()
}

pub(super) fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
