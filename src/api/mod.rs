//! HTTP API server.
//!
//! Thin axum layer over the auth, policy, and session components. Handlers
//! map domain errors to status codes through `ApiError`; bodies are plain
//! JSON shapes with no envelope.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{Authenticator, TokenService};
use crate::config::Config;
use crate::driver::{DriverError, DriverRegistry};
use crate::policy::Engine;
use crate::proxy::SessionManager;
use crate::store::Store;

mod active_logins;
mod connect;
mod databases;
mod login;
mod logout;
mod middleware;
mod refresh;

pub use middleware::AuthContext;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub tokens: Arc<TokenService>,
    pub authenticator: Arc<Authenticator>,
    pub policy: Arc<Engine>,
    pub sessions: Arc<SessionManager>,
}

/// Wires up every component around the store and exposes the router.
pub struct Server {
    state: AppState,
}

impl Server {
    pub async fn new(store: Arc<Store>, config: &Config) -> Result<Self, DriverError> {
        let registry = DriverRegistry::initialize(&store).await?;

        let state = AppState {
            tokens: Arc::new(TokenService::new(&config.jwt_secret)),
            authenticator: Arc::new(Authenticator::new(Arc::clone(&store))),
            policy: Arc::new(Engine::new(Arc::clone(&store))),
            sessions: Arc::new(SessionManager::new(Arc::clone(&store), registry)),
            store,
        };

        Ok(Self { state })
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Session manager handle, for shutdown cleanup.
    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.state.sessions)
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/databases", get(databases::list_databases))
        .route("/api/connect", post(connect::connect))
        .route("/api/disconnect", post(connect::disconnect))
        .route("/api/active-logins", get(active_logins::list_active_logins))
        .route(
            "/api/active-logins/:id",
            delete(active_logins::revoke_active_login),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/api/login", post(login::login))
        .route("/api/refresh", post(refresh::refresh))
        .route("/api/logout", post(logout::logout))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}
