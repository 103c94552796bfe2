//! Session lifecycle engine.
//!
//! A session binds one access token to one provisioned temp account and one
//! dynamic TCP listener. The manager owns the registry and guarantees that
//! every exit path (normal stop, provisioning failure, port-allocation
//! failure, process shutdown) tears down both the backend account and the
//! listener.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth::Claims;
use crate::driver::{
    generate_temp_password, generate_temp_username, username_base, Driver, DriverRegistry,
    TempCredentials,
};
use crate::store::{Store, StoreError};

mod forward;
mod listener;

pub use forward::forward;
pub use listener::SessionListener;

const PORT_BIND_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    #[error("session not found")]
    SessionNotFound,

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("failed to provision temp user: {0}")]
    ProvisionFailed(String),

    #[error("failed to allocate listener port: {0}")]
    PortAllocation(std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One live session. The driver is shared with the listener task, which
/// drops its reference last when the drain finishes.
pub struct Session {
    pub username: String,
    pub database_name: String,
    pub port: u16,
    pub temp_credentials: TempCredentials,
    pub claims: Claims,
    driver: Arc<dyn Driver>,
    cancel: CancellationToken,
}

/// Registry of live sessions keyed by access-token string.
///
/// The map mutex is held for the whole of `start_session` and
/// `stop_session`, serializing concurrent starts on the same token and
/// keeping registration atomic with the listener spawn.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    store: Arc<Store>,
    registry: DriverRegistry,
}

impl SessionManager {
    pub fn new(store: Arc<Store>, registry: DriverRegistry) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            store,
            registry,
        }
    }

    /// Starts (or returns the existing) session for `token`.
    ///
    /// Authorization is the API layer's contract: callers gate access via
    /// the policy engine before calling this. A caller with no permission
    /// rows for the database would get an account with no grants.
    pub async fn start_session(
        &self,
        token: &str,
        claims: &Claims,
        database_name: &str,
    ) -> Result<Arc<Session>, SessionError> {
        let mut sessions = self.sessions.lock().await;

        if let Some(existing) = sessions.get(token) {
            return Ok(Arc::clone(existing));
        }

        let database = self
            .store
            .get_database(database_name)
            .await
            .map_err(|_| SessionError::DatabaseNotFound(database_name.to_string()))?;

        let vendor = self
            .registry
            .vendor_for(&database.db_type)
            .await
            .map_err(|e| SessionError::BackendUnavailable(e.to_string()))?;
        let driver = vendor
            .connect(&database)
            .await
            .map_err(|e| SessionError::BackendUnavailable(e.to_string()))?;

        let temp_credentials = TempCredentials {
            username: generate_temp_username(username_base(&claims.username)),
            password: generate_temp_password(),
        };
        info!(
            "generated temp credentials for {} on {}: {}",
            claims.username, database_name, temp_credentials.username
        );

        let levels = match self.levels_for(&claims.username, database_name).await {
            Ok(levels) => levels,
            Err(e) => {
                driver.close().await;
                return Err(e);
            }
        };

        if let Err(e) = driver
            .create_temp_user(&temp_credentials.username, &temp_credentials.password, &levels)
            .await
        {
            // Drop whatever half-created account exists before surfacing.
            if let Err(drop_err) = driver.drop_temp_user(&temp_credentials.username).await {
                warn!(
                    "cleanup of partial account {} failed: {}",
                    temp_credentials.username, drop_err
                );
            }
            driver.close().await;
            return Err(SessionError::ProvisionFailed(e.to_string()));
        }

        let tcp_listener = match bind_session_listener().await {
            Ok(listener) => listener,
            Err(e) => {
                if let Err(drop_err) = driver.drop_temp_user(&temp_credentials.username).await {
                    warn!(
                        "cleanup of account {} failed: {}",
                        temp_credentials.username, drop_err
                    );
                }
                driver.close().await;
                return Err(SessionError::PortAllocation(e));
            }
        };
        let port = tcp_listener
            .local_addr()
            .map_err(SessionError::PortAllocation)?
            .port();

        let cancel = CancellationToken::new();
        let session = Arc::new(Session {
            username: claims.username.clone(),
            database_name: database_name.to_string(),
            port,
            temp_credentials,
            claims: claims.clone(),
            driver: Arc::clone(&driver),
            cancel: cancel.clone(),
        });

        tokio::spawn(
            SessionListener::new(&database, driver).run(tcp_listener, cancel),
        );

        sessions.insert(token.to_string(), Arc::clone(&session));
        info!(
            "session started for {} on {} at port {} as {}",
            session.username, session.database_name, session.port,
            session.temp_credentials.username
        );

        Ok(session)
    }

    /// Stops the session for `token`: drops the temp account (best effort),
    /// releases the driver, cancels the listener, and removes the entry.
    pub async fn stop_session(&self, token: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .remove(token)
            .ok_or(SessionError::SessionNotFound)?;
        teardown(&session).await;
        Ok(())
    }

    /// Stops every session. Used during graceful shutdown so temp accounts
    /// do not outlive the process.
    pub async fn stop_all(&self) {
        let mut sessions = self.sessions.lock().await;
        for (_, session) in sessions.drain() {
            teardown(&session).await;
        }
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// All permission levels the user holds for this database, role grants
    /// first then custom grants, read fresh from the store.
    async fn levels_for(
        &self,
        username: &str,
        database_name: &str,
    ) -> Result<Vec<String>, SessionError> {
        let user = self.store.get_user(username).await?;
        let mut permissions = self.store.permissions_for_roles(&user.roles).await?;
        permissions.extend(user.custom_permissions);

        Ok(permissions
            .into_iter()
            .filter(|p| p.database == database_name)
            .map(|p| p.level)
            .collect())
    }
}

async fn teardown(session: &Session) {
    info!(
        "stopping session for {} on {} ({})",
        session.username, session.database_name, session.temp_credentials.username
    );

    if let Err(e) = session
        .driver
        .drop_temp_user(&session.temp_credentials.username)
        .await
    {
        error!(
            "failed to drop temp user {}: {}",
            session.temp_credentials.username, e
        );
    }
    session.driver.close().await;
    session.cancel.cancel();

    info!(
        "session stopped for {} on {}",
        session.username, session.database_name
    );
}

/// Allocates an ephemeral port via a probe bind, then binds the session
/// listener to it. The port can be reclaimed between probe close and bind,
/// so a lost race is retried, at most three attempts.
async fn bind_session_listener() -> std::io::Result<TcpListener> {
    let mut last_err = None;
    for attempt in 1..=PORT_BIND_ATTEMPTS {
        let port = {
            let probe = TcpListener::bind("0.0.0.0:0").await?;
            probe.local_addr()?.port()
        };
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                warn!(
                    "port {} reclaimed before listener start (attempt {}): {}",
                    port, attempt, e
                );
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("at least one bind attempt"))
}
