use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use zgate::api::Server;
use zgate::config::{bind_addr, Config};
use zgate::driver::Vendor;
use zgate::store::Store;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Parser)]
#[command(name = "zgate", about = "Identity-aware database access gateway")]
struct Args {
    /// Listen address for the API server (overrides ZGATE_PORT)
    #[arg(long)]
    api_addr: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("failed to load .env file: {e}");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = run(args).await {
        tracing::error!("zgate stopped with error: {e:#}");
        std::process::exit(1);
    }
    info!("zgate shut down successfully");
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!("starting zgate platform");

    let config = Config::from_env(args.api_addr)?;

    let store = Arc::new(
        Store::open(&config.store_path, config.store_key)
            .await
            .context("failed to initialize store")?,
    );
    log_store_inventory(&store).await;

    // Reap temp accounts orphaned by a previous crash before any session
    // can mint new ones.
    sweep_orphaned_accounts(&store).await;

    let server = Server::new(Arc::clone(&store), &config)
        .await
        .context("failed to initialize API server")?;
    let sessions = server.sessions();

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    // Background task: purge stale refresh tokens every hour.
    tokio::spawn({
        let store = Arc::clone(&store);
        let shutdown = shutdown.clone();
        async move {
            let mut ticker = tokio::time::interval(TOKEN_CLEANUP_INTERVAL);
            ticker.tick().await;
            info!("token cleanup task started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("token cleanup task stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        match store.cleanup_expired_tokens().await {
                            Ok(removed) => tracing::debug!("expired tokens cleaned up ({removed})"),
                            Err(e) => warn!("failed to cleanup expired tokens: {}", e),
                        }
                    }
                }
            }
        }
    });

    let addr = bind_addr(&config.api_addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("API server listening on {}", addr);

    let app = server
        .router()
        .into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .await
        .context("API server failed")?;

    // Tear down live sessions (drops temp accounts) within the deadline.
    let cleanup = async {
        sessions.stop_all().await;
        store.close().await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, cleanup).await.is_err() {
        warn!("shutdown cleanup exceeded {:?} deadline", SHUTDOWN_TIMEOUT);
    }

    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn log_store_inventory(store: &Store) {
    let databases = store.list_databases().await.map(|d| d.len()).unwrap_or_else(|e| {
        warn!("failed to list databases: {}", e);
        0
    });
    let roles = store.list_roles().await.map(|r| r.len()).unwrap_or_else(|e| {
        warn!("failed to list roles: {}", e);
        0
    });
    let users = store.list_users().await.map(|u| u.len()).unwrap_or_else(|e| {
        warn!("failed to list users: {}", e);
        0
    });
    info!(
        "store ready ({} databases, {} roles, {} users)",
        databases, roles, users
    );
}

/// Drops every `zgate_`-prefixed account on each configured backend. No
/// session exists at startup, so anything carrying the prefix leaked from a
/// crash. Unreachable backends are skipped with a warning.
async fn sweep_orphaned_accounts(store: &Store) {
    let databases = match store.list_databases().await {
        Ok(databases) => databases,
        Err(e) => {
            warn!("orphan sweep skipped, cannot list databases: {}", e);
            return;
        }
    };

    for database in databases {
        let vendor: Vendor = match database.db_type.parse() {
            Ok(vendor) => vendor,
            Err(_) => {
                warn!(
                    "orphan sweep skipped for {}: unsupported type {}",
                    database.name, database.db_type
                );
                continue;
            }
        };

        let driver = match vendor.connect(&database).await {
            Ok(driver) => driver,
            Err(e) => {
                warn!("orphan sweep skipped for {}: {}", database.name, e);
                continue;
            }
        };

        match driver.sweep_temp_users().await {
            Ok(0) => {}
            Ok(dropped) => info!(
                "dropped {} orphaned temp accounts on {}",
                dropped, database.name
            ),
            Err(e) => warn!("orphan sweep failed for {}: {}", database.name, e),
        }
        driver.close().await;
    }
}
