use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;

use zgate::api::Server;
use zgate::config::Config;
use zgate::store::{Database, Permission, Role, Store};

pub const TEST_KEY: [u8; 32] = [42u8; 32];

/// An in-process API server over a fresh temp store, reachable via HTTP on
/// an ephemeral port.
pub struct TestServer {
    pub base_url: String,
    pub store: Arc<Store>,
    pub client: reqwest::Client,
    _dir: tempfile::TempDir,
}

impl TestServer {
    pub async fn spawn() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let store_path = dir.path().join("zgate.db");
        let store = Arc::new(Store::open(&store_path, TEST_KEY).await?);
        seed(&store).await?;

        let config = Config {
            api_addr: ":0".into(),
            store_path,
            store_key: TEST_KEY,
            jwt_secret: "integration-test-secret".into(),
        };
        let server = Server::new(Arc::clone(&store), &config).await?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = server
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test server");
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            store,
            client: reqwest::Client::new(),
            _dir: dir,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Logs in and returns the token response body.
    pub async fn login(&self, username: &str, password: &str) -> Result<Value> {
        let response = self
            .client
            .post(self.url("/api/login"))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;
        anyhow::ensure!(
            response.status().is_success(),
            "login failed: {}",
            response.status()
        );
        Ok(response.json().await?)
    }

    pub async fn login_tokens(&self, username: &str, password: &str) -> Result<(String, String)> {
        let body = self.login(username, password).await?;
        Ok((
            body["access_token"].as_str().unwrap().to_string(),
            body["refresh_token"].as_str().unwrap().to_string(),
        ))
    }
}

/// Two databases, one role, two users: alice holds `reader` on salesdb,
/// bob has nothing. Backend addresses point at a free port nothing listens
/// on, so driver construction fails fast when a test drives that far.
async fn seed(store: &Store) -> Result<()> {
    let dead_port = portpicker::pick_unused_port().expect("no free port");
    for (name, description) in [("salesdb", "sales reporting"), ("hrdb", "hr records")] {
        store
            .save_database(&Database {
                name: name.into(),
                db_type: "mysql".into(),
                description: description.into(),
                backend_addr: format!("127.0.0.1:{dead_port}"),
                admin_username: "root".into(),
                admin_password: "admin-pw".into(),
                available_permissions: vec!["read".into(), "write".into(), "admin".into()],
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await?;
    }

    store
        .save_role(&Role {
            name: "reader".into(),
            description: "read access to sales".into(),
            permissions: vec![Permission {
                database: "salesdb".into(),
                level: "read".into(),
            }],
        })
        .await?;

    store
        .create_user_with_password("alice@ex.com", "correct-horse", vec!["reader".into()], vec![])
        .await?;
    store
        .create_user_with_password("bob@ex.com", "battery-staple", vec![], vec![])
        .await?;

    Ok(())
}
