use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::driver::Driver;
use crate::store::Database;

use super::forward::forward;

/// Accept loop for one session's dynamic port.
///
/// Each accepted client gets its own dispatch task: dial the backend through
/// the driver, then run the forwarder. When the session's cancellation
/// signal fires the loop stops accepting and waits for every in-flight
/// dispatch to finish before returning; shutdown never orphans a forwarder.
pub struct SessionListener {
    database_name: String,
    backend_addr: String,
    driver: Arc<dyn Driver>,
}

impl SessionListener {
    pub fn new(database: &Database, driver: Arc<dyn Driver>) -> Self {
        Self {
            database_name: database.name.clone(),
            backend_addr: database.backend_addr.clone(),
            driver,
        }
    }

    pub async fn run(self, listener: TcpListener, cancel: CancellationToken) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((client, peer)) => {
                            info!(
                                "connection accepted for {} from {}",
                                self.database_name, peer
                            );
                            let database_name = self.database_name.clone();
                            let backend_addr = self.backend_addr.clone();
                            let driver = Arc::clone(&self.driver);
                            let cancel = cancel.clone();
                            connections.spawn(dispatch(
                                database_name,
                                backend_addr,
                                driver,
                                client,
                                cancel,
                            ));
                        }
                        // Accept errors are transient; only cancellation
                        // ends the loop.
                        Err(e) => {
                            error!(
                                "failed to accept connection for {}: {}",
                                self.database_name, e
                            );
                        }
                    }
                }
            }
        }

        // Close the socket so no late client gets through, then drain.
        drop(listener);
        info!(
            "listener closed for {}, waiting for connections to finish",
            self.database_name
        );
        while connections.join_next().await.is_some() {}
        info!("all connections finished for {}", self.database_name);
    }
}

async fn dispatch(
    database_name: String,
    backend_addr: String,
    driver: Arc<dyn Driver>,
    client: TcpStream,
    cancel: CancellationToken,
) {
    let backend = match driver.connect_tcp(&backend_addr, &cancel).await {
        Ok(backend) => backend,
        Err(e) => {
            error!(
                "failed to connect to backend {} for {}: {}",
                backend_addr, database_name, e
            );
            return;
        }
    };

    info!(
        "backend connection established for {} at {}",
        database_name, backend_addr
    );

    let (to_backend, to_client) = forward(client, backend).await;
    info!(
        "connection closed for {} ({} bytes up, {} bytes down)",
        database_name, to_backend, to_client
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::driver::{DriverError, Vendor};

    use super::*;

    struct StubDriver;

    #[async_trait]
    impl Driver for StubDriver {
        async fn connect_tcp(
            &self,
            addr: &str,
            cancel: &CancellationToken,
        ) -> Result<TcpStream, DriverError> {
            crate::driver::dial(addr, cancel).await
        }

        async fn create_temp_user(
            &self,
            _username: &str,
            _password: &str,
            _levels: &[String],
        ) -> Result<(), DriverError> {
            Ok(())
        }

        async fn drop_temp_user(&self, _username: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn sweep_temp_users(&self) -> Result<u32, DriverError> {
            Ok(0)
        }

        async fn close(&self) {}

        fn vendor(&self) -> Vendor {
            Vendor::Mysql
        }
    }

    /// An echo server standing in for the backend database.
    async fn spawn_echo_backend() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if socket.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });
        addr
    }

    fn database(backend_addr: String) -> Database {
        Database {
            name: "salesdb".into(),
            db_type: "mysql".into(),
            description: String::new(),
            backend_addr,
            admin_username: "root".into(),
            admin_password: "pw".into(),
            available_permissions: vec!["read".into()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn forwards_client_traffic_to_backend() {
        let backend_addr = spawn_echo_backend().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let cancel = CancellationToken::new();
        let session = SessionListener::new(
            &database(backend_addr.to_string()),
            Arc::new(StubDriver),
        );
        let task = tokio::spawn(session.run(listener, cancel.clone()));

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(client);
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("listener drained")
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_waits_for_inflight_then_refuses_new_connects() {
        let backend_addr = spawn_echo_backend().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let cancel = CancellationToken::new();
        let session = SessionListener::new(
            &database(backend_addr.to_string()),
            Arc::new(StubDriver),
        );
        let task = tokio::spawn(session.run(listener, cancel.clone()));

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client.write_all(b"in-flight").await.unwrap();
        let mut buf = [0u8; 9];
        client.read_exact(&mut buf).await.unwrap();

        cancel.cancel();

        // The established forwarder still works until the client hangs up.
        client.write_all(b"late-data").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"late-data");
        drop(client);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("listener drained")
            .unwrap();

        // The port no longer accepts connections once the drain is done.
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_backend_drops_client_but_keeps_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // A bound-then-dropped port: connecting to it fails fast.
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let cancel = CancellationToken::new();
        let session =
            SessionListener::new(&database(dead_addr.to_string()), Arc::new(StubDriver));
        let task = tokio::spawn(session.run(listener, cancel.clone()));

        // First client fails to reach a backend; the listener survives.
        let mut first = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(first.read(&mut buf).await.unwrap(), 0);

        // A second client can still connect to the listener itself.
        let _second = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("listener drained")
            .unwrap();
    }
}
