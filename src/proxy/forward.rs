use tokio::io::{self, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Pumps bytes between `client` and `backend` until both directions finish.
///
/// The two copy loops run concurrently and are independent: one side hitting
/// EOF half-closes the peer's write side and the other direction keeps
/// running, because database clients routinely half-close. Errors count as
/// end-of-stream for their direction only. Both sockets are consumed and
/// closed when the call returns.
pub async fn forward(client: TcpStream, backend: TcpStream) -> (u64, u64) {
    let (mut client_read, mut client_write) = client.into_split();
    let (mut backend_read, mut backend_write) = backend.into_split();

    let client_to_backend = async {
        let copied = match io::copy(&mut client_read, &mut backend_write).await {
            Ok(n) => n,
            Err(e) => {
                debug!("client to backend copy ended: {}", e);
                0
            }
        };
        let _ = backend_write.shutdown().await;
        copied
    };

    let backend_to_client = async {
        let copied = match io::copy(&mut backend_read, &mut client_write).await {
            Ok(n) => n,
            Err(e) => {
                debug!("backend to client copy ended: {}", e);
                0
            }
        };
        let _ = client_write.shutdown().await;
        copied
    };

    tokio::join!(client_to_backend, backend_to_client)
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    /// Pairs of connected sockets: (near, far) for both legs.
    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (accepted, _) = listener.accept().await.unwrap();
        (connect.await.unwrap(), accepted)
    }

    #[tokio::test]
    async fn bytes_cross_in_both_directions() {
        let (client_near, client_far) = socket_pair().await;
        let (backend_near, backend_far) = socket_pair().await;

        let pump = tokio::spawn(forward(client_far, backend_near));

        let mut client = client_near;
        let mut backend = backend_far;

        client.write_all(b"SELECT 1").await.unwrap();
        let mut buf = [0u8; 8];
        backend.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"SELECT 1");

        backend.write_all(b"row:1").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"row:1");

        drop(client);
        drop(backend);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn half_close_keeps_other_direction_alive() {
        let (client_near, client_far) = socket_pair().await;
        let (backend_near, backend_far) = socket_pair().await;

        let pump = tokio::spawn(forward(client_far, backend_near));

        let mut client = client_near;
        let mut backend = backend_far;

        // Client finishes sending and half-closes its write side.
        client.write_all(b"done").await.unwrap();
        client.shutdown().await.unwrap();

        let mut buf = [0u8; 4];
        backend.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"done");
        // Backend sees EOF after the forwarded half-close.
        assert_eq!(backend.read(&mut buf).await.unwrap(), 0);

        // The backend-to-client direction still works.
        backend.write_all(b"late").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"late");

        drop(backend);
        let (to_backend, to_client) = pump.await.unwrap();
        assert_eq!(to_backend, 4);
        assert_eq!(to_client, 4);
    }

    #[tokio::test]
    async fn large_payload_round_trips_intact() {
        let (client_near, client_far) = socket_pair().await;
        let (backend_near, backend_far) = socket_pair().await;

        let pump = tokio::spawn(forward(client_far, backend_near));

        let payload: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let mut client = client_near;
        let writer = tokio::spawn(async move {
            client.write_all(&payload).await.unwrap();
            client.shutdown().await.unwrap();
            client
        });

        let mut backend = backend_far;
        let mut received = Vec::new();
        backend.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, expected);

        drop(backend);
        drop(writer.await.unwrap());
        pump.await.unwrap();
    }
}
