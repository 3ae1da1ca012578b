//! Backend dialing and the bidirectional byte relay.
//!
//! Each session runs two copy loops, client to backend and backend to client,
//! joined so the session ends only when both have finished. When a loop's source
//! hits EOF (or fails) it shuts down the write side of its destination, so the
//! peer on that leg sees a clean end of input while the other direction keeps
//! draining.
//!
//! ```text
//! Dialing -> Failed
//!         -> Relaying -> (client->backend done, backend->client done) -> Closed
//! ```

use std::fmt;
use std::io;
use std::time::Duration;

pub use mcrelay_protocol::is_connection_closed;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default connect timeout for backend connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Copy buffer size per direction.
pub const COPY_BUFFER_SIZE: usize = 8192;

/// Backend dial failures.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("connecting to backend {backend}: {source}")]
    Connect {
        backend: String,
        #[source]
        source: io::Error,
    },

    #[error("connecting to backend {backend}: timed out after {timeout:?}")]
    Timeout { backend: String, timeout: Duration },
}

/// Byte counts for one finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_to_backend: u64,
    pub bytes_from_backend: u64,
}

/// One of the two copy directions of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client->backend"),
            Direction::BackendToClient => f.write_str("backend->client"),
        }
    }
}

/// Connect to a `host:port` backend within `connect_timeout`.
pub async fn connect_backend(
    backend: &str,
    connect_timeout: Duration,
) -> Result<TcpStream, DialError> {
    debug!(backend = %backend, "Connecting to backend");

    let stream = match timeout(connect_timeout, TcpStream::connect(backend)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(DialError::Connect {
                backend: backend.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(DialError::Timeout {
                backend: backend.to_string(),
                timeout: connect_timeout,
            })
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!(backend = %backend, error = %e, "Failed to set TCP_NODELAY on backend");
    }

    Ok(stream)
}

/// Dial `backend` and relay `client` to it until both directions finish.
///
/// On dial failure nothing is written to the client; dropping it closes the
/// connection.
pub async fn relay<S>(
    client: S,
    backend: &str,
    connect_timeout: Duration,
) -> Result<RelayStats, DialError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let backend_stream = connect_backend(backend, connect_timeout).await?;
    debug!(backend = %backend, "Connected to backend");

    Ok(relay_streams(client, backend_stream).await)
}

/// Relay bytes between two already-open streams.
///
/// Both streams are dropped (and so closed) only after both directions end.
/// A direction ends only on EOF or an error from its own source; a quiet
/// direction never cuts off a busy one.
pub async fn relay_streams<A, B>(client: A, backend: B) -> RelayStats
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (backend_read, backend_write) = tokio::io::split(backend);

    let (bytes_to_backend, bytes_from_backend) = tokio::join!(
        copy_direction(client_read, backend_write, Direction::ClientToBackend),
        copy_direction(backend_read, client_write, Direction::BackendToClient),
    );

    RelayStats {
        bytes_to_backend,
        bytes_from_backend,
    }
}

/// Copy `reader` into `writer` until EOF or error, then half-close `writer`.
///
/// Returns the number of bytes written.
async fn copy_direction<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    let outcome: io::Result<()> = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    break Err(e);
                }
                total += n as u64;
            }
            Err(e) => break Err(e),
        }
    };

    match outcome {
        Ok(()) => debug!(direction = %direction, bytes = total, "Source reached EOF"),
        Err(e) if is_connection_closed(&e) => {
            debug!(direction = %direction, bytes = total, error = %e, "Connection closed")
        }
        Err(e) => warn!(direction = %direction, bytes = total, error = %e, "Relay copy failed"),
    }

    // Half-close so the destination's peer sees end of input.
    if let Err(e) = writer.shutdown().await {
        if !is_connection_closed(&e) {
            debug!(direction = %direction, error = %e, "Half-close failed");
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_relay_streams_both_directions() {
        let (mut client, client_side) = duplex(1024);
        let (backend_side, mut backend) = duplex(1024);

        let session = tokio::spawn(relay_streams(client_side, backend_side));

        client.write_all(b"hello backend").await.unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        backend.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello backend");

        // Backend still able to answer after the client's half-close.
        backend.write_all(b"hello client").await.unwrap();
        backend.shutdown().await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"hello client");

        let stats = session.await.unwrap();
        assert_eq!(
            stats,
            RelayStats {
                bytes_to_backend: 13,
                bytes_from_backend: 12,
            }
        );
    }

    #[tokio::test]
    async fn test_session_waits_for_both_directions() {
        let (mut client, client_side) = duplex(64);
        let (backend_side, mut backend) = duplex(64);

        let session = tokio::spawn(relay_streams(client_side, backend_side));

        client.shutdown().await.unwrap();
        let mut received = Vec::new();
        backend.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());

        tokio::task::yield_now().await;
        assert!(!session.is_finished());

        drop(backend);
        let stats = session.await.unwrap();
        assert_eq!(stats, RelayStats::default());
    }

    #[tokio::test]
    async fn test_large_transfer_is_exact() {
        let (mut client, client_side) = duplex(4096);
        let (backend_side, mut backend) = duplex(4096);

        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let session = tokio::spawn(relay_streams(client_side, backend_side));

        let to_send = payload.clone();
        let writer = tokio::spawn(async move {
            client.write_all(&to_send).await.unwrap();
            client.shutdown().await.unwrap();
            client
        });

        let mut received = Vec::new();
        backend.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), payload.len());
        assert_eq!(received, payload);

        drop(backend);
        drop(writer.await.unwrap());
        let stats = session.await.unwrap();
        assert_eq!(stats.bytes_to_backend, payload.len() as u64);
    }

    #[tokio::test]
    async fn test_one_way_stream_keeps_quiet_direction_open() {
        let (mut client, client_side) = duplex(1024);
        let (backend_side, mut backend) = duplex(1024);

        let session = tokio::spawn(relay_streams(client_side, backend_side));

        // Backend streams for a while; the client only listens.
        for _ in 0..20 {
            backend.write_all(b"tick").await.unwrap();
            let mut tick = [0u8; 4];
            client.read_exact(&mut tick).await.unwrap();
            assert_eq!(&tick, b"tick");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // The client never closed, so the backend must not see EOF.
        let mut buf = [0u8; 1];
        let pending = timeout(Duration::from_millis(50), backend.read(&mut buf)).await;
        assert!(pending.is_err(), "backend saw {pending:?} from a silent client");
        assert!(!session.is_finished());

        client.write_all(b"late").await.unwrap();
        client.shutdown().await.unwrap();
        let mut rest = Vec::new();
        backend.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"late");

        drop(backend);
        let stats = session.await.unwrap();
        assert_eq!(stats.bytes_from_backend, 80);
        assert_eq!(stats.bytes_to_backend, 4);
    }

    #[tokio::test]
    async fn test_dial_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (_client, client_side) = duplex(64);
        let err = relay(
            client_side,
            &addr.to_string(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        match err {
            DialError::Connect { backend, .. } => assert_eq!(backend, addr.to_string()),
            other => panic!("Expected Connect, got {:?}", other),
        }
    }
}
