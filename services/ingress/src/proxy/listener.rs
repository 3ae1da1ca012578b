//! Accept loop and per-connection sessions.
//!
//! This module accepts connections, reads the client handshake to learn the
//! requested hostname, routes it, and relays the connection to the backend:
//! - One task per connection, no connection cap
//! - Handshake bytes are replayed to the backend unmodified
//! - Connection-level routing on the handshake's server address
//! - Every failure is scoped to its own session

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mcrelay_protocol::{read_handshake, HandshakeError};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};

use super::peek::PeekableStream;
use super::relay::{relay, DialError, DEFAULT_CONNECT_TIMEOUT};
use super::router::{RouteTable, RoutingDecision};

/// Default time a client has to send its handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bind address and per-session deadlines.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Listening socket address.
    pub bind_addr: SocketAddr,
    /// Deadline for reading the handshake.
    pub handshake_timeout: Duration,
    /// Deadline for connecting to the backend.
    pub connect_timeout: Duration,
}

impl ListenerConfig {
    /// Default deadlines on `bind_addr`.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Why a session ended without relaying.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("handshake: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("handshake not received within {0:?}")]
    HandshakeTimeout(Duration),

    #[error(transparent)]
    Dial(#[from] DialError),
}

/// Session counters, shared with every connection task.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Accepted sockets.
    pub connections_accepted: AtomicU64,
    /// Sessions still running.
    pub connections_active: AtomicU64,
    /// Sessions that have ended, for any reason.
    pub connections_closed: AtomicU64,
    /// Handshake failures (timeout, malformed, not a handshake, disconnect).
    pub handshake_failed: AtomicU64,
    /// Hostnames with their own route.
    pub routes_matched: AtomicU64,
    /// Hostnames sent to the default backend.
    pub routes_defaulted: AtomicU64,
    /// Backend connection failures.
    pub backend_failed: AtomicU64,
    /// Client bytes relayed, handshake included.
    pub bytes_to_backend: AtomicU64,
    /// Backend bytes relayed.
    pub bytes_from_backend: AtomicU64,
}

/// A TCP listener routing on the handshake hostname.
pub struct Listener {
    config: ListenerConfig,
    listener: TcpListener,
    /// Swapped on reload; read once per session.
    route_table: Arc<RouteTable>,
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind the listening socket.
    pub async fn bind(config: ListenerConfig, route_table: Arc<RouteTable>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(bind_addr = %local_addr, "Listener bound");

        Ok(Self {
            listener,
            config,
            route_table,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Actual bound address (resolves port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Live counters.
    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Run the listener, accepting and handling connections.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .connections_active
                        .fetch_add(1, Ordering::Relaxed);

                    let listener = Arc::clone(&self);
                    let stats = Arc::clone(&self.stats);

                    tokio::spawn(
                        async move {
                            if let Err(e) = listener.handle_connection(stream).await {
                                listener.log_session_error(&e);
                            }

                            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                        }
                        .instrument(tracing::info_span!("connection", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    // Back off; accept errors such as EMFILE tend to repeat.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Handle a single connection: handshake, route, relay.
    ///
    /// The client stream is owned here and dropped on every return path.
    async fn handle_connection(&self, client: TcpStream) -> Result<(), SessionError> {
        if let Err(e) = client.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY on client");
        }

        let mut client = PeekableStream::new(client);

        let handshake = match timeout(
            self.config.handshake_timeout,
            read_handshake(&mut client.inspector()),
        )
        .await
        {
            Ok(Ok(handshake)) => handshake,
            Ok(Err(e)) => {
                self.stats.handshake_failed.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
            Err(_) => {
                self.stats.handshake_failed.fetch_add(1, Ordering::Relaxed);
                return Err(SessionError::HandshakeTimeout(self.config.handshake_timeout));
            }
        };

        debug!(
            hostname = %handshake.server_address,
            protocol_version = handshake.protocol_version,
            buffered = client.buffered().len(),
            "Handshake parsed"
        );

        // One snapshot per session; later reloads do not affect it.
        let routes = self.route_table.snapshot();
        let decision = routes.route(&handshake.server_address);

        match decision {
            RoutingDecision::Matched { backend } => {
                self.stats.routes_matched.fetch_add(1, Ordering::Relaxed);
                info!(hostname = %handshake.server_address, backend = %backend, "Route matched");
            }
            RoutingDecision::Default { backend } => {
                self.stats.routes_defaulted.fetch_add(1, Ordering::Relaxed);
                info!(hostname = %handshake.server_address, backend = %backend, "Using default backend");
            }
        }

        let backend = decision.backend();
        let stats = match relay(client, backend, self.config.connect_timeout).await {
            Ok(stats) => stats,
            Err(e) => {
                self.stats.backend_failed.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        self.stats
            .bytes_to_backend
            .fetch_add(stats.bytes_to_backend, Ordering::Relaxed);
        self.stats
            .bytes_from_backend
            .fetch_add(stats.bytes_from_backend, Ordering::Relaxed);

        info!(
            hostname = %handshake.server_address,
            backend = %backend,
            bytes_to_backend = stats.bytes_to_backend,
            bytes_from_backend = stats.bytes_from_backend,
            "Connection closed"
        );

        Ok(())
    }

    fn log_session_error(&self, err: &SessionError) {
        match err {
            SessionError::Handshake(HandshakeError::UnexpectedPacketType(_)) => {
                info!(error = %err, "Rejected non-handshake connection")
            }
            SessionError::Handshake(e) => {
                debug!(error = %err, reason = e.reason_code(), "Handshake failed")
            }
            SessionError::HandshakeTimeout(_) => debug!(error = %err, "Handshake timed out"),
            SessionError::Dial(_) => warn!(error = %err, "Backend connection failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_config_default() {
        let config = ListenerConfig::new("0.0.0.0:25570".parse().unwrap());
        assert_eq!(config.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::HandshakeTimeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "handshake not received within 10s");

        let err = SessionError::from(HandshakeError::UnexpectedPacketType(0x7A));
        assert_eq!(err.to_string(), "handshake: not a handshake packet, id: 0x7A");
    }

    #[tokio::test]
    async fn test_listener_stats() {
        let stats = ListenerStats::default();
        stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
    }
}
