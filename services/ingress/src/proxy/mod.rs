//! Handshake-routed L4 TCP proxy.
//!
//! This module provides:
//! - TCP listener management
//! - Handshake inspection with byte-exact replay
//! - Hostname routing against an atomically swapped snapshot
//! - Full-duplex relaying with half-close propagation
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> PeekableStream -> Handshake -> Router -> Relay -> Backend
//!                            |                                    ^
//!                            +------ replayed handshake bytes ----+
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use proxy::{Listener, ListenerConfig, RouteSnapshot, RouteTable};
//!
//! let route_table = Arc::new(RouteTable::new(RouteSnapshot::default_only("127.0.0.1:25565")));
//!
//! let config = ListenerConfig::new("0.0.0.0:25570".parse()?);
//! let listener = Arc::new(Listener::bind(config, route_table).await?);
//! listener.run().await?;
//! ```

mod listener;
mod peek;
mod relay;
mod router;

pub use listener::{Listener, ListenerConfig, ListenerStats, SessionError};
pub use peek::{Inspector, PeekableStream};
pub use relay::{
    connect_backend, is_connection_closed, relay, relay_streams, DialError, Direction,
    RelayStats,
};
pub use router::{resolve, RouteSnapshot, RouteTable, RoutingDecision, SharedRouteTable};
