pub mod config;
pub mod proxy;
pub mod reload;

pub use config::{Config, RoutesFile};
pub use proxy::{
    Listener, ListenerConfig, ListenerStats, PeekableStream, RelayStats, RouteSnapshot,
    RouteTable, RoutingDecision, SessionError, SharedRouteTable,
};
pub use reload::{ReloadOutcome, RouteReloader};
