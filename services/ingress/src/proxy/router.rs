//! Route table and routing decisions.
//!
//! Maps the hostname from a client handshake to a backend address:
//! - Exact, case-sensitive hostname match (no wildcards, no normalization)
//! - Every miss goes to the default backend
//! - Config updates are applied atomically as a whole new snapshot
//! - Reloads never affect sessions that already picked a backend

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

/// Resolve `hostname` against `routes`, falling back to `default_backend`.
pub fn resolve<'a>(
    hostname: &str,
    routes: &'a HashMap<String, String>,
    default_backend: &'a str,
) -> &'a str {
    routes
        .get(hostname)
        .map(String::as_str)
        .unwrap_or(default_backend)
}

/// Result of a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision<'a> {
    /// The hostname has its own route.
    Matched { backend: &'a str },
    /// No route for the hostname; using the default backend.
    Default { backend: &'a str },
}

impl<'a> RoutingDecision<'a> {
    /// The backend address to dial.
    pub fn backend(&self) -> &'a str {
        match self {
            RoutingDecision::Matched { backend } | RoutingDecision::Default { backend } => *backend,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, RoutingDecision::Default { .. })
    }
}

/// Immutable routing state: hostname routes plus the default backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSnapshot {
    routes: HashMap<String, String>,
    default_backend: String,
}

impl RouteSnapshot {
    /// Create a snapshot from a route map and a default backend.
    pub fn new(routes: HashMap<String, String>, default_backend: impl Into<String>) -> Self {
        Self {
            routes,
            default_backend: default_backend.into(),
        }
    }

    /// A snapshot with no routes; everything goes to `default_backend`.
    pub fn default_only(default_backend: impl Into<String>) -> Self {
        Self::new(HashMap::new(), default_backend)
    }

    /// Make a routing decision for a hostname.
    pub fn route(&self, hostname: &str) -> RoutingDecision<'_> {
        match self.routes.get(hostname) {
            Some(backend) => RoutingDecision::Matched { backend },
            None => RoutingDecision::Default {
                backend: &self.default_backend,
            },
        }
    }

    /// The backend address for a hostname.
    pub fn resolve(&self, hostname: &str) -> &str {
        resolve(hostname, &self.routes, &self.default_backend)
    }

    /// Backend for hostnames without a route.
    pub fn default_backend(&self) -> &str {
        &self.default_backend
    }

    /// Number of hostname routes, not counting the default.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True when every hostname goes to the default backend.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Route table holding the current snapshot.
///
/// Uses ArcSwap for lock-free atomic config updates.
/// Readers get consistent snapshots without blocking.
/// Writers atomically swap in new snapshots.
pub struct RouteTable {
    snapshot: ArcSwap<RouteSnapshot>,
}

impl RouteTable {
    /// Create a route table starting from `initial`.
    pub fn new(initial: RouteSnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(initial),
        }
    }

    /// Current snapshot. Holding it pins that version for the caller.
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.snapshot.load_full()
    }

    /// Replace the whole table in a single pointer swap.
    ///
    /// Existing readers keep the old snapshot until they drop it.
    pub fn update(&self, snapshot: RouteSnapshot) {
        let route_count = snapshot.len();
        let default_backend = snapshot.default_backend().to_string();

        self.snapshot.store(Arc::new(snapshot));

        info!(
            route_count = route_count,
            default_backend = %default_backend,
            "Route table updated atomically"
        );
    }
}

/// Shared route table reference.
pub type SharedRouteTable = Arc<RouteTable>;
