//! mcrelay ingress
//!
//! L4 proxy that routes on the hostname in a game client's handshake.
//!
//! This service:
//! - Loads hostname routes from a YAML file (written with defaults if missing)
//! - Accepts TCP connections on a single port
//! - Reads the handshake frame to find the requested server address
//! - Relays the connection, handshake included, to the matching backend
//! - Reloads the routes file without dropping established connections

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcrelay_ingress::{Config, Listener, ListenerConfig, RouteReloader, RouteTable, RoutesFile};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to MCRELAY_LOG_LEVEL)
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting mcrelay ingress");

    let routes = RoutesFile::load_or_create(&config.routes_file)?;
    info!(
        routes_file = %config.routes_file.display(),
        listen_port = routes.listen_port,
        default_target = %routes.default_target,
        route_count = routes.routes.len(),
        handshake_timeout_ms = config.handshake_timeout.as_millis() as u64,
        connect_timeout_ms = config.connect_timeout.as_millis() as u64,
        "Configuration loaded"
    );

    let route_table = Arc::new(RouteTable::new(routes.to_snapshot()));

    let mut listener_config =
        ListenerConfig::new(SocketAddr::new(config.bind_host, routes.listen_port));
    listener_config.handshake_timeout = config.handshake_timeout;
    listener_config.connect_timeout = config.connect_timeout;

    let listener = Listener::bind(listener_config.clone(), Arc::clone(&route_table))
        .await
        .with_context(|| format!("Failed to bind listener on {}", listener_config.bind_addr))?;
    let listener = Arc::new(listener);

    // Start routes file watcher
    let mut reloader = RouteReloader::new(
        config.routes_file.clone(),
        Arc::clone(&route_table),
        routes.listen_port,
    );
    reloader.prime().await;
    let reload_interval = config.reload_interval;
    tokio::spawn(reloader.run(reload_interval));

    tokio::select! {
        result = listener.run() => {
            if let Err(e) = &result {
                error!(error = %e, "Listener error");
            }
            result.context("Listener stopped")
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
            Ok(())
        }
    }
}
