//! Ingress configuration.
//!
//! Two layers:
//! - Process settings from environment variables (timeouts, paths, logging)
//! - A YAML routes file (listen port, default backend, hostname routes) that is
//!   created with defaults when missing and reloaded while running

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::proxy::RouteSnapshot;

/// Default listening port.
pub const DEFAULT_LISTEN_PORT: u16 = 25570;

/// Default backend for hostnames without a route.
pub const DEFAULT_TARGET: &str = "p2.example.com:25569";

/// Routes file location, relative to the working directory.
pub const DEFAULT_ROUTES_FILE: &str = "config/config.yaml";

/// Fallback routes file location, used only if it exists.
pub const FALLBACK_ROUTES_FILE: &str = "config.yaml";

/// Ingress configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the YAML routes file.
    pub routes_file: PathBuf,

    /// Host address to bind the listener to.
    pub bind_host: IpAddr,

    /// Deadline for a client to send its handshake.
    pub handshake_timeout: Duration,

    /// Deadline for connecting to a backend.
    pub connect_timeout: Duration,

    /// How often the routes file is checked for changes.
    pub reload_interval: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let routes_file = match lookup("MCRELAY_CONFIG") {
            Some(path) => PathBuf::from(path),
            None => default_routes_path(),
        };

        let bind_host: IpAddr = lookup("MCRELAY_BIND_HOST")
            .map(|v| v.parse())
            .transpose()
            .context("MCRELAY_BIND_HOST must be an IP address.")?
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));

        let handshake_timeout = millis_var(&lookup, "MCRELAY_HANDSHAKE_TIMEOUT_MS", 10_000, 100)?;
        let connect_timeout = millis_var(&lookup, "MCRELAY_CONNECT_TIMEOUT_MS", 5_000, 100)?;
        let reload_interval = millis_var(&lookup, "MCRELAY_RELOAD_INTERVAL_MS", 2_000, 50)?;

        let log_level = lookup("MCRELAY_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let log_json = lookup("MCRELAY_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Self {
            routes_file,
            bind_host,
            handshake_timeout,
            connect_timeout,
            reload_interval,
            log_level,
            log_json,
        })
    }
}

fn millis_var<F>(lookup: &F, key: &str, default_ms: u64, min_ms: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let ms: u64 = lookup(key)
        .map(|v| v.parse())
        .transpose()
        .with_context(|| format!("{key} must be an integer (milliseconds)."))?
        .unwrap_or(default_ms);

    Ok(Duration::from_millis(ms.max(min_ms)))
}

fn default_routes_path() -> PathBuf {
    let primary = PathBuf::from(DEFAULT_ROUTES_FILE);
    let fallback = PathBuf::from(FALLBACK_ROUTES_FILE);

    if !primary.exists() && fallback.exists() {
        fallback
    } else {
        primary
    }
}

/// Contents of the routes file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutesFile {
    /// TCP port to listen on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Backend for hostnames without a route.
    #[serde(default = "default_target")]
    pub default_target: String,

    /// Exact hostname to `host:port` backend.
    #[serde(default = "default_routes")]
    pub routes: BTreeMap<String, String>,
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_target() -> String {
    DEFAULT_TARGET.to_string()
}

fn default_routes() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("p3.example.com".to_string(), "127.0.0.1:25569".to_string()),
        ("localhost".to_string(), "127.0.0.1:25565".to_string()),
    ])
}

impl Default for RoutesFile {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            default_target: default_target(),
            routes: default_routes(),
        }
    }
}

impl RoutesFile {
    /// Parse and validate routes file contents. An empty file means defaults.
    pub fn parse(contents: &str) -> Result<Self> {
        let file: RoutesFile = if contents.trim().is_empty() {
            RoutesFile::default()
        } else {
            serde_yaml::from_str(contents).context("Invalid routes file YAML")?
        };

        file.validate()?;
        Ok(file)
    }

    /// Load the routes file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read routes file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse routes file: {}", path.display()))
    }

    /// Load the routes file, or write and return the defaults if it is missing.
    ///
    /// Failing to write the default file is logged, not fatal.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let file = Self::load(path)?;
            info!(path = %path.display(), "Using routes file");
            return Ok(file);
        }

        info!(path = %path.display(), "Routes file not found, using defaults");
        let file = Self::default();

        match file.save(path) {
            Ok(()) => info!(path = %path.display(), "Wrote default routes file"),
            Err(e) => warn!(path = %path.display(), error = %e, "Could not write default routes file"),
        }

        Ok(file)
    }

    /// Write the routes file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let contents = serde_yaml::to_string(self).context("Failed to serialize routes")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write routes file: {}", path.display()))?;

        debug!(path = %path.display(), "Routes file saved");
        Ok(())
    }

    /// Check that every backend looks like `host:port`.
    pub fn validate(&self) -> Result<()> {
        check_backend_addr(&self.default_target).context("Invalid default_target")?;

        for (hostname, backend) in &self.routes {
            check_backend_addr(backend)
                .with_context(|| format!("Invalid backend for route '{hostname}'"))?;
        }

        Ok(())
    }

    /// Build the immutable routing snapshot for this file.
    pub fn to_snapshot(&self) -> RouteSnapshot {
        let routes: HashMap<String, String> = self
            .routes
            .iter()
            .map(|(host, backend)| (host.clone(), backend.clone()))
            .collect();

        RouteSnapshot::new(routes, self.default_target.clone())
    }
}

fn check_backend_addr(addr: &str) -> Result<()> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        bail!("'{addr}' is not in host:port form");
    };

    if host.is_empty() {
        bail!("'{addr}' has an empty host");
    }

    port.parse::<u16>()
        .with_context(|| format!("'{addr}' has an invalid port"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(lookup_from(&[("MCRELAY_CONFIG", "/etc/mcrelay.yaml")]))
            .unwrap();

        assert_eq!(config.routes_file, PathBuf::from("/etc/mcrelay.yaml"));
        assert_eq!(config.bind_host, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.reload_interval, Duration::from_secs(2));
        assert_eq!(config.log_level, "info");
        assert!(!config.log_json);
    }

    #[test]
    fn test_config_overrides_and_clamps() {
        let config = Config::from_lookup(lookup_from(&[
            ("MCRELAY_CONFIG", "routes.yaml"),
            ("MCRELAY_BIND_HOST", "::1"),
            ("MCRELAY_HANDSHAKE_TIMEOUT_MS", "1"),
            ("MCRELAY_CONNECT_TIMEOUT_MS", "2500"),
            ("MCRELAY_LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(config.bind_host, "::1".parse::<IpAddr>().unwrap());
        assert_eq!(config.handshake_timeout, Duration::from_millis(100));
        assert_eq!(config.connect_timeout, Duration::from_millis(2500));
        assert!(config.log_json);
    }

    #[test]
    fn test_config_rejects_bad_number() {
        let err = Config::from_lookup(lookup_from(&[
            ("MCRELAY_CONFIG", "routes.yaml"),
            ("MCRELAY_CONNECT_TIMEOUT_MS", "soon"),
        ]))
        .unwrap_err();

        assert!(err.to_string().contains("MCRELAY_CONNECT_TIMEOUT_MS"));
    }

    #[test]
    fn test_parse_full_file() {
        let yaml = r#"
listen_port: 25600
default_target: "lobby.internal:25565"
routes:
  survival.example.com: "10.0.0.2:25565"
  Creative.example.com: "10.0.0.3:25565"
"#;
        let file = RoutesFile::parse(yaml).unwrap();
        assert_eq!(file.listen_port, 25600);

        let snapshot = file.to_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.resolve("survival.example.com"), "10.0.0.2:25565");
        assert_eq!(snapshot.resolve("Creative.example.com"), "10.0.0.3:25565");
        assert_eq!(snapshot.resolve("creative.example.com"), "lobby.internal:25565");
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let file = RoutesFile::parse("listen_port: 30000\n").unwrap();
        assert_eq!(file.listen_port, 30000);
        assert_eq!(file.default_target, DEFAULT_TARGET);
        assert_eq!(file.routes, default_routes());

        assert_eq!(RoutesFile::parse("").unwrap(), RoutesFile::default());
    }

    #[test]
    fn test_explicit_empty_routes() {
        let file = RoutesFile::parse("routes: {}\n").unwrap();
        assert!(file.to_snapshot().is_empty());
    }

    #[test]
    fn test_invalid_backend_rejected() {
        let err = RoutesFile::parse("routes:\n  a.example.com: \"no-port\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("a.example.com"));

        assert!(RoutesFile::parse("default_target: \":25565\"\n").is_err());
        assert!(RoutesFile::parse("default_target: \"host:99999\"\n").is_err());
        assert!(RoutesFile::parse("listen_port: [1, 2]\n").is_err());
    }

    #[test]
    fn test_ipv6_backend_accepted() {
        assert!(RoutesFile::parse("default_target: \"[::1]:25565\"\n").is_ok());
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("config.yaml");

        let file = RoutesFile::load_or_create(&path).unwrap();
        assert_eq!(file, RoutesFile::default());
        assert!(path.exists());

        // The written file round-trips to the same defaults.
        assert_eq!(RoutesFile::load(&path).unwrap(), RoutesFile::default());
    }

    #[test]
    fn test_load_existing_invalid_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "routes: [not, a, map]\n").unwrap();

        assert!(RoutesFile::load_or_create(&path).is_err());
    }
}
