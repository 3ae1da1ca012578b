//! Routes file hot reload.
//!
//! Polls the routes file's modification time and size. When either changes, the
//! file is re-read and a new snapshot is swapped into the route table. A file
//! that fails to load leaves the last good snapshot in place.
//!
//! Two same-size writes inside one mtime tick leave the stamp unchanged, so a
//! recently modified file is also compared by content on every poll.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::RoutesFile;
use crate::proxy::RouteTable;

/// How long after its mtime a file is still compared by content.
///
/// Covers coarse filesystem timestamps (whole seconds on some) with margin.
const RECENT_WRITE_WINDOW: Duration = Duration::from_secs(3);

/// What the poller last saw on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    /// Whether a same-stamp write could still be hiding behind this stamp.
    fn is_recent(&self) -> bool {
        match self.modified {
            None => true,
            Some(modified) => SystemTime::now()
                .duration_since(modified)
                .map_or(true, |age| age < RECENT_WRITE_WINDOW),
        }
    }
}

async fn stamp(path: &Path) -> Option<FileStamp> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some(FileStamp {
        modified: meta.modified().ok(),
        len: meta.len(),
    })
}

/// Outcome of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// File unchanged since the last poll.
    Unchanged,
    /// File changed and the new routes are live.
    Reloaded { route_count: usize },
    /// File changed but could not be loaded; previous routes kept.
    Rejected,
    /// File is gone; previous routes kept.
    Missing,
}

/// Watches one routes file and feeds a route table.
pub struct RouteReloader {
    path: PathBuf,
    route_table: Arc<RouteTable>,
    listen_port: u16,
    last_seen: Option<FileStamp>,
    /// Contents behind `last_seen`, applied or rejected.
    last_contents: Option<String>,
}

impl RouteReloader {
    /// Create a reloader. Call [`RouteReloader::prime`] before polling so the
    /// initial file is not reloaded a second time.
    pub fn new(path: PathBuf, route_table: Arc<RouteTable>, listen_port: u16) -> Self {
        Self {
            path,
            route_table,
            listen_port,
            last_seen: None,
            last_contents: None,
        }
    }

    /// Record the file's current state as already applied.
    pub async fn prime(&mut self) {
        self.last_seen = stamp(&self.path).await;
        self.last_contents = tokio::fs::read_to_string(&self.path).await.ok();
    }

    /// Check the file once and apply it if it changed.
    pub async fn poll(&mut self) -> ReloadOutcome {
        let current = stamp(&self.path).await;
        if current == self.last_seen && !current.is_some_and(|s| s.is_recent()) {
            return ReloadOutcome::Unchanged;
        }
        self.last_seen = current;

        if current.is_none() {
            warn!(path = %self.path.display(), "Routes file removed, keeping current routes");
            self.last_contents = None;
            return ReloadOutcome::Missing;
        }

        let contents = match self.read().await {
            Ok(contents) => contents,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %format!("{e:#}"),
                    "Routes file reload failed, keeping current routes"
                );
                return ReloadOutcome::Rejected;
            }
        };

        if self.last_contents.as_deref() == Some(contents.as_str()) {
            return ReloadOutcome::Unchanged;
        }

        let parsed = RoutesFile::parse(&contents);
        self.last_contents = Some(contents);

        match parsed {
            Ok(file) => {
                if file.listen_port != self.listen_port {
                    warn!(
                        listen_port = self.listen_port,
                        configured_port = file.listen_port,
                        "listen_port changed; restart required to apply"
                    );
                }

                let route_count = file.routes.len();
                self.route_table.update(file.to_snapshot());
                info!(
                    path = %self.path.display(),
                    route_count = route_count,
                    "Routes file reloaded"
                );
                ReloadOutcome::Reloaded { route_count }
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %format!("{e:#}"),
                    "Routes file reload failed, keeping current routes"
                );
                ReloadOutcome::Rejected
            }
        }
    }

    async fn read(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read routes file: {}", self.path.display()))
    }

    /// Poll forever at `interval`.
    pub async fn run(mut self, interval: Duration) {
        info!(
            path = %self.path.display(),
            interval_ms = interval.as_millis() as u64,
            "Watching routes file"
        );

        loop {
            tokio::time::sleep(interval).await;
            let outcome = self.poll().await;
            debug!(outcome = ?outcome, "Routes file polled");
        }
    }
}
