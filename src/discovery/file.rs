//! File based service discovery
//!
//! Discovery files hold a list of target groups, as JSON or YAML:
//!
//! ```json
//! [{"targets": ["10.0.0.1:10901", "10.0.0.2:10901"], "labels": {"zone": "a"}}]
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! notify watcher ──┐
//!                  ├──▶ FileDiscovery::run ──rescan──▶ mpsc<Vec<TargetGroup>> ──▶ forward_updates ──▶ Cache
//! refresh ticker ──┘
//! ```
//!
//! Every group is identified by `<path>:<index>`. Groups of a file that
//! vanished, or shrank, are re-emitted empty so the cache drops them.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use prometheus::IntCounter;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

use crate::metrics::Subsystem;

use super::{Cache, DiscoveryError, DiscoveryResult};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TargetGroup {
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// `<path>:<index>` of the group in its discovery file
    #[serde(skip)]
    pub source: String,
}

impl TargetGroup {
    fn cleared(source: String) -> Self {
        Self {
            targets: Vec::new(),
            labels: BTreeMap::new(),
            source,
        }
    }
}

fn group_source(path: &Path, index: usize) -> String {
    format!("{}:{index}", path.display())
}

/// Read the target groups of a single discovery file.
pub fn read_file(path: &Path) -> DiscoveryResult<Vec<TargetGroup>> {
    let content = std::fs::read_to_string(path).map_err(|source| DiscoveryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_error = |message: String| DiscoveryError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let mut groups: Vec<TargetGroup> = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
        Some("yml" | "yaml") => {
            serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?
        }
        _ => return Err(DiscoveryError::UnsupportedFormat(path.to_path_buf())),
    };

    for (index, group) in groups.iter_mut().enumerate() {
        group.source = group_source(path, index);
    }
    Ok(groups)
}

pub struct FileDiscovery {
    patterns: Vec<String>,
    refresh_interval: Duration,

    /// Number of groups every file yielded on the last scan
    last_scan: HashMap<PathBuf, usize>,

    scans: IntCounter,
    read_errors: IntCounter,
}

impl FileDiscovery {
    pub fn new(
        patterns: Vec<String>,
        refresh_interval: Duration,
        subsystem: &Subsystem,
    ) -> prometheus::Result<Self> {
        Ok(Self {
            patterns,
            refresh_interval,
            last_scan: HashMap::new(),
            scans: subsystem.int_counter("sd_file_scans_total", "The number of file SD scans")?,
            read_errors: subsystem.int_counter(
                "sd_file_read_errors_total",
                "The number of file SD read errors",
            )?,
        })
    }

    /// Rescan on every refresh tick and file change until `cancel` fires,
    /// pushing each scan's target groups on `updates`.
    #[instrument(skip_all, fields(patterns = ?self.patterns))]
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        updates: mpsc::Sender<Vec<TargetGroup>>,
    ) -> anyhow::Result<()> {
        let (changed_tx, mut changed_rx) = mpsc::channel(1);
        // dropping the watcher stops it, so it lives as long as the loop
        let _watcher = self.watch(changed_tx);

        let mut ticker = interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("file discovery stopped");
                    return Ok(());
                }
                _ = ticker.tick() => trace!("periodic rescan"),
                Some(()) = changed_rx.recv() => trace!("rescan after file change"),
            }

            let groups = self.refresh();
            if updates.send(groups).await.is_err() {
                debug!("update receiver dropped, stopping file discovery");
                return Ok(());
            }
        }
    }

    /// Watch the directories of every pattern. Watch failures only cost the
    /// immediate rescan, the refresh ticker still picks up changes.
    fn watch(&self, changed: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    // a full channel already holds a pending rescan
                    let _ = changed.try_send(());
                }
            }
            Err(e) => warn!("file watch error: {e}"),
        })
        .inspect_err(|e| error!("could not create file watcher: {e}"))
        .ok()?;

        for pattern in &self.patterns {
            let dir = match Path::new(pattern).parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => PathBuf::from("."),
            };
            if dir.to_string_lossy().contains(['*', '?', '[']) {
                warn!("not watching {pattern}: directory contains a glob");
                continue;
            }
            if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                warn!("could not watch {}: {e}", dir.display());
            }
        }

        Some(watcher)
    }

    /// Read every matching file once.
    pub fn refresh(&mut self) -> Vec<TargetGroup> {
        self.scans.inc();

        let mut files = Vec::new();
        for pattern in &self.patterns {
            match glob::glob(pattern) {
                Ok(paths) => {
                    for entry in paths {
                        match entry {
                            Ok(path) => files.push(path),
                            Err(e) => warn!("skipping unreadable path: {e}"),
                        }
                    }
                }
                Err(e) => error!("invalid file SD pattern {pattern}: {e}"),
            }
        }
        files.sort();
        files.dedup();

        let mut groups = Vec::new();
        let mut scanned = HashMap::with_capacity(files.len());
        for path in files {
            match read_file(&path) {
                Ok(file_groups) => {
                    scanned.insert(path, file_groups.len());
                    groups.extend(file_groups);
                }
                Err(e) => {
                    self.read_errors.inc();
                    error!("{e}");
                    // nothing emitted keeps the cached groups of this file
                    if let Some(&count) = self.last_scan.get(&path) {
                        scanned.insert(path, count);
                    }
                }
            }
        }

        for (path, &count) in &self.last_scan {
            let now = scanned.get(path).copied().unwrap_or(0);
            for index in now..count {
                groups.push(TargetGroup::cleared(group_source(path, index)));
            }
        }

        self.last_scan = scanned;
        groups
    }
}

/// Apply discovery updates to `cache` until `cancel` fires or the sender
/// goes away, calling `on_update` after every applied update.
///
/// Empty updates are ignored.
pub async fn forward_updates<F, Fut>(
    cache: Arc<Cache>,
    mut updates: mpsc::Receiver<Vec<TargetGroup>>,
    cancel: CancellationToken,
    mut on_update: F,
) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            update = updates.recv() => update,
        };
        let Some(update) = update else {
            return Ok(());
        };
        if update.is_empty() {
            trace!("ignoring empty discovery update");
            continue;
        }

        cache.update(update);
        on_update().await;
    }
}
