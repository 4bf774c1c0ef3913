//! Rule reloading
//!
//! Reload requests travel over a channel with room for a single request.
//! While a reload is pending further requests are absorbed, so a burst of
//! signals costs at most one extra reload.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use prometheus::{Gauge, GaugeVec, IntGauge};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::metrics::Subsystem;

use super::{Manager, RuleError};

/// Handle to request a reload
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    tx: mpsc::Sender<()>,
}

impl ReloadHandle {
    /// Request a reload. Returns `false` if a reload is already pending or
    /// the reloader is gone.
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                debug!("reload already pending");
                false
            }
            Err(TrySendError::Closed(())) => {
                warn!("reload requested, but the reloader is stopped");
                false
            }
        }
    }
}

/// Create the reload channel with the startup reload already queued.
pub fn reload_channel() -> (ReloadHandle, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    let handle = ReloadHandle { tx };
    handle.trigger();
    (handle, rx)
}

/// Rules installed by one load
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedGroup {
    pub file: String,
    pub name: String,
    pub rules: usize,
}

/// Loads rule files and installs them
pub trait RuleLoader: Send + Sync {
    fn load(&self, default_interval: Duration, files: &[PathBuf]) -> Result<Vec<LoadedGroup>, RuleError>;
}

impl RuleLoader for Manager {
    fn load(&self, default_interval: Duration, files: &[PathBuf]) -> Result<Vec<LoadedGroup>, RuleError> {
        self.update(default_interval, files)?;
        Ok(self
            .groups()
            .iter()
            .map(|group| LoadedGroup {
                file: group.file().display().to_string(),
                name: group.name().to_string(),
                rules: group.rules().len(),
            })
            .collect())
    }
}

/// Expand glob patterns into the files they currently match.
///
/// Invalid patterns are logged and skipped.
pub fn expand_globs(patterns: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for pattern in patterns {
        match glob::glob(pattern) {
            Ok(paths) => files.extend(paths.filter_map(|entry| {
                entry
                    .inspect_err(|e| warn!("skipping unreadable rule path: {e}"))
                    .ok()
            })),
            Err(e) => error!("invalid rule file pattern {pattern}: {e}"),
        }
    }
    files
}

pub struct Reloader {
    loader: Arc<dyn RuleLoader>,
    patterns: Vec<String>,
    eval_interval: Duration,

    config_success: IntGauge,
    config_success_time: Gauge,
    rules_loaded: GaugeVec,
}

impl Reloader {
    pub fn new(
        loader: Arc<dyn RuleLoader>,
        patterns: Vec<String>,
        eval_interval: Duration,
        subsystem: &Subsystem,
    ) -> prometheus::Result<Self> {
        Ok(Self {
            loader,
            patterns,
            eval_interval,
            config_success: subsystem.int_gauge(
                "config_last_reload_successful",
                "Whether the last configuration reload attempt was successful",
            )?,
            config_success_time: subsystem.gauge(
                "config_last_reload_success_timestamp_seconds",
                "Timestamp of the last successful configuration reload",
            )?,
            rules_loaded: subsystem.gauge_vec(
                "loaded_rules",
                "Loaded rules partitioned by file and group",
                &["file", "group"],
            )?,
        })
    }

    /// Reload once. Failures keep the previous rules in place.
    #[instrument(skip(self))]
    pub fn reload(&self) -> Result<(), RuleError> {
        let files = expand_globs(&self.patterns);
        debug!("reloading rules from {} files", files.len());

        match self.loader.load(self.eval_interval, &files) {
            Ok(groups) => {
                self.config_success.set(1);
                self.config_success_time
                    .set(Utc::now().timestamp_millis() as f64 / 1000.0);
                self.rules_loaded.reset();
                for group in &groups {
                    self.rules_loaded
                        .with_label_values(&[group.file.as_str(), group.name.as_str()])
                        .set(group.rules as f64);
                }
                info!("reloaded {} rule groups", groups.len());
                Ok(())
            }
            Err(e) => {
                self.config_success.set(0);
                error!("reloading rules failed: {e}");
                Err(e)
            }
        }
    }

    /// Reload on every request until `cancel` fires.
    pub async fn run(self, mut requests: mpsc::Receiver<()>, cancel: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                request = requests.recv() => {
                    if request.is_none() {
                        return Ok(());
                    }
                    // failures are surfaced through gauges and logs
                    let _ = self.reload();
                }
            }
        }
    }
}

/// Turn every SIGHUP into a reload request until `cancel` fires.
#[cfg(unix)]
pub async fn forward_sighup(handle: ReloadHandle, cancel: CancellationToken) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            received = hangup.recv() => {
                if received.is_none() {
                    return Ok(());
                }
                info!("received SIGHUP, reloading rules");
                handle.trigger();
            }
        }
    }
}

#[cfg(not(unix))]
pub async fn forward_sighup(_handle: ReloadHandle, cancel: CancellationToken) -> anyhow::Result<()> {
    cancel.cancelled().await;
    Ok(())
}
