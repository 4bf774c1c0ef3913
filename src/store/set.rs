use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use prometheus::IntGauge;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::Labels;
use crate::metrics::Subsystem;
use crate::supervisor::repeat;

use super::{StoreClient, StoreDialer, StoreInfo, StoreSpec, StoreSpecSource};

/// Handle to a store that answered at least one probe
pub struct Store {
    pub addr: String,
    pub client: Arc<dyn StoreClient>,
    pub info: StoreInfo,
    pub last_probe: DateTime<Utc>,
    pub peer_id: Option<String>,
}

/// Listing entry of a [`Store`]
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub addr: String,
    pub peer_id: Option<String>,
    pub labels: Labels,
    pub min_time: i64,
    pub max_time: i64,
    pub last_probe: DateTime<Utc>,
}

impl Store {
    pub fn status(&self) -> StoreStatus {
        StoreStatus {
            addr: self.addr.clone(),
            peer_id: self.peer_id.clone(),
            labels: self.info.labels.clone(),
            min_time: self.info.min_time,
            max_time: self.info.max_time,
            last_probe: self.last_probe,
        }
    }
}

struct Entry {
    spec: StoreSpec,
    client: Arc<dyn StoreClient>,
    info: Option<StoreInfo>,
    last_probe: Option<DateTime<Utc>>,

    /// Consecutive failed probes
    failures: usize,
}

pub struct StoreSet {
    specs: Arc<dyn StoreSpecSource>,
    dialer: Arc<dyn StoreDialer>,

    /// Consecutive failed probes after which a handle is evicted
    unreachable_after: usize,
    probe_timeout: Duration,

    /// Only touched by `update` and `close`, which serialize on it
    entries: Mutex<HashMap<String, Entry>>,

    current: ArcSwap<Vec<Arc<Store>>>,

    nodes: IntGauge,
}

impl StoreSet {
    pub fn new(
        specs: Arc<dyn StoreSpecSource>,
        dialer: Arc<dyn StoreDialer>,
        unreachable_after: usize,
        probe_timeout: Duration,
        subsystem: &Subsystem,
    ) -> prometheus::Result<Self> {
        Ok(Self {
            specs,
            dialer,
            unreachable_after: unreachable_after.max(1),
            probe_timeout,
            entries: Mutex::new(HashMap::new()),
            current: ArcSwap::from_pointee(Vec::new()),
            nodes: subsystem.int_gauge("store_nodes", "Number of known store handles")?,
        })
    }

    /// Stores that answered their last probe, ordered by address
    pub fn current(&self) -> Arc<Vec<Arc<Store>>> {
        self.current.load_full()
    }

    /// Bring the handles in line with the latest specs and probe them.
    #[instrument(skip(self))]
    pub async fn update(&self) {
        let specs = self.specs.specs();
        let mut entries = self.entries.lock().await;
        let mut closing = Vec::new();

        let wanted: HashMap<&str, &StoreSpec> = specs.iter().map(|s| (s.addr(), s)).collect();
        entries.retain(|addr, entry| {
            let keep = wanted.contains_key(addr.as_str());
            if !keep {
                info!("removing store {addr}");
                closing.push(entry.client.clone());
            }
            keep
        });

        for spec in &specs {
            if let Some(entry) = entries.get_mut(spec.addr()) {
                entry.spec = spec.clone();
                continue;
            }
            match self.dialer.dial(spec.addr()) {
                Ok(client) => {
                    info!("adding store {}", spec.addr());
                    entries.insert(
                        spec.addr().to_string(),
                        Entry {
                            spec: spec.clone(),
                            client,
                            info: None,
                            last_probe: None,
                            failures: 0,
                        },
                    );
                }
                Err(e) => warn!("could not open store {}: {e:#}", spec.addr()),
            }
        }

        let probes = join_all(entries.iter().map(|(addr, entry)| async move {
            let result = tokio::time::timeout(
                self.probe_timeout,
                entry.spec.metadata(entry.client.as_ref()),
            )
            .await
            .unwrap_or_else(|_| Err(anyhow!("probe timed out")));
            (addr.clone(), result)
        }))
        .await;

        let now = Utc::now();
        for (addr, result) in probes {
            let Some(entry) = entries.get_mut(&addr) else {
                continue;
            };
            match result {
                Ok(info) => {
                    entry.info = Some(info);
                    entry.last_probe = Some(now);
                    entry.failures = 0;
                }
                Err(e) => {
                    entry.failures += 1;
                    warn!(store = %addr, failures = entry.failures, "probe failed: {e:#}");
                    if entry.failures >= self.unreachable_after {
                        warn!("store {addr} is unreachable, evicting");
                        if let Some(entry) = entries.remove(&addr) {
                            closing.push(entry.client);
                        }
                    }
                }
            }
        }

        let mut current: Vec<Arc<Store>> = entries
            .values()
            .filter_map(|entry| {
                Some(Arc::new(Store {
                    addr: entry.spec.addr().to_string(),
                    client: entry.client.clone(),
                    info: entry.info.clone()?,
                    last_probe: entry.last_probe?,
                    peer_id: entry.spec.peer_id().map(String::from),
                }))
            })
            .collect();
        current.sort_by(|a, b| a.addr.cmp(&b.addr));
        self.nodes.set(current.len() as i64);
        self.current.store(Arc::new(current));
        drop(entries);

        for client in closing {
            client.close().await;
        }
    }

    /// Close every handle.
    pub async fn close(&self) {
        let mut entries = self.entries.lock().await;
        self.current.store(Arc::new(Vec::new()));
        self.nodes.set(0);
        for (_, entry) in entries.drain() {
            entry.client.close().await;
        }
    }

    /// Refresh on every tick until `cancel` fires, then close all handles.
    pub async fn run(&self, refresh_interval: Duration, cancel: CancellationToken) -> anyhow::Result<()> {
        let result = repeat(refresh_interval, cancel, move || async move {
            self.update().await;
            Ok(())
        })
        .await;
        debug!("store set stopped");
        self.close().await;
        result
    }
}
