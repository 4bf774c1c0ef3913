//! Store set
//!
//! Keeps one client handle per discovered store address.
//!
//! ## Message Flow
//!
//! ```text
//! refresh ticker ─┐
//!                 ├──▶ StoreSet::update ──▶ StoreSpecSource::specs()
//! file SD update ─┘          │
//!                            ├── evict + close handles of vanished addresses
//!                            ├── dial new addresses (lazy)
//!                            ├── probe every handle, evict after N failures
//!                            └── publish snapshot ──▶ StoreSet::current()
//! ```

mod client;
mod set;

use std::sync::Arc;

use anyhow::anyhow;

use crate::discovery::PeerStateFetcher;

pub use client::{HttpStoreDialer, StoreClient, StoreDialer, StoreInfo};
pub use set::{Store, StoreSet, StoreStatus};

#[derive(Clone)]
enum Origin {
    /// Announced through gossip, metadata comes from the membership view
    Gossip {
        peer_id: String,
        peers: Arc<dyn PeerStateFetcher>,
    },
    /// Configured or discovered address, metadata comes from the store
    Plain,
}

/// A store address together with where its metadata comes from
#[derive(Clone)]
pub struct StoreSpec {
    addr: String,
    origin: Origin,
}

impl StoreSpec {
    pub fn gossip(
        peer_id: impl Into<String>,
        addr: impl Into<String>,
        peers: Arc<dyn PeerStateFetcher>,
    ) -> Self {
        Self {
            addr: addr.into(),
            origin: Origin::Gossip {
                peer_id: peer_id.into(),
                peers,
            },
        }
    }

    pub fn plain(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            origin: Origin::Plain,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn peer_id(&self) -> Option<&str> {
        match &self.origin {
            Origin::Gossip { peer_id, .. } => Some(peer_id),
            Origin::Plain => None,
        }
    }

    /// Probe `client` and return the store's current metadata.
    pub async fn metadata(&self, client: &dyn StoreClient) -> anyhow::Result<StoreInfo> {
        let info = client.info().await?;
        match &self.origin {
            Origin::Plain => Ok(info),
            Origin::Gossip { peer_id, peers } => {
                let state = peers
                    .peer_state(peer_id)
                    .ok_or_else(|| anyhow!("peer {peer_id} is no longer a cluster member"))?;
                Ok(StoreInfo {
                    labels: state.metadata.labels,
                    min_time: state.metadata.min_time,
                    max_time: state.metadata.max_time,
                })
            }
        }
    }
}

impl std::fmt::Debug for StoreSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSpec")
            .field("addr", &self.addr)
            .field("peer_id", &self.peer_id())
            .finish()
    }
}

/// Produces the store specs the set should currently hold
pub trait StoreSpecSource: Send + Sync {
    fn specs(&self) -> Vec<StoreSpec>;
}

impl<F> StoreSpecSource for F
where
    F: Fn() -> Vec<StoreSpec> + Send + Sync,
{
    fn specs(&self) -> Vec<StoreSpec> {
        self()
    }
}
