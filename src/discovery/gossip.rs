//! Cluster membership view
//!
//! The gossip transport itself lives outside this crate. It feeds peer
//! changes into a [`Membership`], which readers query through the
//! [`PeerStateFetcher`] seam. Every read works on an immutable snapshot.

use std::collections::HashMap;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Labels;

/// Role a peer announces in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerType {
    /// Serves historical data
    Store,
    /// Serves data scraped by a collector sidecar
    Source,
    /// Serves the query API
    Query,
}

impl PeerType {
    /// Peer types that expose a store API
    pub const STORE_APIS: &'static [PeerType] = &[PeerType::Store, PeerType::Source];
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerMetadata {
    pub labels: Labels,
    pub min_time: i64,
    pub max_time: i64,
}

impl Default for PeerMetadata {
    fn default() -> Self {
        Self {
            labels: Labels::default(),
            min_time: i64::MIN,
            max_time: i64::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerState {
    pub peer_type: PeerType,
    pub store_api_addr: String,
    pub query_api_addr: String,
    pub metadata: PeerMetadata,
}

pub trait PeerStateFetcher: Send + Sync {
    /// Current states of all peers of the given types, keyed by peer id
    fn peer_states(&self, types: &[PeerType]) -> HashMap<String, PeerState>;

    fn peer_state(&self, id: &str) -> Option<PeerState>;
}

/// Snapshot based membership view
#[derive(Default)]
pub struct Membership {
    peers: ArcSwap<HashMap<String, PeerState>>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers<I>(peers: I) -> Self
    where
        I: IntoIterator<Item = (String, PeerState)>,
    {
        Self {
            peers: ArcSwap::from_pointee(peers.into_iter().collect()),
        }
    }

    /// Add a peer or replace its state.
    pub fn join(&self, id: impl Into<String>, state: PeerState) {
        let id = id.into();
        debug!(peer = %id, "peer joined");
        self.peers.rcu(|peers| {
            let mut next = HashMap::clone(peers);
            next.insert(id.clone(), state.clone());
            next
        });
    }

    /// Refresh the metadata of a known peer. Unknown peers are ignored.
    pub fn update_metadata(&self, id: &str, metadata: PeerMetadata) -> bool {
        let mut updated = false;
        self.peers.rcu(|peers| {
            let mut next = HashMap::clone(peers);
            updated = match next.get_mut(id) {
                Some(state) => {
                    state.metadata = metadata.clone();
                    true
                }
                None => false,
            };
            next
        });
        updated
    }

    pub fn leave(&self, id: &str) -> bool {
        let mut removed = false;
        self.peers.rcu(|peers| {
            let mut next = HashMap::clone(peers);
            removed = next.remove(id).is_some();
            next
        });
        if removed {
            debug!(peer = %id, "peer left");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.peers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.load().is_empty()
    }
}

impl PeerStateFetcher for Membership {
    fn peer_states(&self, types: &[PeerType]) -> HashMap<String, PeerState> {
        self.peers
            .load()
            .iter()
            .filter(|(_, state)| types.contains(&state.peer_type))
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect()
    }

    fn peer_state(&self, id: &str) -> Option<PeerState> {
        self.peers.load().get(id).cloned()
    }
}
