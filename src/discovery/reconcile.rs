//! Merges gossip, static, file SD and DNS addresses into one list.
//!
//! The resolver is fed with the static addresses plus the file SD cache,
//! so statically configured addresses are seen once, through the resolver.
//! Gossip addresses come first and win over a duplicate from DNS.

use std::collections::HashSet;
use std::sync::Arc;

use prometheus::IntCounter;
use tracing::{error, warn};

use crate::metrics::Subsystem;
use crate::query::PeerAddresses;
use crate::store::{StoreSpec, StoreSpecSource};

use super::{PeerStateFetcher, PeerType, Provider};

/// Drop repeated addresses, keeping the first occurrence of each.
///
/// Every dropped address increments `duplicates`.
pub fn remove_duplicate_addrs<I>(addrs: I, duplicates: &IntCounter) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    addrs
        .into_iter()
        .filter(|addr| {
            let first = seen.insert(addr.clone());
            if !first {
                duplicates.inc();
                warn!("duplicate address {addr}");
            }
            first
        })
        .collect()
}

/// Store specs of the query node
pub struct StoreDiscovery {
    peers: Arc<dyn PeerStateFetcher>,
    provider: Arc<Provider>,
    duplicates: IntCounter,
}

impl StoreDiscovery {
    pub fn new(
        peers: Arc<dyn PeerStateFetcher>,
        provider: Arc<Provider>,
        subsystem: &Subsystem,
    ) -> prometheus::Result<Self> {
        Ok(Self {
            peers,
            provider,
            duplicates: subsystem.int_counter(
                "duplicated_store_address",
                "The number of times a duplicated store addresses is detected from the different configs in query",
            )?,
        })
    }
}

impl StoreSpecSource for StoreDiscovery {
    fn specs(&self) -> Vec<StoreSpec> {
        let mut states: Vec<_> = self.peers.peer_states(PeerType::STORE_APIS).into_iter().collect();
        states.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut specs = Vec::new();
        for (id, state) in states {
            if state.store_api_addr.is_empty() {
                error!(peer = %id, "gossip peer advertises an empty store API address");
                continue;
            }
            specs.push(StoreSpec::gossip(id, state.store_api_addr, self.peers.clone()));
        }
        specs.extend(self.provider.addresses().into_iter().map(StoreSpec::plain));

        let mut seen = HashSet::new();
        specs
            .into_iter()
            .filter(|spec| {
                let first = seen.insert(spec.addr().to_string());
                if !first {
                    self.duplicates.inc();
                    warn!("duplicate store address {}", spec.addr());
                }
                first
            })
            .collect()
    }
}

/// Query peer addresses of the rule node
pub struct QueryDiscovery {
    peers: Arc<dyn PeerStateFetcher>,
    provider: Arc<Provider>,
    duplicates: IntCounter,
}

impl QueryDiscovery {
    pub fn new(
        peers: Arc<dyn PeerStateFetcher>,
        provider: Arc<Provider>,
        subsystem: &Subsystem,
    ) -> prometheus::Result<Self> {
        Ok(Self {
            peers,
            provider,
            duplicates: subsystem.int_counter(
                "duplicated_query_address",
                "The number of times a duplicated query addresses is detected from the different configs in rule",
            )?,
        })
    }
}

impl PeerAddresses for QueryDiscovery {
    fn addresses(&self) -> Vec<String> {
        let mut states: Vec<_> = self.peers.peer_states(&[PeerType::Query]).into_iter().collect();
        states.sort_by(|(a, _), (b, _)| a.cmp(b));

        let gossip = states.into_iter().filter_map(|(id, state)| {
            if state.query_api_addr.is_empty() {
                error!(peer = %id, "gossip peer advertises an empty query API address");
                return None;
            }
            Some(state.query_api_addr)
        });
        remove_duplicate_addrs(gossip.chain(self.provider.addresses()), &self.duplicates)
    }
}
