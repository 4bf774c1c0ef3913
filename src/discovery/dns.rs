//! DNS based address resolution
//!
//! Addresses may carry a lookup type prefix:
//!
//! | address                        | resolution                                   |
//! |--------------------------------|----------------------------------------------|
//! | `10.0.0.1:10901`               | used literally                               |
//! | `dns+store.example.com:10901`  | A/AAAA lookup, port kept (or default added)  |
//! | `dnssrv+_grpc._tcp.example.com`| SRV lookup, port taken from the SRV record   |
//!
//! [`Provider`] resolves a whole address list on every tick and publishes the
//! result with a single atomic swap. A name that fails to resolve keeps its
//! last good result.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use prometheus::IntCounter;
use tracing::{debug, error, instrument, trace};
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};

use crate::metrics::Subsystem;
use crate::util::{join_host_port, split_host_port, with_default_port};

use super::{DiscoveryError, DiscoveryResult};

/// Lookup strategy selected by an address prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QType {
    /// `dns+`: A/AAAA records
    A,
    /// `dnssrv+`: SRV records
    Srv,
}

impl QType {
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "dns" => Some(QType::A),
            "dnssrv" => Some(QType::Srv),
            _ => None,
        }
    }
}

/// Split an address into its lookup type and name.
///
/// Untagged addresses yield `None` and are used literally.
pub fn parse_address(addr: &str) -> DiscoveryResult<(Option<QType>, &str)> {
    match addr.split_once('+') {
        // a '+' behind the scheme or host belongs to the address itself
        Some((prefix, name)) if !prefix.contains([':', '/']) => QType::from_prefix(prefix)
            .map(|qtype| (Some(qtype), name))
            .ok_or_else(|| DiscoveryError::UnsupportedLookup(prefix.to_string())),
        _ => Ok((None, addr)),
    }
}

/// Resolves a name into concrete `host:port` addresses
#[async_trait]
pub trait Resolver: Send + Sync {
    /// For [`QType::A`] the name must carry a port, which is kept on every
    /// resolved address. For [`QType::Srv`] ports come from the records.
    async fn resolve(&self, name: &str, qtype: QType) -> DiscoveryResult<Vec<String>>;
}

/// [`Resolver`] backed by the system DNS configuration
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            debug!("no usable system resolver configuration ({e}), using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, name: &str, qtype: QType) -> DiscoveryResult<Vec<String>> {
        let lookup_error = |source| DiscoveryError::Lookup {
            name: name.to_string(),
            source,
        };

        match qtype {
            QType::A => {
                let (host, port) = split_host_port(name)
                    .ok_or_else(|| DiscoveryError::MissingPort(name.to_string()))?;
                let ips = self.resolver.lookup_ip(host).await.map_err(lookup_error)?;
                Ok(ips
                    .iter()
                    .map(|ip| join_host_port(&ip.to_string(), port))
                    .collect())
            }
            QType::Srv => {
                let records = self.resolver.srv_lookup(name).await.map_err(lookup_error)?;
                let mut resolved = Vec::new();
                for srv in records.iter() {
                    let ips = self
                        .resolver
                        .lookup_ip(srv.target().clone())
                        .await
                        .map_err(lookup_error)?;
                    resolved.extend(
                        ips.iter()
                            .map(|ip| join_host_port(&ip.to_string(), srv.port())),
                    );
                }
                Ok(resolved)
            }
        }
    }
}

/// Periodically resolved address list
///
/// Results are kept per input address so a failing name can fall back to
/// its previous result while the others move on.
pub struct Provider {
    resolver: Arc<dyn Resolver>,

    /// Port appended to `dns+` names that have none
    default_port: Option<u16>,

    /// Input address → resolved addresses, in input order
    resolved: ArcSwap<Vec<(String, Vec<String>)>>,

    lookups: IntCounter,
    failures: IntCounter,
}

impl Provider {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        default_port: Option<u16>,
        subsystem: &Subsystem,
    ) -> prometheus::Result<Self> {
        Ok(Self {
            resolver,
            default_port,
            resolved: ArcSwap::from_pointee(Vec::new()),
            lookups: subsystem
                .int_counter("dns_lookups_total", "The number of DNS lookups")?,
            failures: subsystem
                .int_counter("dns_failures_total", "The number of DNS lookup failures")?,
        })
    }

    /// Resolve `addrs` and replace the published result.
    ///
    /// Addresses that are no longer configured are dropped.
    #[instrument(skip_all, fields(addresses = addrs.len()))]
    pub async fn resolve(&self, addrs: &[String]) {
        let previous = self.resolved.load_full();
        let mut seen = HashSet::new();
        let mut next = Vec::with_capacity(addrs.len());

        for addr in addrs {
            if !seen.insert(addr.as_str()) {
                continue;
            }

            match self.resolve_one(addr).await {
                Ok(resolved) => {
                    trace!("{addr} resolved to {resolved:?}");
                    next.push((addr.clone(), resolved));
                }
                Err(e) => {
                    self.failures.inc();
                    error!("dns resolution failed for {addr}: {e}");
                    if let Some(last) = previous.iter().find(|(a, _)| a == addr) {
                        next.push(last.clone());
                    }
                }
            }
        }

        self.resolved.store(Arc::new(next));
    }

    async fn resolve_one(&self, addr: &str) -> DiscoveryResult<Vec<String>> {
        let (qtype, name) = parse_address(addr)?;
        let Some(qtype) = qtype else {
            return Ok(vec![name.to_string()]);
        };

        self.lookups.inc();
        let name = match (qtype, self.default_port) {
            (QType::A, Some(port)) => with_default_port(name, port),
            _ => name.to_string(),
        };
        self.resolver.resolve(&name, qtype).await
    }

    /// Addresses of the last resolution, flattened in input order.
    ///
    /// Two names resolving to the same address both contribute it; callers
    /// deduplicate and count.
    pub fn addresses(&self) -> Vec<String> {
        self.resolved
            .load()
            .iter()
            .flat_map(|(_, addrs)| addrs.iter().cloned())
            .collect()
    }
}
