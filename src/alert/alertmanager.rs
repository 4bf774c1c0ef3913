use std::sync::Arc;

use arc_swap::ArcSwap;
use prometheus::IntCounter;
use tracing::{error, instrument, trace};
use url::Url;

use crate::discovery::dns::{QType, Resolver, parse_address};
use crate::metrics::Subsystem;
use crate::util::{join_host_port, split_host_port};

use super::AlertError;

/// Alertmanager URL as configured
struct Endpoint {
    raw: String,
    qtype: Option<QType>,
    url: Url,

    /// Port written in the address, even if it is the scheme's default
    port: Option<u16>,
}

impl Endpoint {
    fn parse(raw: &str) -> Result<Self, AlertError> {
        let invalid = |message: String| AlertError::InvalidUrl {
            url: raw.to_string(),
            message,
        };

        let (qtype, rest) = parse_address(raw)?;
        let url = Url::parse(rest).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", url.scheme())));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(invalid("missing host".into()));
        }
        Ok(Self {
            raw: raw.to_string(),
            qtype,
            port: written_port(rest),
            url,
        })
    }
}

/// Port of the authority as written.
///
/// [`Url`] forgets a port equal to the scheme's default, so the text is
/// inspected directly.
fn written_port(url: &str) -> Option<u16> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    split_host_port(host_port).map(|(_, port)| port)
}

/// Periodically resolved set of Alertmanager URLs
pub struct AlertmanagerSet {
    resolver: Arc<dyn Resolver>,
    default_port: u16,
    endpoints: Vec<Endpoint>,

    /// Resolved URLs per configured endpoint
    resolved: ArcSwap<Vec<Vec<Url>>>,

    resolution_errors: IntCounter,
}

impl AlertmanagerSet {
    pub fn new(
        addrs: &[String],
        resolver: Arc<dyn Resolver>,
        default_port: u16,
        subsystem: &Subsystem,
    ) -> anyhow::Result<Self> {
        let endpoints = addrs
            .iter()
            .map(|addr| Endpoint::parse(addr))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            resolver,
            default_port,
            resolved: ArcSwap::from_pointee(vec![Vec::new(); endpoints.len()]),
            endpoints,
            resolution_errors: subsystem.int_counter(
                "alertmanager_address_resolution_errors",
                "The number of times resolving an address of an alertmanager has failed inside Rule",
            )?,
        })
    }

    /// Re-resolve every endpoint. An endpoint that fails keeps its previous
    /// URLs.
    #[instrument(skip(self))]
    pub async fn update(&self) {
        let previous = self.resolved.load_full();
        let mut next = Vec::with_capacity(self.endpoints.len());

        for (index, endpoint) in self.endpoints.iter().enumerate() {
            match self.resolve(endpoint).await {
                Ok(urls) => {
                    trace!("{} resolved to {} URLs", endpoint.raw, urls.len());
                    next.push(urls);
                }
                Err(e) => {
                    self.resolution_errors.inc();
                    error!("resolving alertmanager {} failed: {e}", endpoint.raw);
                    next.push(previous.get(index).cloned().unwrap_or_default());
                }
            }
        }

        self.resolved.store(Arc::new(next));
    }

    async fn resolve(&self, endpoint: &Endpoint) -> Result<Vec<Url>, AlertError> {
        let Some(qtype) = endpoint.qtype else {
            return Ok(vec![endpoint.url.clone()]);
        };

        let host = endpoint.url.host_str().unwrap_or_default();
        let name = match qtype {
            QType::A => join_host_port(
                host.trim_start_matches('[').trim_end_matches(']'),
                endpoint.port.unwrap_or(self.default_port),
            ),
            QType::Srv => host.to_string(),
        };

        let addrs = self.resolver.resolve(&name, qtype).await?;
        addrs
            .iter()
            .map(|addr| with_host_port(&endpoint.url, addr))
            .collect()
    }

    /// Latest resolved URLs
    pub fn get(&self) -> Vec<Url> {
        self.resolved.load().iter().flatten().cloned().collect()
    }
}

fn with_host_port(base: &Url, addr: &str) -> Result<Url, AlertError> {
    let invalid = |message: String| AlertError::InvalidUrl {
        url: addr.to_string(),
        message,
    };
    let (host, port) = split_host_port(addr).ok_or_else(|| invalid("missing port".into()))?;

    let mut url = base.clone();
    let host = if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    url.set_host(Some(&host)).map_err(|e| invalid(e.to_string()))?;
    url.set_port(Some(port))
        .map_err(|()| invalid("cannot carry a port".into()))?;
    Ok(url)
}
