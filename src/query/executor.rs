use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use prometheus::IntCounter;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::Vector;
use crate::metrics::Subsystem;

use super::response::{DecodeError, Envelope, decode_instant_response};
use super::{PeerAddresses, QueryError};

/// Runs instant queries against one of the current query peers
pub struct QueryExecutor {
    peers: Arc<dyn PeerAddresses>,
    client: reqwest::Client,
    rng: Mutex<StdRng>,

    requests: IntCounter,
    peer_failures: IntCounter,
}

impl QueryExecutor {
    pub fn new(
        peers: Arc<dyn PeerAddresses>,
        timeout: Duration,
        subsystem: &Subsystem,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building query HTTP client")?;

        Ok(Self {
            peers,
            client,
            rng: Mutex::new(StdRng::from_entropy()),
            requests: subsystem.int_counter("query_requests_total", "The number of fan-out queries")?,
            peer_failures: subsystem.int_counter(
                "query_peer_failures_total",
                "The number of failed requests to single query peers",
            )?,
        })
    }

    /// Make the peer order reproducible.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Random order in which `len` peers are visited
    pub fn permutation(&self, len: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut *self.rng.lock());
        order
    }

    /// Evaluate `expr` at `time` on the first peer that answers.
    ///
    /// Peers are tried once each, in random order.
    #[instrument(skip(self, time))]
    pub async fn query(&self, expr: &str, time: DateTime<Utc>) -> Result<Vector, QueryError> {
        self.requests.inc();
        let addrs = self.peers.addresses();

        for index in self.permutation(addrs.len()) {
            let addr = &addrs[index];
            match self.query_peer(addr, expr, time).await {
                Ok(vector) => {
                    debug!(peer = %addr, samples = vector.len(), "query succeeded");
                    return Ok(vector);
                }
                Err(e) => {
                    self.peer_failures.inc();
                    warn!(peer = %addr, "query failed: {e}");
                }
            }
        }

        Err(QueryError::NoPeerReachable)
    }

    /// Run a single instant query against `addr`.
    pub async fn query_peer(
        &self,
        addr: &str,
        expr: &str,
        time: DateTime<Utc>,
    ) -> Result<Vector, QueryError> {
        let mut url = Url::parse(&format!("http://{addr}/api/v1/query")).map_err(|source| {
            QueryError::InvalidAddress {
                addr: addr.to_string(),
                source,
            }
        })?;
        url.query_pairs_mut()
            .append_pair("query", expr)
            .append_pair("time", &time.to_rfc3339_opts(SecondsFormat::Nanos, true))
            .append_pair("dedup", "true");

        let transport = |source| QueryError::Transport {
            addr: addr.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;

        let decode = |source: DecodeError| QueryError::Decode {
            addr: addr.to_string(),
            source,
        };
        let envelope: Envelope = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(QueryError::Status {
                    addr: addr.to_string(),
                    status: status.as_u16(),
                });
            }
            Err(e) => return Err(decode(e.into())),
        };

        if envelope.status != "success" || !status.is_success() {
            return Err(QueryError::Remote {
                addr: addr.to_string(),
                kind: envelope.error_type.unwrap_or_else(|| status.to_string()),
                message: envelope.error.unwrap_or_default(),
            });
        }

        let data = envelope.data.ok_or(DecodeError::MissingData).map_err(decode)?;
        decode_instant_response(&data.result_type, &data.result).map_err(decode)
    }
}
