//! Fan-out query execution against query peers
//!
//! ## Message Flow
//!
//! ```text
//! QueryExecutor::query(expr, time)
//!        │
//!        ├── PeerAddresses::addresses()          current peer list
//!        ├── random permutation of the peers
//!        └── for each peer, in order:
//!               GET /api/v1/query ──▶ decode ──▶ Ok(vector)   first success wins
//!                         │
//!                         └── error ──▶ log, count, next peer
//!
//!        no peer left ──▶ Err(QueryError::NoPeerReachable)
//! ```

mod executor;
pub mod response;

use thiserror::Error;

pub use executor::QueryExecutor;
pub use response::{DecodeError, decode_instant_response};

/// Source of the query peers to fan out to
pub trait PeerAddresses: Send + Sync {
    fn addresses(&self) -> Vec<String>;
}

impl<F> PeerAddresses for F
where
    F: Fn() -> Vec<String> + Send + Sync,
{
    fn addresses(&self) -> Vec<String> {
        self()
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no query peer reachable")]
    NoPeerReachable,

    #[error("invalid query peer address {addr}: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: url::ParseError,
    },

    #[error("request to {addr} failed: {source}")]
    Transport {
        addr: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{addr} responded with status {status}")]
    Status { addr: String, status: u16 },

    #[error("{addr} returned an error ({kind}): {message}")]
    Remote {
        addr: String,
        kind: String,
        message: String,
    },

    #[error("decoding response of {addr}: {source}")]
    Decode {
        addr: String,
        #[source]
        source: DecodeError,
    },
}
