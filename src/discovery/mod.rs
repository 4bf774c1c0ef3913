//! Peer discovery
//!
//! Addresses of store and query peers come from four independent sources:
//!
//! ```text
//!   static config ──┐
//!                   ├──▶ dns::Provider ──┐
//!   file SD ─▶ cache┘   (resolve loop)   │
//!                                        ├──▶ reconcile ──▶ deduplicated address list
//!   gossip membership ───────────────────┘
//! ```
//!
//! - [`dns`]: resolves `dns+` / `dnssrv+` tagged names on a fixed interval
//! - [`file`]: rescans discovery files and pushes target group updates
//! - [`cache`]: keeps the latest file SD target groups
//! - [`gossip`]: snapshot view of the cluster membership
//! - [`reconcile`]: merges everything and counts duplicates

pub mod cache;
pub mod dns;
pub mod file;
pub mod gossip;
pub mod reconcile;

use std::path::PathBuf;

use thiserror::Error;

pub use cache::Cache;
pub use dns::{DnsResolver, Provider, QType, Resolver};
pub use file::{FileDiscovery, TargetGroup};
pub use gossip::{Membership, PeerMetadata, PeerState, PeerStateFetcher, PeerType};

/// Errors raised while discovering peers
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("unsupported lookup type {0:?}")]
    UnsupportedLookup(String),

    #[error("address {0:?} is missing a port")]
    MissingPort(String),

    #[error("lookup of {name} failed: {source}")]
    Lookup {
        name: String,
        #[source]
        source: trust_dns_resolver::error::ResolveError,
    },

    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unsupported discovery file format: {0}")]
    UnsupportedFormat(PathBuf),
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
