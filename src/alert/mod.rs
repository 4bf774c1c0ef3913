//! Alert delivery
//!
//! ## Message Flow
//!
//! ```text
//! rule group ──notify──▶ Notifier ──push──▶ Queue (bounded, drops oldest)
//!                                              │
//!                                              │ pop(batch)
//!                                              ▼
//!                                           Sender ──POST /api/v1/alerts──▶ every resolved Alertmanager
//!                                              ▲
//!                            AlertmanagerSet ──┘ (re-resolved on an interval)
//! ```
//!
//! A batch counts as delivered once a single Alertmanager accepted it.

mod alertmanager;
mod notifier;
mod queue;
mod sender;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Labels;
use crate::discovery::DiscoveryError;

pub use alertmanager::AlertmanagerSet;
pub use notifier::Notifier;
pub use queue::Queue;
pub use sender::Sender;

/// Alert as sent to Alertmanager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub labels: Labels,
    pub annotations: Labels,
    pub starts_at: DateTime<Utc>,

    /// Set once the alert resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,

    #[serde(rename = "generatorURL")]
    pub generator_url: String,
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("invalid Alertmanager URL {url:?}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("encoding alerts: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sending to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },

    #[error("no Alertmanager to send to")]
    NoEndpoints,

    #[error("no Alertmanager accepted the alerts")]
    AllFailed,
}
