//! Rule evaluation
//!
//! ## Message Flow
//!
//! ```text
//! startup / POST /-/reload / SIGHUP
//!        │  (capacity one channel, extra signals are absorbed)
//!        ▼
//!   Reloader ──glob──▶ Manager::update ──▶ load + validate files
//!                            │                 │ error: keep previous groups
//!                            ▼
//!                  install new groups, carry alert state over,
//!                  stop previous loops, start one loop per group
//!
//!   group loop (every interval):
//!        QueryFunc::evaluate(expr) ──▶ alerting rule ──▶ NotifyFunc::notify(firing / resolved)
//!                                 └──▶ recording rule ──▶ SampleAppender::append
//! ```

mod alerting;
pub mod file;
mod group;
mod manager;
mod recording;
pub mod reload;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::Vector;
use crate::query::QueryExecutor;

pub use alerting::{AlertState, AlertingRule, RuleAlert};
pub use group::{Group, GroupStatus, Rule, RuleStatus};
pub use manager::{Manager, ManagerOptions};
pub use recording::RecordingRule;
pub use reload::{LoadedGroup, ReloadHandle, Reloader, RuleLoader, reload_channel};

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{path}: {message}")]
    Invalid { path: PathBuf, message: String },

    #[error("building name pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Evaluates an expression at a point in time
#[async_trait]
pub trait QueryFunc: Send + Sync {
    async fn evaluate(&self, expr: &str, time: DateTime<Utc>) -> anyhow::Result<Vector>;
}

#[async_trait]
impl QueryFunc for QueryExecutor {
    async fn evaluate(&self, expr: &str, time: DateTime<Utc>) -> anyhow::Result<Vector> {
        Ok(self.query(expr, time).await?)
    }
}

/// Receives the alerts of an alerting rule that are due for delivery
#[async_trait]
pub trait NotifyFunc: Send + Sync {
    async fn notify(&self, expr: &str, alerts: Vec<RuleAlert>);
}

/// Receives the output of recording rules
pub trait SampleAppender: Send + Sync {
    fn append(&self, samples: Vector) -> anyhow::Result<()>;
}

/// Appender for nodes without local storage
pub struct LogAppender;

impl SampleAppender for LogAppender {
    fn append(&self, samples: Vector) -> anyhow::Result<()> {
        for sample in samples {
            debug!(
                "recorded {} = {} @ {}",
                sample.metric, sample.value, sample.timestamp
            );
        }
        Ok(())
    }
}
