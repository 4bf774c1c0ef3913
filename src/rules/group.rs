use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::Labels;
use crate::supervisor::repeat;

use super::file::{RuleConfig, RuleGroupConfig};
use super::{AlertState, AlertingRule, ManagerOptions, RecordingRule, RuleAlert};

pub enum Rule {
    Alerting(AlertingRule),
    Recording(RecordingRule),
}

impl Rule {
    fn from_config(config: RuleConfig) -> Self {
        let labels = Labels::from_pairs(config.labels);
        match (config.alert, config.record) {
            (Some(alert), _) => Rule::Alerting(AlertingRule::new(
                alert,
                config.expr,
                config.hold.unwrap_or_default(),
                labels,
                Labels::from_pairs(config.annotations),
            )),
            (None, record) => {
                Rule::Recording(RecordingRule::new(record.unwrap_or_default(), config.expr, labels))
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Rule::Alerting(rule) => rule.name(),
            Rule::Recording(rule) => rule.name(),
        }
    }

    pub fn expr(&self) -> &str {
        match self {
            Rule::Alerting(rule) => rule.expr(),
            Rule::Recording(rule) => rule.expr(),
        }
    }
}

/// Listing entry of a rule
#[derive(Debug, Clone, Serialize)]
pub struct RuleStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub expr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<AlertState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<RuleAlert>,
}

/// Listing entry of a group
#[derive(Debug, Clone, Serialize)]
pub struct GroupStatus {
    pub file: PathBuf,
    pub name: String,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub last_evaluation: Option<DateTime<Utc>>,
    pub rules: Vec<RuleStatus>,
}

/// Rules of one group, evaluated in order on a shared interval
pub struct Group {
    file: PathBuf,
    name: String,
    interval: Duration,
    rules: Vec<Rule>,
    last_evaluation: Mutex<Option<DateTime<Utc>>>,
}

impl Group {
    pub fn new(file: impl Into<PathBuf>, name: impl Into<String>, interval: Duration, rules: Vec<Rule>) -> Self {
        Self {
            file: file.into(),
            name: name.into(),
            interval,
            rules,
            last_evaluation: Mutex::new(None),
        }
    }

    pub(crate) fn from_config(file: &Path, config: RuleGroupConfig, default_interval: Duration) -> Self {
        Self::new(
            file,
            config.name,
            config.interval.unwrap_or(default_interval),
            config.rules.into_iter().map(Rule::from_config).collect(),
        )
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Take over alert state from the group this one replaces.
    pub fn copy_state(&self, previous: &Group) {
        for rule in &self.rules {
            let Rule::Alerting(rule) = rule else {
                continue;
            };
            let old = previous.rules.iter().find_map(|old| match old {
                Rule::Alerting(old) if old.name() == rule.name() => Some(old),
                _ => None,
            });
            if let Some(old) = old {
                rule.copy_state(old);
            }
        }
    }

    /// Evaluate every rule once at `ts`.
    #[instrument(skip_all, fields(group = %self.name))]
    pub async fn eval(&self, ts: DateTime<Utc>, opts: &ManagerOptions) {
        for rule in &self.rules {
            let vector = match opts.query.evaluate(rule.expr(), ts).await {
                Ok(vector) => vector,
                Err(e) => {
                    warn!(rule = %rule.name(), "evaluating rule failed: {e:#}");
                    continue;
                }
            };

            match rule {
                Rule::Alerting(alerting) => {
                    alerting.eval(&vector, ts);
                    let alerts = alerting.alerts_to_send(ts, opts.resend_delay);
                    if !alerts.is_empty() {
                        trace!(rule = %alerting.name(), "sending {} alerts", alerts.len());
                        opts.notify.notify(alerting.expr(), alerts).await;
                    }
                }
                Rule::Recording(recording) => {
                    if let Err(e) = opts.appender.append(recording.apply(vector)) {
                        warn!(rule = %recording.name(), "appending recorded samples failed: {e:#}");
                    }
                }
            }
        }
        *self.last_evaluation.lock() = Some(ts);
    }

    /// Evaluate on every interval tick until `cancel` fires.
    pub async fn run(self: Arc<Self>, opts: ManagerOptions, cancel: CancellationToken) -> anyhow::Result<()> {
        debug!(group = %self.name, file = %self.file.display(), "starting group");
        let group = &self;
        let opts = &opts;
        repeat(self.interval, cancel, move || async move {
            group.eval(Utc::now(), opts).await;
            Ok(())
        })
        .await?;
        debug!(group = %self.name, "group stopped");
        Ok(())
    }

    pub fn status(&self) -> GroupStatus {
        GroupStatus {
            file: self.file.clone(),
            name: self.name.clone(),
            interval: self.interval,
            last_evaluation: *self.last_evaluation.lock(),
            rules: self
                .rules
                .iter()
                .map(|rule| match rule {
                    Rule::Alerting(alerting) => RuleStatus {
                        name: alerting.name().to_string(),
                        kind: "alerting",
                        expr: alerting.expr().to_string(),
                        state: Some(alerting.state()),
                        alerts: alerting.alerts(),
                    },
                    Rule::Recording(recording) => RuleStatus {
                        name: recording.name().to_string(),
                        kind: "recording",
                        expr: recording.expr().to_string(),
                        state: None,
                        alerts: Vec::new(),
                    },
                })
                .collect(),
        }
    }
}
