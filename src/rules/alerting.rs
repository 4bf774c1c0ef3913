use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::{ALERT_NAME_LABEL, Labels, METRIC_NAME_LABEL, Vector};

/// Resolved alerts are kept this long so the resolution gets delivered
const RESOLVED_RETENTION: TimeDelta = TimeDelta::minutes(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Inactive,
    Pending,
    Firing,
}

/// Alert instance of an alerting rule, one per result series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleAlert {
    pub labels: Labels,
    pub annotations: Labels,
    pub state: AlertState,
    pub value: f64,
    pub active_at: DateTime<Utc>,
    pub fired_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub last_sent_at: Option<DateTime<Utc>>,
}

impl RuleAlert {
    fn needs_sending(&self, ts: DateTime<Utc>, resend_delay: TimeDelta) -> bool {
        if self.state == AlertState::Pending {
            return false;
        }
        let Some(last_sent) = self.last_sent_at else {
            return true;
        };
        if self.resolved_at.is_some_and(|resolved| resolved > last_sent) {
            return true;
        }
        last_sent
            .checked_add_signed(resend_delay)
            .is_some_and(|due| due <= ts)
    }
}

pub struct AlertingRule {
    name: String,
    expr: String,

    /// How long a series must be present before the alert fires
    hold: TimeDelta,

    labels: Labels,
    annotations: Labels,

    /// Alerts keyed by their label set
    active: Mutex<HashMap<Labels, RuleAlert>>,
}

impl AlertingRule {
    pub fn new(
        name: impl Into<String>,
        expr: impl Into<String>,
        hold: Duration,
        labels: Labels,
        annotations: Labels,
    ) -> Self {
        Self {
            name: name.into(),
            expr: expr.into(),
            hold: TimeDelta::from_std(hold).unwrap_or(TimeDelta::MAX),
            labels,
            annotations,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Advance the state of every alert with the query result at `ts`.
    pub fn eval(&self, vector: &Vector, ts: DateTime<Utc>) {
        let mut active = self.active.lock();
        let mut present = HashSet::with_capacity(vector.len());

        for sample in vector {
            let mut labels = sample.metric.clone();
            labels.remove(METRIC_NAME_LABEL);
            for label in self.labels.iter() {
                labels.set(label.name.clone(), label.value.clone());
            }
            labels.set(ALERT_NAME_LABEL, self.name.clone());

            if !present.insert(labels.clone()) {
                warn!(rule = %self.name, "result contains {labels} more than once, ignoring duplicate");
                continue;
            }

            match active.get_mut(&labels) {
                Some(alert) if alert.state != AlertState::Inactive => {
                    alert.value = sample.value;
                    alert.annotations = self.annotations.clone();
                }
                _ => {
                    active.insert(
                        labels.clone(),
                        RuleAlert {
                            labels,
                            annotations: self.annotations.clone(),
                            state: AlertState::Pending,
                            value: sample.value,
                            active_at: ts,
                            fired_at: None,
                            resolved_at: None,
                            last_sent_at: None,
                        },
                    );
                }
            }
        }

        active.retain(|labels, alert| {
            if present.contains(labels) {
                if alert.state == AlertState::Pending && ts - alert.active_at >= self.hold {
                    alert.state = AlertState::Firing;
                    alert.fired_at = Some(ts);
                }
                return true;
            }

            match alert.state {
                AlertState::Pending => false,
                AlertState::Firing => {
                    alert.state = AlertState::Inactive;
                    alert.resolved_at = Some(ts);
                    true
                }
                AlertState::Inactive => alert
                    .resolved_at
                    .is_some_and(|resolved| ts - resolved < RESOLVED_RETENTION),
            }
        });
    }

    /// Alerts due for delivery at `ts`, marked as sent.
    pub fn alerts_to_send(&self, ts: DateTime<Utc>, resend_delay: Duration) -> Vec<RuleAlert> {
        let resend_delay = TimeDelta::from_std(resend_delay).unwrap_or(TimeDelta::MAX);
        let mut active = self.active.lock();
        active
            .values_mut()
            .filter(|alert| alert.needs_sending(ts, resend_delay))
            .map(|alert| {
                alert.last_sent_at = Some(ts);
                alert.clone()
            })
            .collect()
    }

    /// Snapshot of all current alerts
    pub fn alerts(&self) -> Vec<RuleAlert> {
        let mut alerts: Vec<_> = self.active.lock().values().cloned().collect();
        alerts.sort_by(|a, b| a.labels.cmp(&b.labels));
        alerts
    }

    /// Most severe state among the current alerts
    pub fn state(&self) -> AlertState {
        self.active
            .lock()
            .values()
            .map(|alert| alert.state)
            .max()
            .unwrap_or(AlertState::Inactive)
    }

    /// Take over the alerts of the rule this one replaces.
    pub fn copy_state(&self, previous: &AlertingRule) {
        let alerts = previous.active.lock().clone();
        *self.active.lock() = alerts;
    }
}
