//! Rule loading, reloading and evaluation through the manager
//!
//! These tests verify that:
//! - A reload installs the groups and starts their evaluation
//! - Alerting rules hand firing alerts to the notifier
//! - Recording rules hand renamed samples to the appender
//! - A failing reload keeps the installed groups and flips the gauge

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshwatch::rules::{
    AlertState, Manager, ManagerOptions, NotifyFunc, QueryFunc, Reloader, RuleAlert,
    SampleAppender,
};
use meshwatch::{Labels, Sample, Vector};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use crate::helpers::{eventually, metric_value, subsystem, write_file};

const RULES: &str = r#"
groups:
  - name: node
    interval: 1h
    rules:
      - alert: InstanceDown
        expr: up == 0
        labels:
          severity: page
        annotations:
          summary: instance is down
      - record: job:up:sum
        expr: sum(up)
"#;

/// Answers every expression with one `up{instance="a"} 0` sample
struct DownQuery;

#[async_trait]
impl QueryFunc for DownQuery {
    async fn evaluate(&self, _expr: &str, time: DateTime<Utc>) -> anyhow::Result<Vector> {
        Ok(vec![Sample {
            metric: Labels::from_pairs([("__name__", "up"), ("instance", "a")]),
            timestamp: time,
            value: 0.0,
        }])
    }
}

#[derive(Default)]
struct Captured {
    alerts: Mutex<Vec<(String, RuleAlert)>>,
    samples: Mutex<Vec<Sample>>,
}

#[async_trait]
impl NotifyFunc for Captured {
    async fn notify(&self, expr: &str, alerts: Vec<RuleAlert>) {
        let mut captured = self.alerts.lock();
        for alert in alerts {
            captured.push((expr.to_string(), alert));
        }
    }
}

impl SampleAppender for Captured {
    fn append(&self, samples: Vector) -> anyhow::Result<()> {
        self.samples.lock().extend(samples);
        Ok(())
    }
}

fn manager(captured: &Arc<Captured>, cancel: &CancellationToken) -> Arc<Manager> {
    Arc::new(Manager::new(
        ManagerOptions::new(Arc::new(DownQuery), captured.clone(), captured.clone()),
        cancel.clone(),
    ))
}

#[tokio::test]
async fn test_reload_installs_and_evaluates_groups() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "node.yml", RULES);

    let captured = Arc::new(Captured::default());
    let cancel = CancellationToken::new();
    let manager = manager(&captured, &cancel);

    let (registry, subsystem) = subsystem("rule");
    let reloader = Reloader::new(
        manager.clone(),
        vec![format!("{}/*.yml", dir.path().display())],
        Duration::from_secs(30),
        &subsystem,
    )
    .unwrap();
    reloader.reload().unwrap();

    assert_eq!(manager.groups().len(), 1);
    assert_eq!(manager.groups()[0].interval(), Duration::from_secs(3600));
    assert_eq!(
        metric_value(&registry, "meshwatch_rule_config_last_reload_successful"),
        Some(1.0)
    );

    assert!(
        eventually(Duration::from_secs(2), || {
            !captured.alerts.lock().is_empty() && !captured.samples.lock().is_empty()
        })
        .await
    );

    let (expr, alert) = captured.alerts.lock()[0].clone();
    assert_eq!(expr, "up == 0");
    assert_eq!(alert.state, AlertState::Firing);
    assert_eq!(
        alert.labels,
        Labels::from_pairs([
            ("alertname", "InstanceDown"),
            ("instance", "a"),
            ("severity", "page")
        ])
    );
    assert_eq!(alert.annotations.get("summary"), Some("instance is down"));

    let sample = captured.samples.lock()[0].clone();
    assert_eq!(sample.metric.get("__name__"), Some("job:up:sum"));

    cancel.cancel();
}

#[tokio::test]
async fn test_failed_reload_keeps_installed_groups() {
    let dir = tempdir().unwrap();
    let path = write_file(dir.path(), "node.yml", RULES);

    let captured = Arc::new(Captured::default());
    let cancel = CancellationToken::new();
    let manager = manager(&captured, &cancel);

    let (registry, subsystem) = subsystem("rule");
    let reloader = Reloader::new(
        manager.clone(),
        vec![format!("{}/*.yml", dir.path().display())],
        Duration::from_secs(30),
        &subsystem,
    )
    .unwrap();
    reloader.reload().unwrap();

    std::fs::write(&path, "groups:\n  - name: node\n    rules:\n      - expr: up\n").unwrap();
    assert!(reloader.reload().is_err());

    assert_eq!(manager.groups().len(), 1);
    assert_eq!(manager.groups()[0].rules().len(), 2);
    assert_eq!(
        metric_value(&registry, "meshwatch_rule_config_last_reload_successful"),
        Some(0.0)
    );

    cancel.cancel();
}
