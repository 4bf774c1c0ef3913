//! Alert delivery: notifier → queue → sender → Alertmanager
//!
//! These tests verify that:
//! - Firing and resolved alerts reach Alertmanager with external labels
//! - Excluded labels are dropped before sending
//! - Alertmanagers behind a `dns+` address are resolved before delivery

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use meshwatch::Labels;
use meshwatch::alert::{AlertmanagerSet, Notifier, Queue, Sender};
use meshwatch::rules::{AlertState, NotifyFunc, RuleAlert};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{TableResolver, subsystem};

fn firing(instance: &str) -> RuleAlert {
    let active_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    RuleAlert {
        labels: Labels::from_pairs([
            ("alertname", "InstanceDown"),
            ("instance", instance),
            ("replica", "rule-0"),
        ]),
        annotations: Labels::default(),
        state: AlertState::Firing,
        value: 0.0,
        active_at,
        fired_at: Some(active_at),
        resolved_at: None,
        last_sent_at: None,
    }
}

async fn received_alerts(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .flat_map(|request| {
            serde_json::from_slice::<Vec<Value>>(&request.body).unwrap_or_default()
        })
        .collect()
}

#[tokio::test]
async fn test_alerts_reach_alertmanager() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/alerts"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (_registry, subsystem) = subsystem("rule");
    let alertmanagers = Arc::new(
        AlertmanagerSet::new(
            &[server.uri()],
            Arc::new(TableResolver::default()),
            9093,
            &subsystem,
        )
        .unwrap(),
    );
    alertmanagers.update().await;

    let queue = Arc::new(
        Queue::new(100, 10, Labels::from_pairs([("cluster", "eu-1")]), &subsystem).unwrap(),
    );
    let sender = Arc::new(
        Sender::new(
            alertmanagers,
            Duration::from_secs(2),
            vec!["replica".to_string()],
            &subsystem,
        )
        .unwrap(),
    );
    let notifier = Notifier::new(queue.clone(), Url::parse("http://query:10902").unwrap());

    let cancel = CancellationToken::new();
    let running = {
        let sender = sender.clone();
        let queue = queue.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { sender.run(queue, cancel).await })
    };

    notifier.notify("up == 0", vec![firing("a"), firing("b")]).await;

    let mut alerts = Vec::new();
    for _ in 0..200 {
        alerts = received_alerts(&server).await;
        if alerts.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    running.await.unwrap();

    assert_eq!(alerts.len(), 2);
    assert_eq!(
        alerts[0]["labels"],
        json!({"alertname": "InstanceDown", "cluster": "eu-1", "instance": "a"})
    );
    assert_eq!(alerts[0]["startsAt"], "2023-11-14T22:13:20Z");
    assert_eq!(
        alerts[0]["generatorURL"],
        "http://query:10902/graph?g0.expr=up+%3D%3D+0&g0.tab=1"
    );
    assert!(alerts[0].get("endsAt").is_none());
}

#[tokio::test]
async fn test_dns_alertmanager_is_resolved() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prefix/api/v1/alerts"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let port = server.address().port();
    let resolver = Arc::new(TableResolver::default());
    resolver.set(
        &format!("alertmanager.example:{port}"),
        &[&server.address().to_string()],
    );

    let (_registry, subsystem) = subsystem("rule");
    let alertmanagers = Arc::new(
        AlertmanagerSet::new(
            &[format!("dns+http://alertmanager.example:{port}/prefix")],
            resolver,
            9093,
            &subsystem,
        )
        .unwrap(),
    );
    alertmanagers.update().await;
    assert_eq!(alertmanagers.get().len(), 1);

    let queue = Arc::new(Queue::new(100, 10, Labels::default(), &subsystem).unwrap());
    let sender = Sender::new(alertmanagers, Duration::from_secs(2), Vec::new(), &subsystem).unwrap();
    let notifier = Notifier::new(queue.clone(), Url::parse("http://query:10902").unwrap());

    notifier.notify("up == 0", vec![firing("a")]).await;
    let batch = queue.pop(&CancellationToken::new()).await.unwrap();
    sender.send(batch).await.unwrap();
    assert!(queue.is_empty());
}
