//! Integration tests for the HTTP surface of both nodes
//!
//! These tests verify that:
//! - Health and metrics endpoints answer on both nodes
//! - Reload requests are coalesced with a pending reload
//! - Store and rule listings reflect the running components

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Utc};
use meshwatch::alert::Queue;
use meshwatch::api::{self, QueryApiState, RuleApiState};
use meshwatch::rules::{
    LogAppender, Manager, ManagerOptions, NotifyFunc, QueryFunc, RuleAlert, reload_channel,
};
use meshwatch::store::{HttpStoreDialer, StoreSet, StoreSpec};
use meshwatch::{Labels, Vector};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{peer_addr, subsystem};

// Helper to serve a router on a random local port
async fn spawn_test_api(router: Router, cancel: &CancellationToken) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(api::serve(listener, router, cancel.clone()));
    addr
}

struct NoQuery;

#[async_trait]
impl QueryFunc for NoQuery {
    async fn evaluate(&self, _expr: &str, _time: DateTime<Utc>) -> anyhow::Result<Vector> {
        Ok(Vector::new())
    }
}

struct NoNotify;

#[async_trait]
impl NotifyFunc for NoNotify {
    async fn notify(&self, _expr: &str, _alerts: Vec<RuleAlert>) {}
}

#[tokio::test]
async fn test_query_node_lists_healthy_stores() {
    let store = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/-/healthy"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&store)
        .await;
    let store_addr = peer_addr(&store);

    let (registry, subsystem) = subsystem("query");
    let specs = {
        let store_addr = store_addr.clone();
        move || vec![StoreSpec::plain(store_addr.clone())]
    };
    let stores = Arc::new(
        StoreSet::new(
            Arc::new(specs),
            Arc::new(HttpStoreDialer::new(Duration::from_secs(2)).unwrap()),
            3,
            Duration::from_secs(2),
            &subsystem,
        )
        .unwrap(),
    );
    stores.update().await;

    let cancel = CancellationToken::new();
    let addr = spawn_test_api(
        api::query_router(QueryApiState {
            registry,
            stores,
        }),
        &cancel,
    )
    .await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{addr}/-/healthy"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = client
        .get(format!("http://{addr}/api/v1/stores"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["stores"][0]["addr"], store_addr.as_str());

    let metrics = client
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("meshwatch_query_store_nodes 1"));

    cancel.cancel();
}

#[tokio::test]
async fn test_rule_node_reload_and_listing() {
    let (registry, subsystem) = subsystem("rule");
    let _queue = Queue::new(10, 10, Labels::default(), &subsystem).unwrap();

    let cancel = CancellationToken::new();
    let manager = Arc::new(Manager::new(
        ManagerOptions::new(Arc::new(NoQuery), Arc::new(NoNotify), Arc::new(LogAppender)),
        cancel.child_token(),
    ));
    let (reload, mut reload_requests) = reload_channel();

    let addr = spawn_test_api(
        api::rule_router(RuleApiState {
            registry,
            manager,
            reload,
        }),
        &cancel,
    )
    .await;
    let client = reqwest::Client::new();
    let reload_url = format!("http://{addr}/-/reload");

    // the startup reload is still pending and absorbs this request
    let body: Value = client.post(&reload_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["queued"], false);

    reload_requests.recv().await.unwrap();
    let body: Value = client.post(&reload_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["queued"], true);

    let body: Value = client
        .get(format!("http://{addr}/api/v1/rules"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["groups"], Value::Array(Vec::new()));

    let metrics = client
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("meshwatch_rule_alert_queue_length 0"));

    cancel.cancel();
}
