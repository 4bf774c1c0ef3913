//! Fan-out of instant queries over the query peers
//!
//! These tests verify that:
//! - The first peer that answers wins
//! - Every peer is tried exactly once before giving up
//! - An empty peer list fails without any request

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{DateTime, Utc};
use meshwatch::query::{QueryError, QueryExecutor};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{peer_addr, subsystem, vector_response};

fn executor(addrs: Vec<String>, seed: u64) -> QueryExecutor {
    let (_registry, subsystem) = subsystem("rule");
    QueryExecutor::new(
        Arc::new(move || addrs.clone()),
        Duration::from_secs(2),
        &subsystem,
    )
    .unwrap()
    .with_seed(seed)
}

fn eval_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

#[tokio::test]
async fn test_failing_peer_is_skipped() {
    let good = MockServer::start().await;
    let bad = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .and(query_param("query", "up"))
        .and(query_param("dedup", "true"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(vector_response(&[(&[("job", "node")], 1.0)])),
        )
        .expect(1)
        .mount(&good)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(0..=1)
        .mount(&bad)
        .await;

    let executor = executor(vec![peer_addr(&bad), peer_addr(&good)], 3);
    let vector = executor.query("up", eval_time()).await.unwrap();

    assert_eq!(vector.len(), 1);
    assert_eq!(vector[0].metric.get("job"), Some("node"));
    assert_eq!(vector[0].value, 1.0);
}

#[tokio::test]
async fn test_all_peers_failing() {
    let mut servers = Vec::new();
    for status in [500, 502, 503] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(&server)
            .await;
        servers.push(server);
    }

    let executor = executor(servers.iter().map(peer_addr).collect(), 7);
    let result = executor.query("up", eval_time()).await;

    assert_matches!(result, Err(QueryError::NoPeerReachable));
}

#[tokio::test]
async fn test_remote_error_counts_as_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
            "status": "error",
            "errorType": "bad_data",
            "error": "parse error at char 3"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let executor = executor(vec![peer_addr(&server)], 1);
    assert_matches!(
        executor.query("up{", eval_time()).await,
        Err(QueryError::NoPeerReachable)
    );
    assert_matches!(
        executor.query_peer(&peer_addr(&server), "up{", eval_time()).await,
        Err(QueryError::Remote { kind, .. }) if kind == "bad_data"
    );
}

#[tokio::test]
async fn test_no_peers() {
    let executor = executor(Vec::new(), 1);
    assert_matches!(
        executor.query("up", eval_time()).await,
        Err(QueryError::NoPeerReachable)
    );
}
