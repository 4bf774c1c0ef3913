//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use meshwatch::discovery::{DiscoveryError, DiscoveryResult, QType, Resolver};
use meshwatch::metrics::Subsystem;
use parking_lot::Mutex;
use prometheus::Registry;
use serde_json::{Value, json};
use wiremock::MockServer;

/// Fresh registry and subsystem, so every test owns its metrics
pub fn subsystem(name: &str) -> (Registry, Subsystem) {
    let registry = Registry::new();
    let subsystem = Subsystem::new(&registry, name);
    (registry, subsystem)
}

/// Value of a metric line in the text exposition, if present
pub fn metric_value(registry: &Registry, line_prefix: &str) -> Option<f64> {
    meshwatch::metrics::encode(registry)
        .ok()?
        .lines()
        .find(|line| line.starts_with(line_prefix))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}

/// `host:port` of a mock server, as used for query peers and stores
pub fn peer_addr(server: &MockServer) -> String {
    server.address().to_string()
}

/// Successful instant query response holding `samples`
pub fn vector_response(samples: &[(&[(&str, &str)], f64)]) -> Value {
    let result: Vec<Value> = samples
        .iter()
        .map(|(labels, value)| {
            let metric: HashMap<&str, &str> = labels.iter().copied().collect();
            json!({ "metric": metric, "value": [1_700_000_000.0, value.to_string()] })
        })
        .collect();
    json!({
        "status": "success",
        "data": { "resultType": "vector", "result": result }
    })
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Resolver answering from a fixed table
#[derive(Default)]
pub struct TableResolver {
    answers: Mutex<HashMap<String, Vec<String>>>,
}

impl TableResolver {
    pub fn with(answers: &[(&str, &[&str])]) -> Self {
        let resolver = Self::default();
        for (name, addrs) in answers {
            resolver.set(name, addrs);
        }
        resolver
    }

    pub fn set(&self, name: &str, addrs: &[&str]) {
        self.answers.lock().insert(
            name.to_string(),
            addrs.iter().map(|addr| addr.to_string()).collect(),
        );
    }

    pub fn remove(&self, name: &str) {
        self.answers.lock().remove(name);
    }
}

#[async_trait]
impl Resolver for TableResolver {
    async fn resolve(&self, name: &str, _qtype: QType) -> DiscoveryResult<Vec<String>> {
        self.answers
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| DiscoveryError::Lookup {
                name: name.to_string(),
                source: "no records".into(),
            })
    }
}
