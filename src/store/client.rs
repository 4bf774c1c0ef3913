use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::Serialize;
use tracing::trace;

use crate::Labels;

/// Metadata a store reports about itself
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreInfo {
    pub labels: Labels,
    pub min_time: i64,
    pub max_time: i64,
}

impl Default for StoreInfo {
    fn default() -> Self {
        Self {
            labels: Labels::default(),
            min_time: i64::MIN,
            max_time: i64::MAX,
        }
    }
}

/// Connection to a single store
#[async_trait]
pub trait StoreClient: Send + Sync {
    fn addr(&self) -> &str;

    async fn info(&self) -> anyhow::Result<StoreInfo>;

    async fn close(&self);
}

/// Opens [`StoreClient`]s. Opening is lazy, no I/O happens until the first
/// call on the client.
pub trait StoreDialer: Send + Sync {
    fn dial(&self, addr: &str) -> anyhow::Result<Arc<dyn StoreClient>>;
}

/// Dials stores over HTTP, probing their health endpoint
pub struct HttpStoreDialer {
    client: reqwest::Client,
}

impl HttpStoreDialer {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building store HTTP client")?;
        Ok(Self { client })
    }
}

impl StoreDialer for HttpStoreDialer {
    fn dial(&self, addr: &str) -> anyhow::Result<Arc<dyn StoreClient>> {
        let health_url = url::Url::parse(&format!("http://{addr}/-/healthy"))
            .with_context(|| format!("invalid store address {addr}"))?;
        Ok(Arc::new(HttpStoreClient {
            addr: addr.to_string(),
            health_url,
            client: self.client.clone(),
        }))
    }
}

struct HttpStoreClient {
    addr: String,
    health_url: url::Url,
    client: reqwest::Client,
}

#[async_trait]
impl StoreClient for HttpStoreClient {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn info(&self) -> anyhow::Result<StoreInfo> {
        let response = self
            .client
            .get(self.health_url.clone())
            .send()
            .await
            .with_context(|| format!("probing {}", self.addr))?;
        if !response.status().is_success() {
            bail!("store {} is unhealthy: {}", self.addr, response.status());
        }
        // plain HTTP stores do not report labels or time ranges
        Ok(StoreInfo::default())
    }

    async fn close(&self) {
        trace!("closing store client {}", self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_healthy_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/-/healthy"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dialer = HttpStoreDialer::new(Duration::from_secs(1)).unwrap();
        let client = dialer.dial(&server.address().to_string()).unwrap();

        assert_eq!(client.info().await.unwrap(), StoreInfo::default());
    }

    #[tokio::test]
    async fn test_unhealthy_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/-/healthy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dialer = HttpStoreDialer::new(Duration::from_secs(1)).unwrap();
        let client = dialer.dial(&server.address().to_string()).unwrap();

        assert!(client.info().await.is_err());
    }

    #[test]
    fn test_dial_rejects_garbage() {
        let dialer = HttpStoreDialer::new(Duration::from_secs(1)).unwrap();
        assert!(dialer.dial("not an address").is_err());
    }
}
