use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use prometheus::{IntCounter, IntCounterVec};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::metrics::Subsystem;

use super::{Alert, AlertError, AlertmanagerSet, Queue};

/// Path alerts are posted to, relative to the Alertmanager base URL
const ALERTS_PATH: &str = "api/v1/alerts";

/// Delivers alert batches to every resolved Alertmanager
pub struct Sender {
    alertmanagers: Arc<AlertmanagerSet>,
    client: Client,

    /// Labels removed from every alert before sending
    label_drop: Vec<String>,

    sent: IntCounterVec,
    errors: IntCounterVec,
    dropped: IntCounter,
}

impl Sender {
    pub fn new(
        alertmanagers: Arc<AlertmanagerSet>,
        timeout: Duration,
        label_drop: Vec<String>,
        subsystem: &Subsystem,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            alertmanagers,
            client: Client::builder().timeout(timeout).build()?,
            label_drop,
            sent: subsystem.int_counter_vec(
                "alert_sender_alerts_sent_total",
                "Total number of alerts sent by alertmanager",
                &["alertmanager"],
            )?,
            errors: subsystem.int_counter_vec(
                "alert_sender_errors_total",
                "Total number of errors while sending alerts to alertmanager",
                &["alertmanager"],
            )?,
            dropped: subsystem.int_counter(
                "alert_sender_alerts_dropped_total",
                "Total number of alerts dropped in case of all sends to alertmanagers failed",
            )?,
        })
    }

    /// Send a batch to all Alertmanagers at once.
    ///
    /// Succeeds as soon as one of them accepted the batch.
    #[instrument(skip_all, fields(alerts = alerts.len()))]
    pub async fn send(&self, mut alerts: Vec<Alert>) -> Result<(), AlertError> {
        if alerts.is_empty() {
            return Ok(());
        }

        for alert in &mut alerts {
            for name in &self.label_drop {
                alert.labels.remove(name);
            }
        }

        let urls = self.alertmanagers.get();
        if urls.is_empty() {
            self.dropped.inc_by(alerts.len() as u64);
            return Err(AlertError::NoEndpoints);
        }

        let body = serde_json::to_vec(&alerts)?;
        let results = join_all(urls.iter().map(|url| self.post(url, body.clone()))).await;

        let mut delivered = false;
        for (url, result) in urls.iter().zip(results) {
            let key = url.as_str();
            match result {
                Ok(()) => {
                    self.sent
                        .with_label_values(&[key])
                        .inc_by(alerts.len() as u64);
                    delivered = true;
                }
                Err(e) => {
                    self.errors.with_label_values(&[key]).inc();
                    warn!("{e}");
                }
            }
        }

        if delivered {
            debug!("delivered {} alerts", alerts.len());
            Ok(())
        } else {
            self.dropped.inc_by(alerts.len() as u64);
            Err(AlertError::AllFailed)
        }
    }

    async fn post(&self, base: &Url, body: Vec<u8>) -> Result<(), AlertError> {
        let url = alerts_url(base);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|source| AlertError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// Drain `queue` until `cancel` fires.
    pub async fn run(&self, queue: Arc<Queue>, cancel: CancellationToken) {
        info!("alert sender started");
        while let Some(batch) = queue.pop(&cancel).await {
            if let Err(e) = self.send(batch).await {
                error!("sending alerts failed: {e}");
            }
        }
        info!("alert sender stopped");
    }
}

fn alerts_url(base: &Url) -> String {
    let base = base.as_str().trim_end_matches('/');
    format!("{base}/{ALERTS_PATH}")
}
