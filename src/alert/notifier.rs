use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::rules::{AlertState, NotifyFunc, RuleAlert};

use super::{Alert, Queue};

/// Turns rule alerts into outgoing alerts and queues them
pub struct Notifier {
    queue: Arc<Queue>,

    /// Base of the generator URL attached to every alert
    query_url: Url,
}

impl Notifier {
    pub fn new(queue: Arc<Queue>, query_url: Url) -> Self {
        Self { queue, query_url }
    }

    fn generator_url(&self, expr: &str) -> String {
        let mut url = self.query_url.clone();
        let path = format!("{}/graph", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("g0.expr", expr)
            .append_pair("g0.tab", "1");
        url.to_string()
    }
}

#[async_trait]
impl NotifyFunc for Notifier {
    async fn notify(&self, expr: &str, alerts: Vec<RuleAlert>) {
        let generator_url = self.generator_url(expr);
        let alerts = alerts
            .into_iter()
            .filter(|alert| alert.state != AlertState::Pending)
            .map(|alert| Alert {
                starts_at: alert.fired_at.unwrap_or(alert.active_at),
                ends_at: alert.resolved_at,
                labels: alert.labels,
                annotations: alert.annotations,
                generator_url: generator_url.clone(),
            })
            .collect();
        self.queue.push(alerts);
    }
}
