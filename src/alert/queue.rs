use std::collections::VecDeque;

use parking_lot::Mutex;
use prometheus::{IntCounter, IntGauge};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::Labels;
use crate::metrics::Subsystem;

use super::Alert;

/// Bounded alert buffer
///
/// Pushing never blocks. Once the buffer is full the oldest alerts make
/// room for new ones.
pub struct Queue {
    capacity: usize,
    max_batch_size: usize,

    /// Added to every alert that does not carry the label yet
    external_labels: Labels,

    alerts: Mutex<VecDeque<Alert>>,
    more: Notify,

    pushed: IntCounter,
    popped: IntCounter,
    dropped: IntCounter,
    length: IntGauge,
}

impl Queue {
    pub fn new(
        capacity: usize,
        max_batch_size: usize,
        external_labels: Labels,
        subsystem: &Subsystem,
    ) -> prometheus::Result<Self> {
        Ok(Self {
            capacity: capacity.max(1),
            max_batch_size: max_batch_size.max(1),
            external_labels,
            alerts: Mutex::new(VecDeque::new()),
            more: Notify::new(),
            pushed: subsystem.int_counter("alert_queue_alerts_pushed_total", "The total number of alerts pushed to the queue")?,
            popped: subsystem.int_counter("alert_queue_alerts_popped_total", "The total number of alerts popped from the queue")?,
            dropped: subsystem.int_counter("alert_queue_alerts_dropped_total", "The total number of alerts that were dropped from the queue")?,
            length: subsystem.int_gauge("alert_queue_length", "The number of alerts in the queue")?,
        })
    }

    pub fn push(&self, alerts: Vec<Alert>) {
        if alerts.is_empty() {
            return;
        }
        let count = alerts.len();

        let mut queued = self.alerts.lock();
        for mut alert in alerts {
            for label in self.external_labels.iter() {
                if alert.labels.get(&label.name).is_none() {
                    alert.labels.set(label.name.clone(), label.value.clone());
                }
            }
            queued.push_back(alert);
        }

        let overflow = queued.len().saturating_sub(self.capacity);
        if overflow > 0 {
            queued.drain(..overflow);
            self.dropped.inc_by(overflow as u64);
            warn!("alert queue full, dropped {overflow} oldest alerts");
        }

        self.pushed.inc_by(count as u64);
        self.length.set(queued.len() as i64);
        drop(queued);

        self.more.notify_one();
    }

    /// Wait for the next batch of at most the batch size.
    ///
    /// Returns `None` once `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<Vec<Alert>> {
        loop {
            {
                let mut queued = self.alerts.lock();
                if !queued.is_empty() {
                    let count = queued.len().min(self.max_batch_size);
                    let batch: Vec<Alert> = queued.drain(..count).collect();
                    self.popped.inc_by(count as u64);
                    self.length.set(queued.len() as i64);
                    if !queued.is_empty() {
                        self.more.notify_one();
                    }
                    return Some(batch);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.more.notified() => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }
}
