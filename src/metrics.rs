//! Operational metrics
//!
//! Every component receives an explicit [`prometheus::Registry`] in its
//! constructor and registers its own collectors there. Nothing is registered
//! globally, so tests can build as many components as they like side by side.
//!
//! [`Subsystem`] namespaces collector names the same way for every component:
//! `meshwatch_<subsystem>_<name>`.

use prometheus::core::Collector;
use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Namespace prefix of every exported metric
pub const NAMESPACE: &str = "meshwatch";

/// Registers collectors under a common `meshwatch_<subsystem>_` prefix
#[derive(Clone)]
pub struct Subsystem {
    registry: Registry,
    subsystem: String,
}

impl Subsystem {
    pub fn new(registry: &Registry, subsystem: impl Into<String>) -> Self {
        Self {
            registry: registry.clone(),
            subsystem: subsystem.into(),
        }
    }

    fn opts(&self, name: &str, help: &str) -> Opts {
        Opts::new(name, help)
            .namespace(NAMESPACE)
            .subsystem(self.subsystem.clone())
    }

    fn register<C: Collector + Clone + 'static>(&self, collector: C) -> prometheus::Result<C> {
        self.registry.register(Box::new(collector.clone()))?;
        Ok(collector)
    }

    pub fn int_counter(&self, name: &str, help: &str) -> prometheus::Result<IntCounter> {
        self.register(IntCounter::with_opts(self.opts(name, help))?)
    }

    pub fn int_counter_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> prometheus::Result<IntCounterVec> {
        self.register(IntCounterVec::new(self.opts(name, help), labels)?)
    }

    pub fn int_gauge(&self, name: &str, help: &str) -> prometheus::Result<IntGauge> {
        self.register(IntGauge::with_opts(self.opts(name, help))?)
    }

    pub fn gauge(&self, name: &str, help: &str) -> prometheus::Result<Gauge> {
        self.register(Gauge::with_opts(self.opts(name, help))?)
    }

    pub fn gauge_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> prometheus::Result<GaugeVec> {
        self.register(GaugeVec::new(self.opts(name, help), labels)?)
    }
}

/// Render every collector of `registry` in the Prometheus text format
pub fn encode(registry: &Registry) -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
