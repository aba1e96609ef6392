//! Reconcile metrics
//!
//! Counts and times every reconcile per controller; rendered in the Prometheus
//! text format by the probe server.

use prometheus::{histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder};
use std::time::Duration;

const NAMESPACE: &str = "fabric";

/// Result label for successful reconciles
pub const RESULT_SUCCESS: &str = "success";

/// Result label for failed reconciles
pub const RESULT_ERROR: &str = "error";

#[derive(Debug, Clone)]
pub struct ReconcileMetrics {
    registry: Registry,
    reconciles: IntCounterVec,
    duration: HistogramVec,
}

impl ReconcileMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciles = IntCounterVec::new(
            opts!("reconcile_total", "Reconciles by controller and result").namespace(NAMESPACE),
            &["controller", "result"],
        )?;
        let duration = HistogramVec::new(
            histogram_opts!(
                "reconcile_duration_seconds",
                "Time spent in a reconcile",
                vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
            )
            .namespace(NAMESPACE),
            &["controller"],
        )?;
        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            reconciles,
            duration,
        })
    }

    /// Record one finished reconcile
    pub fn observe(&self, controller: &str, result: &str, elapsed: Duration) {
        self.reconciles
            .with_label_values(&[controller, result])
            .inc();
        self.duration
            .with_label_values(&[controller])
            .observe(elapsed.as_secs_f64());
    }

    pub fn count(&self, controller: &str, result: &str) -> u64 {
        self.reconciles
            .with_label_values(&[controller, result])
            .get()
    }

    /// Text exposition of every metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
