//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `ledger_movements_total` - Committed movements, by kind
//! - `ledger_operation_duration_seconds` - Operation latency, by kind
//! - `ledger_rejections_total` - Validation rejections, by reason
//! - `ledger_lock_timeouts_total` - Balance-row lock acquisition timeouts

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed movements by kind
    pub movements_total: IntCounterVec,

    /// Operation latency histogram by kind
    pub operation_duration: HistogramVec,

    /// Rejected operations by reason (insufficient_funds, invalid_input, ...)
    pub rejections_total: IntCounterVec,

    /// Lock acquisition timeouts
    pub lock_timeouts_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let movements_total = IntCounterVec::new(
            Opts::new("ledger_movements_total", "Committed movements"),
            &["kind"],
        )?;
        registry.register(Box::new(movements_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Histogram of operation latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
            &["kind"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("ledger_rejections_total", "Rejected operations"),
            &["reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let lock_timeouts_total = IntCounter::new(
            "ledger_lock_timeouts_total",
            "Balance-row lock acquisition timeouts",
        )?;
        registry.register(Box::new(lock_timeouts_total.clone()))?;

        Ok(Self {
            movements_total,
            operation_duration,
            rejections_total,
            lock_timeouts_total,
            registry,
        })
    }

    /// Record a committed movement
    pub fn record_commit(&self, kind: &str, duration_secs: f64) {
        self.movements_total.with_label_values(&[kind]).inc();
        self.operation_duration
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    /// Record a rejected operation
    pub fn record_rejection(&self, reason: &str) {
        self.rejections_total.with_label_values(&[reason]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_count() {
        let metrics = Metrics::new().unwrap();

        metrics.record_commit("deposit", 0.002);
        metrics.record_commit("deposit", 0.004);
        metrics.record_rejection("insufficient_funds");

        assert_eq!(
            metrics.movements_total.with_label_values(&["deposit"]).get(),
            2
        );
        assert_eq!(
            metrics
                .rejections_total
                .with_label_values(&["insufficient_funds"])
                .get(),
            1
        );
    }

    #[test]
    fn test_independent_registries() {
        // Two collectors must not collide (one per engine in tests)
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_commit("transfer", 0.001);
        assert_eq!(b.movements_total.with_label_values(&["transfer"]).get(), 0);
    }
}
