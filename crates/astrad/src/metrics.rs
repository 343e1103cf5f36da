//! Prometheus metrics for the anomaly guard
//!
//! One registry per process, constructed at startup and handed to components
//! as `Option<Arc<GuardMetrics>>`.

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry, Encoder,
    HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry, TextEncoder,
};
use std::sync::Arc;

use crate::supervisor::CircuitState;

/// Guard metrics for Prometheus
#[derive(Clone)]
pub struct GuardMetrics {
    // Circuit breakers
    pub breaker_state: IntGaugeVec,
    pub breaker_events_total: IntCounterVec,

    // Retry
    pub retry_attempts_total: IntCounterVec,
    pub retry_exhaustions_total: IntCounterVec,
    pub retry_delay_seconds: HistogramVec,

    // Detection
    pub detections_total: IntCounterVec,
    pub detection_latency_seconds: HistogramVec,
    pub fallback_activations_total: IntCounter,

    // Decisions
    pub anomalies_total: IntCounterVec,
    pub decisions_total: IntCounterVec,
    pub reporting_failures_total: IntCounter,

    registry: Arc<Registry>,
}

impl GuardMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let breaker_state = register_int_gauge_vec_with_registry!(
            "astra_breaker_state",
            "Circuit breaker state: 0=closed, 1=open, 2=half_open",
            &["breaker"],
            registry
        )?;

        let breaker_events_total = register_int_counter_vec_with_registry!(
            "astra_breaker_events_total",
            "Circuit breaker events by breaker and event (failure, success, trip, recovery, rejected)",
            &["breaker", "event"],
            registry
        )?;

        let retry_attempts_total = register_int_counter_vec_with_registry!(
            "astra_retry_attempts_total",
            "Total operation attempts made under a retry policy",
            &["policy"],
            registry
        )?;

        let retry_exhaustions_total = register_int_counter_vec_with_registry!(
            "astra_retry_exhaustions_total",
            "Total times a retry policy ran out of attempts",
            &["policy"],
            registry
        )?;

        let retry_delay_seconds = register_histogram_vec_with_registry!(
            "astra_retry_delay_seconds",
            "Realized backoff delay between attempts in seconds",
            &["policy"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0],
            registry
        )?;

        let detections_total = register_int_counter_vec_with_registry!(
            "astra_detections_total",
            "Total detections by evaluator (model or heuristic)",
            &["source"],
            registry
        )?;

        let detection_latency_seconds = register_histogram_vec_with_registry!(
            "astra_detection_latency_seconds",
            "Detection latency in seconds by evaluator",
            &["source"],
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0],
            registry
        )?;

        let fallback_activations_total = register_int_counter_with_registry!(
            "astra_fallback_activations_total",
            "Total times detection fell back to the heuristic evaluator",
            registry
        )?;

        let anomalies_total = register_int_counter_vec_with_registry!(
            "astra_anomalies_total",
            "Total anomalies handled by type and severity level",
            &["anomaly_type", "severity"],
            registry
        )?;

        let decisions_total = register_int_counter_vec_with_registry!(
            "astra_decisions_total",
            "Total recovery decisions by mission phase and response class",
            &["phase", "action"],
            registry
        )?;

        let reporting_failures_total = register_int_counter_with_registry!(
            "astra_reporting_failures_total",
            "Total decisions the reporting sink failed to persist",
            registry
        )?;

        Ok(Self {
            breaker_state,
            breaker_events_total,
            retry_attempts_total,
            retry_exhaustions_total,
            retry_delay_seconds,
            detections_total,
            detection_latency_seconds,
            fallback_activations_total,
            anomalies_total,
            decisions_total,
            reporting_failures_total,
            registry: Arc::new(registry),
        })
    }

    pub fn set_breaker_state(&self, breaker: &str, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        };
        self.breaker_state.with_label_values(&[breaker]).set(value);
    }

    pub fn record_breaker_event(&self, breaker: &str, event: &str) {
        self.breaker_events_total
            .with_label_values(&[breaker, event])
            .inc();
    }

    pub fn record_retry_attempt(&self, policy: &str) {
        self.retry_attempts_total.with_label_values(&[policy]).inc();
    }

    pub fn record_retry_exhaustion(&self, policy: &str) {
        self.retry_exhaustions_total.with_label_values(&[policy]).inc();
    }

    pub fn record_retry_delay(&self, policy: &str, delay_secs: f64) {
        self.retry_delay_seconds
            .with_label_values(&[policy])
            .observe(delay_secs);
    }

    pub fn record_detection(&self, source: &str, latency_secs: f64) {
        self.detections_total.with_label_values(&[source]).inc();
        self.detection_latency_seconds
            .with_label_values(&[source])
            .observe(latency_secs);
    }

    pub fn record_fallback(&self) {
        self.fallback_activations_total.inc();
    }

    pub fn record_anomaly(&self, anomaly_type: &str, severity: &str) {
        self.anomalies_total
            .with_label_values(&[anomaly_type, severity])
            .inc();
    }

    pub fn record_decision(&self, phase: &str, action: &str) {
        self.decisions_total.with_label_values(&[phase, action]).inc();
    }

    pub fn record_reporting_failure(&self) {
        self.reporting_failures_total.inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for GuardMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardMetrics").finish_non_exhaustive()
    }
}
