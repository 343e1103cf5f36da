//! AstraGuard daemon library
//!
//! Resilience-wrapped anomaly detection and mission-phase-aware recovery
//! decisions. The `astrad` binary wires these together from a TOML config.

pub mod detection;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod policy;
pub mod recurrence;
pub mod supervisor;
pub mod tracer;

pub use detection::AnomalyDetectionGateway;
pub use handler::PhaseAwareAnomalyHandler;
pub use metrics::GuardMetrics;
pub use pipeline::{GuardPipeline, TelemetryFrame};
pub use policy::PolicyResolver;
pub use recurrence::RecurrenceTracker;
pub use supervisor::{BreakerRegistry, CircuitBreaker, RetryExecutor};
pub use tracer::DecisionTracer;
