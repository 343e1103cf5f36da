//! Anomaly detection: model inference guarded by retry and a circuit breaker,
//! with a deterministic heuristic behind it.

pub mod gateway;
pub mod heuristic;
pub mod http_client;
pub mod ports;

pub use gateway::{AnomalyDetectionGateway, GatewayStats};
pub use heuristic::ThresholdHeuristic;
pub use http_client::{DisabledInferenceClient, HttpInferenceClient};
pub use ports::{HeuristicFallback, ModelInferenceClient, ScriptedInferenceClient};
