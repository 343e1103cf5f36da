//! Resilient detection entry point
//!
//! Model inference runs under a retry executor; the retried call is the
//! operation protected by a circuit breaker whose fallback is the heuristic.
//! An exhausted retry therefore reaches the breaker as one failure.

use super::ports::{HeuristicFallback, ModelInferenceClient};
use crate::metrics::GuardMetrics;
use crate::supervisor::{BreakerRegistry, CircuitBreaker, RetryError, RetryExecutor};
use astra_common::{
    AstraConfig, ConfigError, Detection, DetectionSource, Features, InferenceError, ValidationError,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Counts of detections by evaluator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub model_detections: u64,
    pub heuristic_detections: u64,
}

pub struct AnomalyDetectionGateway {
    model: Arc<dyn ModelInferenceClient>,
    heuristic: Arc<dyn HeuristicFallback>,
    retry: Arc<RetryExecutor>,
    breaker: Arc<CircuitBreaker>,
    model_detections: AtomicU64,
    heuristic_detections: AtomicU64,
    metrics: Option<Arc<GuardMetrics>>,
}

impl AnomalyDetectionGateway {
    pub fn new(
        model: Arc<dyn ModelInferenceClient>,
        heuristic: Arc<dyn HeuristicFallback>,
        retry: Arc<RetryExecutor>,
        breaker: Arc<CircuitBreaker>,
        metrics: Option<Arc<GuardMetrics>>,
    ) -> Self {
        Self {
            model,
            heuristic,
            retry,
            breaker,
            model_detections: AtomicU64::new(0),
            heuristic_detections: AtomicU64::new(0),
            metrics,
        }
    }

    /// Wire the gateway to the breaker and retry policy named under `[model]`
    pub fn from_config(
        config: &AstraConfig,
        registry: &BreakerRegistry,
        model: Arc<dyn ModelInferenceClient>,
        heuristic: Arc<dyn HeuristicFallback>,
        metrics: Option<Arc<GuardMetrics>>,
    ) -> Result<Self, ConfigError> {
        let breaker_config = config.breakers.get(&config.model.breaker).ok_or_else(|| {
            ConfigError::Invalid(format!("model breaker '{}' is not defined", config.model.breaker))
        })?;
        let retry_config = config.retry.get(&config.model.retry_policy).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "model retry policy '{}' is not defined",
                config.model.retry_policy
            ))
        })?;

        let breaker = registry.get_or_register(&config.model.breaker, breaker_config.clone());
        let retry = Arc::new(RetryExecutor::from_config(
            config.model.retry_policy.clone(),
            retry_config,
            metrics.clone(),
        ));

        Ok(Self::new(model, heuristic, retry, breaker, metrics))
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry(&self) -> &Arc<RetryExecutor> {
        &self.retry
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            model_detections: self.model_detections.load(Ordering::Relaxed),
            heuristic_detections: self.heuristic_detections.load(Ordering::Relaxed),
        }
    }

    /// Classify one feature vector. Invalid input is rejected before any
    /// breaker or retry state is touched; every other path yields a detection.
    pub async fn detect(&self, features: &Features) -> Result<Detection, ValidationError> {
        features.validate()?;
        let started = Instant::now();

        let model = Arc::clone(&self.model);
        let retry = Arc::clone(&self.retry);
        let owned = features.clone();
        let operation = async move {
            let (is_anomaly, score) = retry.execute(|| model.infer(&owned)).await?;
            Ok::<_, RetryError<InferenceError>>(Detection {
                is_anomaly,
                score: score.clamp(0.0, 1.0),
                source: DetectionSource::Model,
            })
        };

        let detection = self
            .breaker
            .call(operation, |_| {
                let (is_anomaly, score) = self.heuristic.evaluate(features);
                Detection {
                    is_anomaly,
                    score: score.clamp(0.0, 1.0),
                    source: DetectionSource::Heuristic,
                }
            })
            .await;

        match detection.source {
            DetectionSource::Model => {
                self.model_detections.fetch_add(1, Ordering::Relaxed);
            }
            DetectionSource::Heuristic => {
                self.heuristic_detections.fetch_add(1, Ordering::Relaxed);
                if let Some(ref m) = self.metrics {
                    m.record_fallback();
                }
            }
        }

        let latency = started.elapsed();
        if let Some(ref m) = self.metrics {
            m.record_detection(detection.source.as_str(), latency.as_secs_f64());
        }
        debug!(
            source = detection.source.as_str(),
            is_anomaly = detection.is_anomaly,
            score = detection.score,
            latency_ms = latency.as_millis() as u64,
            "detection complete"
        );

        Ok(detection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{ScriptedInferenceClient, ThresholdHeuristic};
    use crate::supervisor::{CircuitState, RetryPolicy};
    use astra_common::{BreakerConfig, HeuristicConfig, JitterType};
    use std::time::Duration;

    fn gateway(client: Arc<ScriptedInferenceClient>, failure_threshold: u32) -> AnomalyDetectionGateway {
        let retry = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1), JitterType::Full);
        AnomalyDetectionGateway::new(
            client,
            Arc::new(ThresholdHeuristic::new(HeuristicConfig::default())),
            Arc::new(RetryExecutor::new("model_inference", retry, None)),
            Arc::new(CircuitBreaker::new(
                "anomaly_model",
                BreakerConfig::new(failure_threshold, 1, Duration::from_secs(60)),
                None,
            )),
            None,
        )
    }

    fn hot_reading() -> Features {
        Features::new().with("voltage", 6.0).with("temperature", 50.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_result_is_used_when_healthy() {
        let client = Arc::new(ScriptedInferenceClient::always(Ok((true, 0.93))));
        let gw = gateway(Arc::clone(&client), 3);

        let detection = gw.detect(&hot_reading()).await.unwrap();
        assert_eq!(detection.source, DetectionSource::Model);
        assert!(detection.is_anomaly);
        assert_eq!(detection.score, 0.93);
        assert_eq!(gw.stats().model_detections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_hiccup_is_absorbed_by_retry() {
        let client = Arc::new(ScriptedInferenceClient::scripted(
            vec![Err(InferenceError::Transient("reset".into()))],
            Ok((false, 0.2)),
        ));
        let gw = gateway(Arc::clone(&client), 1);

        let detection = gw.detect(&hot_reading()).await.unwrap();
        assert_eq!(detection.source, DetectionSource::Model);
        assert_eq!(client.calls(), 2);
        assert_eq!(gw.breaker().state(), CircuitState::Closed);
        assert_eq!(gw.breaker().snapshot().failures_total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_one_breaker_failure() {
        let client = Arc::new(ScriptedInferenceClient::always(Err(InferenceError::Transient(
            "timeout".into(),
        ))));
        let gw = gateway(Arc::clone(&client), 3);

        let detection = gw.detect(&hot_reading()).await.unwrap();
        assert_eq!(detection.source, DetectionSource::Heuristic);
        assert!(detection.is_anomaly);
        assert_eq!(client.calls(), 3);
        assert_eq!(gw.breaker().snapshot().failures_total, 1);
        assert_eq!(gw.retry().stats().exhaustions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_skips_model() {
        let client = Arc::new(ScriptedInferenceClient::always(Err(InferenceError::Permanent(
            "model missing".into(),
        ))));
        let gw = gateway(Arc::clone(&client), 2);

        gw.detect(&hot_reading()).await.unwrap();
        gw.detect(&hot_reading()).await.unwrap();
        assert_eq!(gw.breaker().state(), CircuitState::Open);
        assert_eq!(client.calls(), 2);

        let detection = gw.detect(&hot_reading()).await.unwrap();
        assert_eq!(detection.source, DetectionSource::Heuristic);
        assert_eq!(client.calls(), 2);
        assert_eq!(gw.stats().heuristic_detections, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_features_rejected_before_breaker() {
        let client = Arc::new(ScriptedInferenceClient::always(Ok((false, 0.0))));
        let gw = gateway(Arc::clone(&client), 1);

        let err = gw.detect(&Features::new()).await.unwrap_err();
        assert_eq!(err, ValidationError::EmptyFeatures);

        let err = gw
            .detect(&Features::new().with("gyro", f64::NAN))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::NonFiniteFeature { .. }));

        assert_eq!(client.calls(), 0);
        let snap = gw.breaker().snapshot();
        assert_eq!(snap.failures_total + snap.successes_total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_score_is_clamped() {
        let client = Arc::new(ScriptedInferenceClient::always(Ok((true, 1.7))));
        let gw = gateway(client, 1);
        assert_eq!(gw.detect(&hot_reading()).await.unwrap().score, 1.0);
    }
}
