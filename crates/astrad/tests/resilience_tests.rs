//! Resilience composition tests
//!
//! Breaker and retry behaviour observed through the public API with paused
//! tokio time, so cooldowns and backoff waits cost nothing.

use astra_common::{
    BreakerConfig, DetectionSource, ErrorKind, Features, HeuristicConfig, InferenceError,
    JitterType,
};
use astrad::detection::{AnomalyDetectionGateway, ScriptedInferenceClient, ThresholdHeuristic};
use astrad::metrics::GuardMetrics;
use astrad::supervisor::{
    BreakerRegistry, CircuitBreaker, CircuitState, RetryError, RetryExecutor, RetryPolicy,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn counted(calls: &Arc<AtomicU32>, ok: bool) -> impl std::future::Future<Output = Result<&'static str, String>> {
    let calls = Arc::clone(calls);
    async move {
        calls.fetch_add(1, Ordering::SeqCst);
        if ok {
            Ok("model")
        } else {
            Err("inference backend down".to_string())
        }
    }
}

fn reading() -> Features {
    Features::new().with("voltage", 5.5).with("temperature", 48.0)
}

// ============================================================================
// Circuit breaker
// ============================================================================

/// Five failures trip the breaker; the cooldown gates probing and two
/// successful probes close it again
#[tokio::test(start_paused = true)]
async fn test_breaker_trip_cooldown_and_recovery() {
    let cb = Arc::new(CircuitBreaker::new(
        "anomaly_model",
        BreakerConfig::new(5, 2, Duration::from_secs(60)),
        None,
    ));
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..5 {
        let result = cb.call(counted(&calls, false), |_| "fallback").await;
        assert_eq!(result, "fallback");
    }
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    tokio::time::advance(Duration::from_secs(30)).await;
    let result = cb.call(counted(&calls, true), |_| "fallback").await;
    assert_eq!(result, "fallback");
    assert_eq!(calls.load(Ordering::SeqCst), 5, "operation must not run while open");

    tokio::time::advance(Duration::from_secs(31)).await;
    let result = cb.call(counted(&calls, true), |_| "fallback").await;
    assert_eq!(result, "model");
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(cb.state(), CircuitState::HalfOpen);

    let result = cb.call(counted(&calls, true), |_| "fallback").await;
    assert_eq!(result, "model");
    assert_eq!(cb.state(), CircuitState::Closed);

    let snap = cb.snapshot();
    assert_eq!(snap.trips_total, 1);
    assert_eq!(snap.recoveries_total, 1);
    assert_eq!(snap.rejections_total, 1);
}

/// A failed probe sends the breaker straight back to OPEN for a new cooldown
#[tokio::test(start_paused = true)]
async fn test_failed_probe_reopens() {
    let cb = Arc::new(CircuitBreaker::new(
        "anomaly_model",
        BreakerConfig::new(2, 2, Duration::from_secs(10)),
        None,
    ));
    let calls = Arc::new(AtomicU32::new(0));

    cb.call(counted(&calls, false), |_| "fallback").await;
    cb.call(counted(&calls, false), |_| "fallback").await;
    assert_eq!(cb.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(11)).await;
    cb.call(counted(&calls, false), |_| "fallback").await;
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(cb.snapshot().trips_total, 2);

    tokio::time::advance(Duration::from_secs(5)).await;
    cb.call(counted(&calls, true), |_| "fallback").await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// Breakers are shared by name through the registry
#[tokio::test(start_paused = true)]
async fn test_registry_shares_breaker_state() {
    let registry = BreakerRegistry::new(None);
    let config = BreakerConfig::new(1, 1, Duration::from_secs(60));
    let a = registry.get_or_register("anomaly_model", config.clone());
    let b = registry.get_or_register("anomaly_model", config);

    let calls = Arc::new(AtomicU32::new(0));
    a.call(counted(&calls, false), |_| "fallback").await;
    assert_eq!(b.state(), CircuitState::Open);
    assert_eq!(registry.snapshots().len(), 1);
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_exhaustion_is_distinguishable_from_non_retryable() {
    let policy = RetryPolicy::new(3, Duration::from_millis(200), Duration::from_secs(2), JitterType::Equal);
    let executor = RetryExecutor::new("model_inference", policy, None);

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let exhausted = executor
        .execute(|| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(InferenceError::Transient("timeout".into())) }
        })
        .await
        .unwrap_err();
    assert!(matches!(exhausted, RetryError::Exhausted { attempts: 3, .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    attempts.store(0, Ordering::SeqCst);
    let counter = Arc::clone(&attempts);
    let rejected = executor
        .execute(|| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(InferenceError::Permanent("bad model".into())) }
        })
        .await
        .unwrap_err();
    assert!(matches!(rejected, RetryError::NonRetryable { attempt: 1, .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let stats = executor.stats();
    assert_eq!(stats.exhaustions, 1);
    assert_eq!(stats.non_retryable, 1);
}

/// Widening the retryable set makes permanent errors retry as well
#[tokio::test(start_paused = true)]
async fn test_retryable_set_is_configurable() {
    let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(10), JitterType::None)
        .with_retryable([ErrorKind::Transient, ErrorKind::Permanent]);
    let executor = RetryExecutor::new("model_inference", policy, None);

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let err = executor
        .execute(|| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(InferenceError::Permanent("bad model".into())) }
        })
        .await
        .unwrap_err();
    assert!(err.is_exhausted());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Gateway composition
// ============================================================================

fn gateway(
    client: Arc<ScriptedInferenceClient>,
    failure_threshold: u32,
    metrics: Option<Arc<GuardMetrics>>,
) -> AnomalyDetectionGateway {
    let policy = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(8), JitterType::Full);
    AnomalyDetectionGateway::new(
        client,
        Arc::new(ThresholdHeuristic::new(HeuristicConfig::default())),
        Arc::new(RetryExecutor::new("model_inference", policy, metrics.clone())),
        Arc::new(CircuitBreaker::new(
            "anomaly_model",
            BreakerConfig::new(failure_threshold, 2, Duration::from_secs(60)),
            metrics.clone(),
        )),
        metrics,
    )
}

/// Each exhausted retry sequence costs the breaker exactly one failure
#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_counts_once_against_breaker() {
    let client = Arc::new(ScriptedInferenceClient::always(Err(InferenceError::Transient(
        "connection reset".into(),
    ))));
    let gw = gateway(Arc::clone(&client), 2, None);

    let first = gw.detect(&reading()).await.unwrap();
    assert_eq!(first.source, DetectionSource::Heuristic);
    assert_eq!(client.calls(), 3);
    assert_eq!(gw.breaker().state(), CircuitState::Closed);
    assert_eq!(gw.breaker().snapshot().consecutive_failures, 1);

    gw.detect(&reading()).await.unwrap();
    assert_eq!(client.calls(), 6);
    assert_eq!(gw.breaker().state(), CircuitState::Open);

    gw.detect(&reading()).await.unwrap();
    assert_eq!(client.calls(), 6);
    assert_eq!(gw.retry().stats().exhaustions, 2);
}

/// Heuristic answers stay available through an outage and metrics see it
#[tokio::test(start_paused = true)]
async fn test_outage_is_visible_in_metrics() {
    let metrics = Arc::new(GuardMetrics::new().unwrap());
    let client = Arc::new(ScriptedInferenceClient::always(Err(InferenceError::Permanent(
        "model unloaded".into(),
    ))));
    let gw = gateway(Arc::clone(&client), 1, Some(Arc::clone(&metrics)));

    for _ in 0..3 {
        let detection = gw.detect(&reading()).await.unwrap();
        assert_eq!(detection.source, DetectionSource::Heuristic);
        assert!(detection.is_anomaly);
    }
    assert_eq!(client.calls(), 1);

    let text = metrics.export().unwrap();
    assert!(text.contains("astra_fallback_activations_total 3"));
    assert!(text.contains("astra_breaker_state{breaker=\"anomaly_model\"} 1"));
}

/// A caller abandoning detect() mid-flight still leaves the failure counted
#[tokio::test(start_paused = true)]
async fn test_abandoned_detection_still_settles_breaker() {
    let client = Arc::new(
        ScriptedInferenceClient::always(Err(InferenceError::Permanent("slow failure".into())))
            .with_latency(Duration::from_secs(5)),
    );
    let gw = gateway(Arc::clone(&client), 1, None);

    let abandoned = tokio::time::timeout(Duration::from_secs(1), gw.detect(&reading())).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(gw.breaker().state(), CircuitState::Open);
    assert_eq!(gw.breaker().snapshot().failures_total, 1);
}
