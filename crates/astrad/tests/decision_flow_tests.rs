//! Decision flow tests
//!
//! Anomaly events through the phase-aware handler, and telemetry frames
//! through the full pipeline built from a TOML config.

use astra_common::{
    AnomalyEvent, AstraConfig, DetectionSource, Features, MissionPhase, PhaseSource,
    RecurrenceConfig, ResponseClass,
};
use astrad::detection::{AnomalyDetectionGateway, DisabledInferenceClient, ThresholdHeuristic};
use astrad::handler::{
    FeedbackRecord, HandlerOptions, JsonlReportingSink, LoggingActionExecutor,
    MemoryReportingSink, PhaseAwareAnomalyHandler, StaticPhaseProvider,
};
use astrad::metrics::GuardMetrics;
use astrad::pipeline::{GuardPipeline, TelemetryFrame};
use astrad::policy::PolicyResolver;
use astrad::recurrence::RecurrenceTracker;
use astrad::supervisor::BreakerRegistry;
use astrad::tracer::DecisionTracer;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
}

fn voltage_drop(secs: i64) -> AnomalyEvent {
    AnomalyEvent::new("voltage_drop", 0.65, at(secs), "eps-bus-a", None).unwrap()
}

fn handler(phase: MissionPhase) -> (PhaseAwareAnomalyHandler, Arc<StaticPhaseProvider>) {
    let provider = Arc::new(StaticPhaseProvider::new(phase));
    let handler = PhaseAwareAnomalyHandler::new(
        Arc::new(RecurrenceTracker::new(&RecurrenceConfig::default())),
        Arc::new(DecisionTracer::new(50)),
        PolicyResolver::new(3),
        provider.clone(),
        Arc::new(MemoryReportingSink::new()),
        HandlerOptions {
            window: Duration::from_secs(120),
            ..HandlerOptions::default()
        },
    );
    (handler, provider)
}

// ============================================================================
// Phase-aware escalation
// ============================================================================

/// Fourth voltage drop inside two minutes escalates past FULL_RECOVERY
#[tokio::test]
async fn test_recurring_voltage_drop_escalates_in_nominal_ops() {
    let (h, _) = handler(MissionPhase::NominalOps);

    let mut actions = Vec::new();
    for secs in [0, 30, 60, 90] {
        actions.push(h.handle_anomaly(&voltage_drop(secs)).await);
    }

    for action in &actions[..3] {
        assert_eq!(action.class, ResponseClass::FullRecovery);
    }
    assert_eq!(actions[3].class, ResponseClass::FullRecovery.escalated());
    assert_eq!(actions[3].class, ResponseClass::PayloadSafe);

    let decision = &h.tracer().get_recent(1)[0];
    assert_eq!(decision.recurrence_count, 4);
    assert_eq!(decision.mission_phase, MissionPhase::NominalOps);
    assert!(decision.is_escalation());
    assert_eq!(decision.rationale.window_secs, 120);
}

/// Same recurrence pattern in SAFE_MODE never leaves SURVIVAL_ONLY
#[tokio::test]
async fn test_safe_mode_never_escalates() {
    let (h, _) = handler(MissionPhase::SafeMode);

    for secs in [0, 30, 60, 90, 100, 110] {
        let action = h.handle_anomaly(&voltage_drop(secs)).await;
        assert_eq!(action.class, ResponseClass::SurvivalOnly);
    }

    let summary = h.tracer().summary();
    assert_eq!(summary.escalations, 0);
    assert_eq!(summary.by_action.get(&ResponseClass::SurvivalOnly), Some(&6));
}

/// Occurrences spread wider than the window never reach the threshold
#[tokio::test]
async fn test_sparse_occurrences_stay_at_baseline() {
    let (h, _) = handler(MissionPhase::NominalOps);

    for i in 0..6 {
        let action = h.handle_anomaly(&voltage_drop(i * 100)).await;
        assert_eq!(action.class, ResponseClass::FullRecovery);
    }
    assert_eq!(h.recurrence().total_count("voltage_drop"), 6);
}

/// A phase change mid-stream is picked up by the next decision
#[tokio::test]
async fn test_phase_change_applies_to_next_event() {
    let (h, provider) = handler(MissionPhase::Launch);

    let action = h.handle_anomaly(&voltage_drop(0)).await;
    assert_eq!(action.class, ResponseClass::LogOnly);

    provider.set(MissionPhase::PayloadOps);
    let action = h.handle_anomaly(&voltage_drop(10)).await;
    assert_eq!(action.class, ResponseClass::PayloadSafe);

    provider.clear();
    let action = h.handle_anomaly(&voltage_drop(20)).await;
    assert_eq!(action.class, ResponseClass::FullRecovery);
    assert_eq!(h.tracer().get_recent(1)[0].rationale.phase_source, PhaseSource::Defaulted);
}

/// Concurrent events of one type are all counted
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_are_all_recorded() {
    let (h, _) = handler(MissionPhase::NominalOps);
    let h = Arc::new(h);

    let mut tasks = Vec::new();
    for i in 0..40 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            h.handle_anomaly(&voltage_drop(i)).await
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(h.recurrence().total_count("voltage_drop"), 40);
    assert_eq!(h.handled_count(), 40);
    assert_eq!(h.tracer().len(), 40);
}

// ============================================================================
// Pipeline from config
// ============================================================================

const CONFIG: &str = r#"
[breakers.anomaly_model]
failure_threshold = 5
success_threshold = 2
recovery_timeout_secs = 60

[retry.model_inference]
max_attempts = 3
base_delay_ms = 500
max_delay_ms = 8000
jitter = "full"

[recurrence]
window_secs = 120

[policy]
recurrence_threshold = 3

[policy.sub_actions.power_fault]
FULL_RECOVERY = "reset_power_controller"
PAYLOAD_SAFE = "shed_payload_load"

[tracer]
capacity = 100
"#;

fn frame(source_id: &str, secs: i64, voltage: f64) -> TelemetryFrame {
    TelemetryFrame {
        source_id: source_id.to_string(),
        timestamp: Some(at(secs)),
        anomaly_type: None,
        feature_ref: None,
        features: Features::new()
            .with("voltage", voltage)
            .with("temperature", 44.0)
            .with("gyro", 0.01),
    }
}

#[tokio::test]
async fn test_pipeline_from_config_reports_feedback() {
    let config = AstraConfig::from_toml_str(CONFIG).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let feedback = dir.path().join("feedback.jsonl");

    let metrics = Arc::new(GuardMetrics::new().unwrap());
    let registry = BreakerRegistry::from_config(&config, Some(Arc::clone(&metrics)));
    let heuristic = ThresholdHeuristic::new(config.heuristic.clone());
    let gateway = AnomalyDetectionGateway::from_config(
        &config,
        &registry,
        Arc::new(DisabledInferenceClient),
        Arc::new(heuristic.clone()),
        Some(Arc::clone(&metrics)),
    )
    .unwrap();
    let handler = PhaseAwareAnomalyHandler::from_config(
        &config,
        Arc::new(StaticPhaseProvider::new(MissionPhase::NominalOps)),
        Arc::new(JsonlReportingSink::new(&feedback)),
        Some(Arc::clone(&metrics)),
    )
    .unwrap();
    let pipeline = Arc::new(GuardPipeline::new(
        Arc::new(gateway),
        Arc::new(handler),
        Arc::new(LoggingActionExecutor),
        heuristic,
    ));

    let nominal = pipeline.process(&frame("eps-nominal", 0, 8.1)).await.unwrap();
    assert!(nominal.anomaly.is_none());
    assert_eq!(nominal.detection.source, DetectionSource::Heuristic);

    let mut anomalies = Vec::new();
    for i in 0..4 {
        let outcome = pipeline
            .process(&frame(&format!("eps-{}", i), 10 + i * 10, 5.0))
            .await
            .unwrap();
        anomalies.push(outcome.anomaly.unwrap());
    }
    assert!(anomalies.iter().all(|a| a.anomaly_type == "power_fault"));
    assert!(anomalies.iter().all(|a| a.execution.accepted));

    assert_eq!(
        anomalies[2].action.sub_action.as_deref(),
        Some("reset_power_controller")
    );
    assert_eq!(anomalies[3].action.class, ResponseClass::PayloadSafe);
    assert_eq!(anomalies[3].action.sub_action.as_deref(), Some("shed_payload_load"));

    let contents = std::fs::read_to_string(&feedback).unwrap();
    let records: Vec<FeedbackRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.mission_phase == MissionPhase::NominalOps));
    assert_eq!(records.iter().filter(|r| r.escalated).count(), 1);

    let text = metrics.export().unwrap();
    assert!(text.contains("astra_decisions_total"));
    assert!(text.contains("astra_detections_total{source=\"heuristic\"} 5"));
}

/// Batches run concurrently but come back in input order
#[tokio::test]
async fn test_pipeline_batch_keeps_input_order() {
    let config = AstraConfig::from_toml_str(CONFIG).unwrap();
    let registry = BreakerRegistry::from_config(&config, None);
    let heuristic = ThresholdHeuristic::new(config.heuristic.clone());
    let gateway = AnomalyDetectionGateway::from_config(
        &config,
        &registry,
        Arc::new(DisabledInferenceClient),
        Arc::new(heuristic.clone()),
        None,
    )
    .unwrap();
    let handler = PhaseAwareAnomalyHandler::from_config(
        &config,
        Arc::new(StaticPhaseProvider::new(MissionPhase::Deployment)),
        Arc::new(MemoryReportingSink::new()),
        None,
    )
    .unwrap();
    let pipeline = Arc::new(GuardPipeline::new(
        Arc::new(gateway),
        Arc::new(handler),
        Arc::new(LoggingActionExecutor),
        heuristic,
    ));

    let frames: Vec<_> = (0..8)
        .map(|i| frame(&format!("eps-{}", i), i, if i % 2 == 0 { 5.0 } else { 8.0 }))
        .collect();
    let results = pipeline.process_batch(frames).await;

    assert_eq!(results.len(), 8);
    for (i, result) in results.iter().enumerate() {
        let outcome = result.as_ref().unwrap();
        assert_eq!(outcome.source_id, format!("eps-{}", i));
        assert_eq!(outcome.anomaly.is_some(), i % 2 == 0);
    }
    assert_eq!(pipeline.handler().recurrence().total_count("power_fault"), 4);
}
