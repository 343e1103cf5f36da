//! Command handlers for astrad.

use anyhow::{anyhow, Context, Result};
use astra_common::{AstraConfig, MissionPhase};
use astrad::detection::{
    AnomalyDetectionGateway, DisabledInferenceClient, HttpInferenceClient, ModelInferenceClient,
    ThresholdHeuristic,
};
use astrad::handler::{
    FilePhaseProvider, JsonlReportingSink, LoggingActionExecutor, MissionPhaseProvider,
    PhaseAwareAnomalyHandler, ReportingSink, StaticPhaseProvider, TracingReportingSink,
};
use astrad::metrics::GuardMetrics;
use astrad::pipeline::{GuardPipeline, TelemetryFrame};
use astrad::supervisor::{backoff_schedule, BreakerRegistry, RetryPolicy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Handle run command
pub async fn run(
    config: &AstraConfig,
    frames_path: &Path,
    phase: Option<MissionPhase>,
    phase_file: Option<PathBuf>,
    print_metrics: bool,
) -> Result<()> {
    let metrics = Arc::new(GuardMetrics::new().context("failed to register metrics")?);
    let registry = BreakerRegistry::from_config(config, Some(Arc::clone(&metrics)));

    let model = model_client(config)?;
    let heuristic = ThresholdHeuristic::new(config.heuristic.clone());
    let gateway = AnomalyDetectionGateway::from_config(
        config,
        &registry,
        model,
        Arc::new(heuristic.clone()),
        Some(Arc::clone(&metrics)),
    )?;

    let provider = phase_provider(config, phase, phase_file);
    let sink: Arc<dyn ReportingSink> = match &config.reporting.feedback_path {
        Some(path) => Arc::new(JsonlReportingSink::new(path.clone())),
        None => Arc::new(TracingReportingSink),
    };
    let handler =
        PhaseAwareAnomalyHandler::from_config(config, provider, sink, Some(Arc::clone(&metrics)))?;

    let pipeline = Arc::new(GuardPipeline::new(
        Arc::new(gateway),
        Arc::new(handler),
        Arc::new(LoggingActionExecutor),
        heuristic,
    ));

    let frames = read_frames(frames_path).await?;
    info!(frames = frames.len(), path = %frames_path.display(), "processing telemetry frames");

    let mut rejected = 0usize;
    for result in pipeline.process_batch(frames).await {
        match result {
            Ok(outcome) => println!("{}", serde_json::to_string(&outcome)?),
            Err(e) => {
                rejected += 1;
                warn!(error = %e, "frame rejected");
            }
        }
    }

    let summary = pipeline.handler().tracer().summary();
    let detections = pipeline.gateway().stats();
    eprintln!();
    eprintln!("decisions      {}", summary.total_recorded);
    eprintln!("escalations    {} ({:.1}%)", summary.escalations, summary.escalation_rate * 100.0);
    eprintln!(
        "detections     model {}  heuristic {}",
        detections.model_detections, detections.heuristic_detections
    );
    eprintln!("rejected       {}", rejected);
    for snapshot in registry.snapshots() {
        eprintln!(
            "breaker        {} {} (trips {}, rejections {})",
            snapshot.name, snapshot.state, snapshot.trips_total, snapshot.rejections_total
        );
    }
    if pipeline.handler().reporting_failures() > 0 {
        eprintln!("report errors  {}", pipeline.handler().reporting_failures());
    }

    if print_metrics {
        print!("{}", metrics.export()?);
    }

    Ok(())
}

/// Handle check command
pub fn check(config: &AstraConfig, path: &Path) -> Result<()> {
    println!("{}: OK", path.display());
    println!("  breakers        {}", join_keys(config.breakers.keys()));
    println!("  retry policies  {}", join_keys(config.retry.keys()));
    println!(
        "  recurrence      window {}s, threshold {}",
        config.recurrence.window_secs, config.policy.recurrence_threshold
    );
    println!(
        "  model           {}",
        config.model.endpoint.as_deref().unwrap_or("disabled (heuristic only)")
    );
    Ok(())
}

/// Handle schedule command
pub fn schedule(config: &AstraConfig, name: &str) -> Result<()> {
    let retry = config
        .retry
        .get(name)
        .ok_or_else(|| anyhow!("no retry policy named '{}'", name))?;
    let policy = RetryPolicy::from(retry);

    println!("{} (jitter: {:?})", name, retry.jitter);
    for (attempt, delay) in backoff_schedule(&policy).iter().enumerate() {
        println!("  attempt {:>2}  wait {:>8} ms", attempt + 1, delay.as_millis());
    }
    Ok(())
}

fn model_client(config: &AstraConfig) -> Result<Arc<dyn ModelInferenceClient>> {
    match &config.model.endpoint {
        Some(endpoint) => {
            let client =
                HttpInferenceClient::new(endpoint.clone(), Duration::from_millis(config.model.timeout_ms))
                    .context("failed to build model inference client")?;
            Ok(Arc::new(client))
        }
        None => {
            info!("no model endpoint configured, detection runs on the heuristic");
            Ok(Arc::new(DisabledInferenceClient))
        }
    }
}

fn phase_provider(
    config: &AstraConfig,
    phase: Option<MissionPhase>,
    phase_file: Option<PathBuf>,
) -> Arc<dyn MissionPhaseProvider> {
    match (phase, phase_file) {
        (Some(phase), _) => Arc::new(StaticPhaseProvider::new(phase)),
        (None, Some(path)) => Arc::new(FilePhaseProvider::new(
            path,
            Duration::from_millis(config.handler.phase_cache_ms),
        )),
        (None, None) => {
            warn!(
                phase = %config.handler.fallback_phase,
                "no mission phase source given, assuming fallback phase"
            );
            Arc::new(StaticPhaseProvider::new(config.handler.fallback_phase))
        }
    }
}

async fn read_frames(path: &Path) -> Result<Vec<TelemetryFrame>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read frames from {}", path.display()))?;

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: malformed telemetry frame", path.display(), i + 1))
        })
        .collect()
}

fn join_keys<'a>(keys: impl Iterator<Item = &'a String>) -> String {
    keys.map(String::as_str).collect::<Vec<_>>().join(", ")
}
