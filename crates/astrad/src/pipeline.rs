//! End-to-end guard pipeline: detect, decide, dispatch
//!
//! Frames that detection clears stop after the gateway; anomalous frames become
//! an [`AnomalyEvent`] with the detection score as severity.

use crate::detection::{AnomalyDetectionGateway, ThresholdHeuristic};
use crate::handler::{ActionOutcome, PhaseAwareAnomalyHandler, RecoveryActionExecutor};
use astra_common::{AnomalyEvent, Detection, Features, RecoveryAction, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};
use uuid::Uuid;

const UNCLASSIFIED: &str = "unclassified_anomaly";

/// One telemetry sample as it arrives from the embedding pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub source_id: String,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Upstream classification; derived from the readings when absent
    #[serde(default)]
    pub anomaly_type: Option<String>,

    #[serde(default)]
    pub feature_ref: Option<String>,

    pub features: Features,
}

/// What happened to one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameOutcome {
    pub source_id: String,
    pub detection: Detection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<AnomalyOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyOutcome {
    pub event_id: Uuid,
    pub anomaly_type: String,
    pub action: RecoveryAction,
    pub execution: ActionOutcome,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid frame: {0}")]
    Invalid(#[from] ValidationError),

    #[error("frame processing aborted: {0}")]
    Aborted(String),
}

pub struct GuardPipeline {
    gateway: Arc<AnomalyDetectionGateway>,
    handler: Arc<PhaseAwareAnomalyHandler>,
    executor: Arc<dyn RecoveryActionExecutor>,
    classifier: ThresholdHeuristic,
}

impl GuardPipeline {
    pub fn new(
        gateway: Arc<AnomalyDetectionGateway>,
        handler: Arc<PhaseAwareAnomalyHandler>,
        executor: Arc<dyn RecoveryActionExecutor>,
        classifier: ThresholdHeuristic,
    ) -> Self {
        Self {
            gateway,
            handler,
            executor,
            classifier,
        }
    }

    pub fn gateway(&self) -> &Arc<AnomalyDetectionGateway> {
        &self.gateway
    }

    pub fn handler(&self) -> &Arc<PhaseAwareAnomalyHandler> {
        &self.handler
    }

    pub async fn process(&self, frame: &TelemetryFrame) -> Result<FrameOutcome, PipelineError> {
        let detection = self.gateway.detect(&frame.features).await?;

        if !detection.is_anomaly {
            debug!(source_id = %frame.source_id, score = detection.score, "frame nominal");
            return Ok(FrameOutcome {
                source_id: frame.source_id.clone(),
                detection,
                anomaly: None,
            });
        }

        let anomaly_type = frame
            .anomaly_type
            .clone()
            .or_else(|| {
                self.classifier
                    .dominant_violation(&frame.features)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| UNCLASSIFIED.to_string());

        let event = AnomalyEvent::new(
            anomaly_type,
            detection.score,
            frame.timestamp.unwrap_or_else(Utc::now),
            frame.source_id.clone(),
            frame.feature_ref.clone(),
        )?;

        let action = self.handler.handle_anomaly(&event).await;
        let execution = self.executor.execute(&action).await;

        Ok(FrameOutcome {
            source_id: frame.source_id.clone(),
            detection,
            anomaly: Some(AnomalyOutcome {
                event_id: event.id(),
                anomaly_type: event.anomaly_type().to_string(),
                action,
                execution,
            }),
        })
    }

    /// Process frames concurrently; results come back in input order
    pub async fn process_batch(
        self: &Arc<Self>,
        frames: Vec<TelemetryFrame>,
    ) -> Vec<Result<FrameOutcome, PipelineError>> {
        let total = frames.len();
        let mut tasks = JoinSet::new();
        for (index, frame) in frames.into_iter().enumerate() {
            let pipeline = Arc::clone(self);
            tasks.spawn(async move { (index, pipeline.process(&frame).await) });
        }

        let mut slots: Vec<Option<Result<FrameOutcome, PipelineError>>> =
            (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => error!(error = %e, "frame task failed"),
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(PipelineError::Aborted("frame task did not complete".to_string()))))
            .collect()
    }
}
