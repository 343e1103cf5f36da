//! Reporting sinks for handled anomalies

use super::ports::{ReportingSink, SinkError};
use astra_common::{AnomalyEvent, Decision, MissionPhase, RecoveryAction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

/// One line of operator feedback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub decision_id: Uuid,
    pub event_id: Uuid,
    pub anomaly_type: String,
    pub recovery_action: RecoveryAction,
    pub mission_phase: MissionPhase,
    pub timestamp: DateTime<Utc>,
    pub severity: f64,
    pub source_id: String,
    pub escalated: bool,
}

impl FeedbackRecord {
    pub fn new(event: &AnomalyEvent, decision: &Decision) -> Self {
        Self {
            decision_id: decision.id,
            event_id: event.id(),
            anomaly_type: decision.anomaly_type.clone(),
            recovery_action: decision.action.clone(),
            mission_phase: decision.mission_phase,
            timestamp: decision.timestamp,
            severity: event.severity(),
            source_id: event.source_id().to_string(),
            escalated: decision.is_escalation(),
        }
    }
}

/// Appends one JSON feedback record per line
#[derive(Debug)]
pub struct JsonlReportingSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlReportingSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReportingSink for JsonlReportingSink {
    async fn persist(&self, event: &AnomalyEvent, decision: &Decision) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(&FeedbackRecord::new(event, decision))?;
        line.push('\n');

        // Whole-line appends only; concurrent handlers must not interleave
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Emits each decision as a structured log line
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReportingSink;

#[async_trait]
impl ReportingSink for TracingReportingSink {
    async fn persist(&self, event: &AnomalyEvent, decision: &Decision) -> Result<(), SinkError> {
        info!(
            decision_id = %decision.id,
            event_id = %event.id(),
            anomaly_type = %decision.anomaly_type,
            phase = %decision.mission_phase,
            action = %decision.action,
            escalated = decision.is_escalation(),
            "anomaly reported"
        );
        Ok(())
    }
}

/// Keeps feedback records in memory; can be switched into a failing mode
#[derive(Debug, Default)]
pub struct MemoryReportingSink {
    records: Mutex<Vec<FeedbackRecord>>,
    failing: AtomicBool,
}

impl MemoryReportingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<FeedbackRecord> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl ReportingSink for MemoryReportingSink {
    async fn persist(&self, event: &AnomalyEvent, decision: &Decision) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("memory sink set to fail".to_string()));
        }
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(FeedbackRecord::new(event, decision));
        Ok(())
    }
}
