//! Collaborators of the anomaly handler
//!
//! The handler only depends on these traits; concrete providers and sinks
//! live in `phase` and `sinks`.

use astra_common::{AnomalyEvent, Decision, MissionPhase, RecoveryAction};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

// ============================================================================
// Mission phase
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("mission phase source unavailable: {0}")]
    Unavailable(String),

    #[error("unrecognised mission phase '{0}'")]
    UnknownPhase(String),

    #[error("failed to read mission phase from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Source of the current mission phase; called once per handled anomaly
#[async_trait]
pub trait MissionPhaseProvider: Send + Sync {
    async fn current_phase(&self) -> Result<MissionPhase, ProviderError>;
}

// ============================================================================
// Reporting
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("reporting sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode feedback record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("reporting sink unavailable: {0}")]
    Unavailable(String),
}

/// Best-effort persistence of handled anomalies
#[async_trait]
pub trait ReportingSink: Send + Sync {
    async fn persist(&self, event: &AnomalyEvent, decision: &Decision) -> Result<(), SinkError>;
}

// ============================================================================
// Action execution
// ============================================================================

/// What the executor did with a recovery action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub action: RecoveryAction,
    pub accepted: bool,
    pub detail: String,
}

/// Carries out resolved recovery actions
#[async_trait]
pub trait RecoveryActionExecutor: Send + Sync {
    async fn execute(&self, action: &RecoveryAction) -> ActionOutcome;
}

/// Executor that only records the action it was given
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingActionExecutor;

#[async_trait]
impl RecoveryActionExecutor for LoggingActionExecutor {
    async fn execute(&self, action: &RecoveryAction) -> ActionOutcome {
        info!(action = %action, "recovery action dispatched");
        ActionOutcome {
            action: action.clone(),
            accepted: true,
            detail: format!("{} logged for operator execution", action),
        }
    }
}
