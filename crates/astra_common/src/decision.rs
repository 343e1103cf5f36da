//! Recovery decisions and the inputs that produced them

use crate::types::{MissionPhase, RecoveryAction, ResponseClass, SeverityLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where the mission phase used for a decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseSource {
    /// Read from the phase provider
    Live,
    /// Provider failed; configured fallback phase used
    Defaulted,
}

/// Structured record of everything the resolver considered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rationale {
    pub severity: f64,
    pub severity_level: SeverityLevel,
    pub baseline: ResponseClass,
    pub escalated: bool,
    pub recurrence_threshold: u64,
    pub window_secs: u64,
    pub phase_source: PhaseSource,
    /// SURVIVAL_ONLY chosen while not already in SAFE_MODE
    pub safe_mode_recommended: bool,
    pub primary_factor: String,
    pub secondary_factors: Vec<String>,
}

/// Decision contents before the tracer assigns an identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionDraft {
    pub anomaly_type: String,
    pub mission_phase: MissionPhase,
    pub recurrence_count: u64,
    pub action: RecoveryAction,
    pub rationale: Rationale,
}

/// An appended, immutable recovery decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub anomaly_type: String,
    pub mission_phase: MissionPhase,
    pub recurrence_count: u64,
    pub action: RecoveryAction,
    pub rationale: Rationale,
}

impl Decision {
    pub fn from_draft(id: Uuid, timestamp: DateTime<Utc>, draft: DecisionDraft) -> Self {
        Self {
            id,
            timestamp,
            anomaly_type: draft.anomaly_type,
            mission_phase: draft.mission_phase,
            recurrence_count: draft.recurrence_count,
            action: draft.action,
            rationale: draft.rationale,
        }
    }

    pub fn is_escalation(&self) -> bool {
        self.rationale.escalated
    }
}
