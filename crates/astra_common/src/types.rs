//! Core vocabulary: mission phases, response classes, anomaly events, detections

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Operational stage of the mission, supplied by an external provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionPhase {
    Launch,
    Deployment,
    NominalOps,
    PayloadOps,
    SafeMode,
}

impl MissionPhase {
    pub const ALL: [MissionPhase; 5] = [
        Self::Launch,
        Self::Deployment,
        Self::NominalOps,
        Self::PayloadOps,
        Self::SafeMode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Launch => "LAUNCH",
            Self::Deployment => "DEPLOYMENT",
            Self::NominalOps => "NOMINAL_OPS",
            Self::PayloadOps => "PAYLOAD_OPS",
            Self::SafeMode => "SAFE_MODE",
        }
    }

    /// Response class used when nothing else applies
    pub fn baseline(&self) -> ResponseClass {
        match self {
            Self::Launch => ResponseClass::LogOnly,
            Self::Deployment => ResponseClass::Stabilize,
            Self::NominalOps => ResponseClass::FullRecovery,
            Self::PayloadOps => ResponseClass::PayloadSafe,
            Self::SafeMode => ResponseClass::SurvivalOnly,
        }
    }
}

impl fmt::Display for MissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissionPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|phase| phase.as_str() == normalized)
            .ok_or_else(|| format!("unknown mission phase '{}'", s.trim()))
    }
}

/// Closed set of recovery response classes.
///
/// Declaration order is the escalation ladder: each variant is one level more
/// aggressive than the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseClass {
    LogOnly,
    Stabilize,
    FullRecovery,
    PayloadSafe,
    SurvivalOnly,
}

impl ResponseClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LogOnly => "LOG_ONLY",
            Self::Stabilize => "STABILIZE",
            Self::FullRecovery => "FULL_RECOVERY",
            Self::PayloadSafe => "PAYLOAD_SAFE",
            Self::SurvivalOnly => "SURVIVAL_ONLY",
        }
    }

    /// Next rung on the ladder; the top rung escalates to itself
    pub fn escalated(&self) -> Self {
        match self {
            Self::LogOnly => Self::Stabilize,
            Self::Stabilize => Self::FullRecovery,
            Self::FullRecovery => Self::PayloadSafe,
            Self::PayloadSafe => Self::SurvivalOnly,
            Self::SurvivalOnly => Self::SurvivalOnly,
        }
    }
}

impl FromStr for ResponseClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        [
            Self::LogOnly,
            Self::Stabilize,
            Self::FullRecovery,
            Self::PayloadSafe,
            Self::SurvivalOnly,
        ]
        .into_iter()
        .find(|class| class.as_str() == normalized)
        .ok_or_else(|| format!("unknown response class '{}'", s.trim()))
    }
}

impl fmt::Display for ResponseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved recovery action handed to the action executor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub class: ResponseClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_action: Option<String>,
}

impl RecoveryAction {
    pub fn new(class: ResponseClass) -> Self {
        Self {
            class,
            sub_action: None,
        }
    }

    pub fn with_sub_action(class: ResponseClass, sub_action: impl Into<String>) -> Self {
        Self {
            class,
            sub_action: Some(sub_action.into()),
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_action {
            Some(sub) => write!(f, "{}:{}", self.class, sub),
            None => write!(f, "{}", self.class),
        }
    }
}

/// Coarse severity bucket derived from a [0, 1] score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeverityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::Critical
        } else if score >= 0.6 {
            Self::High
        } else if score >= 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Named telemetry features fed to detection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Features(BTreeMap<String, f64>);

impl Features {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Reject empty vectors and non-finite readings
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.0.is_empty() {
            return Err(ValidationError::EmptyFeatures);
        }
        if let Some((name, _)) = self.0.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ValidationError::NonFiniteFeature { name: name.clone() });
        }
        Ok(())
    }
}

impl FromIterator<(String, f64)> for Features {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Which evaluator produced a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionSource {
    Model,
    Heuristic,
}

impl DetectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Heuristic => "heuristic",
        }
    }
}

/// Result of running detection over one feature vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub is_anomaly: bool,
    pub score: f64,
    pub source: DetectionSource,
}

/// Wire shape of an inbound anomaly event, validated into [`AnomalyEvent`]
#[derive(Debug, Clone, Deserialize)]
struct RawAnomalyEvent {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(rename = "type")]
    anomaly_type: String,
    severity: f64,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    source_id: String,
    #[serde(default)]
    feature_ref: Option<String>,
}

impl TryFrom<RawAnomalyEvent> for AnomalyEvent {
    type Error = ValidationError;

    fn try_from(raw: RawAnomalyEvent) -> Result<Self, Self::Error> {
        let mut event = AnomalyEvent::new(
            raw.anomaly_type,
            raw.severity,
            raw.timestamp.unwrap_or_else(Utc::now),
            raw.source_id,
            raw.feature_ref,
        )?;
        if let Some(id) = raw.id {
            event.id = id;
        }
        Ok(event)
    }
}

/// A single anomaly occurrence. Fields are private so a constructed event is
/// always valid and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAnomalyEvent")]
pub struct AnomalyEvent {
    id: Uuid,
    #[serde(rename = "type")]
    anomaly_type: String,
    severity: f64,
    timestamp: DateTime<Utc>,
    source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    feature_ref: Option<String>,
}

impl AnomalyEvent {
    pub fn new(
        anomaly_type: impl Into<String>,
        severity: f64,
        timestamp: DateTime<Utc>,
        source_id: impl Into<String>,
        feature_ref: Option<String>,
    ) -> Result<Self, ValidationError> {
        let anomaly_type = anomaly_type.into().trim().to_string();
        if anomaly_type.is_empty() {
            return Err(ValidationError::EmptyAnomalyType);
        }
        let source_id = source_id.into().trim().to_string();
        if source_id.is_empty() {
            return Err(ValidationError::EmptySource);
        }
        if !(0.0..=1.0).contains(&severity) {
            // NaN fails the range check as well
            return Err(ValidationError::SeverityOutOfRange(severity));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            anomaly_type,
            severity,
            timestamp,
            source_id,
            feature_ref,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn anomaly_type(&self) -> &str {
        &self.anomaly_type
    }

    pub fn severity(&self) -> f64 {
        self.severity
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn feature_ref(&self) -> Option<&str> {
        self.feature_ref.as_deref()
    }
}
