//! Phase-aware recovery policy
//!
//! Pure and total: every input combination maps to at least the phase's
//! baseline response class.

use astra_common::{ConfigError, MissionPhase, PolicyConfig, RecoveryAction, ResponseClass, SeverityLevel};
use std::collections::BTreeMap;

/// Everything the resolver decided, with the reason in words
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutcome {
    pub baseline: ResponseClass,
    pub escalated: bool,
    pub action: RecoveryAction,
    pub primary_factor: String,
}

/// Maps (anomaly type, severity, phase, recurrence) to a recovery action
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyResolver {
    recurrence_threshold: u64,
    sub_actions: BTreeMap<String, BTreeMap<ResponseClass, String>>,
}

impl PolicyResolver {
    pub fn new(recurrence_threshold: u64) -> Self {
        Self {
            recurrence_threshold,
            sub_actions: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            recurrence_threshold: config.recurrence_threshold,
            sub_actions: config.sub_action_table()?,
        })
    }

    /// Attach a specific sub-action to `class` responses for `anomaly_type`
    pub fn with_sub_action(
        mut self,
        anomaly_type: impl Into<String>,
        class: ResponseClass,
        sub_action: impl Into<String>,
    ) -> Self {
        self.sub_actions
            .entry(anomaly_type.into())
            .or_default()
            .insert(class, sub_action.into());
        self
    }

    pub fn recurrence_threshold(&self) -> u64 {
        self.recurrence_threshold
    }

    pub fn resolve(
        &self,
        anomaly_type: &str,
        severity: f64,
        phase: MissionPhase,
        recurrence_count: u64,
    ) -> RecoveryAction {
        self.evaluate(anomaly_type, severity, phase, recurrence_count).action
    }

    pub fn evaluate(
        &self,
        anomaly_type: &str,
        severity: f64,
        phase: MissionPhase,
        recurrence_count: u64,
    ) -> PolicyOutcome {
        let baseline = phase.baseline();
        let recurring = recurrence_count > self.recurrence_threshold;

        // SAFE_MODE never leaves the survival action set
        let escalated = recurring && phase != MissionPhase::SafeMode && baseline.escalated() != baseline;
        let class = if escalated { baseline.escalated() } else { baseline };

        let primary_factor = if phase == MissionPhase::SafeMode {
            format!(
                "{} restricts recovery to {}{}",
                phase,
                baseline,
                if recurring {
                    format!(" despite {} recurrences", recurrence_count)
                } else {
                    String::new()
                }
            )
        } else if escalated {
            format!(
                "{} recurred {} times in window (threshold {}), escalating {} to {}",
                anomaly_type, recurrence_count, self.recurrence_threshold, baseline, class
            )
        } else {
            format!(
                "{} baseline for {} severity {} during {}",
                baseline,
                SeverityLevel::from_score(severity).as_str(),
                anomaly_type,
                phase
            )
        };

        let action = match self.sub_action(anomaly_type, class) {
            Some(sub) => RecoveryAction::with_sub_action(class, sub),
            None => RecoveryAction::new(class),
        };

        PolicyOutcome {
            baseline,
            escalated,
            action,
            primary_factor,
        }
    }

    fn sub_action(&self, anomaly_type: &str, class: ResponseClass) -> Option<&str> {
        self.sub_actions
            .get(anomaly_type)
            .and_then(|by_class| by_class.get(&class))
            .map(String::as_str)
    }
}
