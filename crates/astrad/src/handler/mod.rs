//! Phase-aware anomaly handling
//!
//! Turns a validated anomaly event into a recovery action:
//! recurrence update, phase lookup, policy resolution, decision trace and a
//! single best-effort report. Collaborator failures degrade the decision,
//! they never abort it.

pub mod phase;
pub mod ports;
pub mod sinks;

pub use phase::{FilePhaseProvider, StaticPhaseProvider};
pub use ports::{
    ActionOutcome, LoggingActionExecutor, MissionPhaseProvider, ProviderError,
    RecoveryActionExecutor, ReportingSink, SinkError,
};
pub use sinks::{FeedbackRecord, JsonlReportingSink, MemoryReportingSink, TracingReportingSink};

use crate::metrics::GuardMetrics;
use crate::policy::PolicyResolver;
use crate::recurrence::RecurrenceTracker;
use crate::tracer::DecisionTracer;
use astra_common::{
    AnomalyEvent, AstraConfig, ConfigError, DecisionDraft, MissionPhase, PhaseSource, Rationale,
    RecoveryAction, ResponseClass, SeverityLevel,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

/// Tunables for the handler
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOptions {
    /// Trailing window for recurrence counts
    pub window: Duration,
    /// Phase assumed when the provider fails
    pub fallback_phase: MissionPhase,
    /// Sweep recurrence history every N handled events (0 disables)
    pub cleanup_every: u64,
    /// Longest the handler waits on the reporting sink
    pub report_timeout: Duration,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3_600),
            fallback_phase: MissionPhase::NominalOps,
            cleanup_every: 100,
            report_timeout: Duration::from_secs(2),
        }
    }
}

pub struct PhaseAwareAnomalyHandler {
    recurrence: Arc<RecurrenceTracker>,
    tracer: Arc<DecisionTracer>,
    policy: RwLock<Arc<PolicyResolver>>,
    phase_provider: Arc<dyn MissionPhaseProvider>,
    sink: Arc<dyn ReportingSink>,
    options: HandlerOptions,
    handled: AtomicU64,
    reporting_failures: AtomicU64,
    metrics: Option<Arc<GuardMetrics>>,
}

impl PhaseAwareAnomalyHandler {
    pub fn new(
        recurrence: Arc<RecurrenceTracker>,
        tracer: Arc<DecisionTracer>,
        policy: PolicyResolver,
        phase_provider: Arc<dyn MissionPhaseProvider>,
        sink: Arc<dyn ReportingSink>,
        options: HandlerOptions,
    ) -> Self {
        Self {
            recurrence,
            tracer,
            policy: RwLock::new(Arc::new(policy)),
            phase_provider,
            sink,
            options,
            handled: AtomicU64::new(0),
            reporting_failures: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<GuardMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Build the tracker, tracer and resolver from configuration
    pub fn from_config(
        config: &AstraConfig,
        phase_provider: Arc<dyn MissionPhaseProvider>,
        sink: Arc<dyn ReportingSink>,
        metrics: Option<Arc<GuardMetrics>>,
    ) -> Result<Self, ConfigError> {
        let policy = PolicyResolver::from_config(&config.policy)?;
        let options = HandlerOptions {
            window: config.recurrence.window(),
            fallback_phase: config.handler.fallback_phase,
            cleanup_every: config.recurrence.cleanup_every,
            report_timeout: config.reporting.timeout(),
        };

        Ok(Self::new(
            Arc::new(RecurrenceTracker::new(&config.recurrence)),
            Arc::new(DecisionTracer::new(config.tracer.capacity)),
            policy,
            phase_provider,
            sink,
            options,
        )
        .with_metrics(metrics))
    }

    pub fn recurrence(&self) -> &Arc<RecurrenceTracker> {
        &self.recurrence
    }

    pub fn tracer(&self) -> &Arc<DecisionTracer> {
        &self.tracer
    }

    pub fn options(&self) -> &HandlerOptions {
        &self.options
    }

    /// Resolver currently in effect
    pub fn policy(&self) -> Arc<PolicyResolver> {
        Arc::clone(&self.policy.read().unwrap_or_else(|p| p.into_inner()))
    }

    /// Swap the resolver; handles already in progress finish with the old one
    pub fn reload_policy(&self, policy: PolicyResolver) {
        let threshold = policy.recurrence_threshold();
        *self.policy.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(policy);
        info!(recurrence_threshold = threshold, "recovery policy reloaded");
    }

    pub fn handled_count(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    pub fn reporting_failures(&self) -> u64 {
        self.reporting_failures.load(Ordering::Relaxed)
    }

    /// Decide the recovery action for one anomaly. Never fails.
    pub async fn handle_anomaly(&self, event: &AnomalyEvent) -> RecoveryAction {
        let anomaly_type = event.anomaly_type();
        let at = event.timestamp();
        let window = self.options.window;

        self.recurrence.record(anomaly_type, at);
        let recurrence_count = self.recurrence.count_in_window_at(anomaly_type, window, at);
        let history = self.recurrence.snapshot(anomaly_type, window, at);

        let (phase, phase_source) = match self.phase_provider.current_phase().await {
            Ok(phase) => (phase, PhaseSource::Live),
            Err(e) => {
                error!(
                    error = %e,
                    fallback = %self.options.fallback_phase,
                    "mission phase unavailable, using fallback phase"
                );
                (self.options.fallback_phase, PhaseSource::Defaulted)
            }
        };

        let policy = self.policy();
        let outcome = policy.evaluate(anomaly_type, event.severity(), phase, recurrence_count);
        let severity_level = SeverityLevel::from_score(event.severity());

        let mut secondary_factors = vec![
            format!(
                "{} occurrences in the last {}s",
                recurrence_count,
                window.as_secs()
            ),
            format!("{} occurrences since start", history.total_count),
        ];
        if let Some(seconds) = history.seconds_since_last {
            secondary_factors.push(format!("previous occurrence {:.1}s earlier", seconds));
        }
        if phase_source == PhaseSource::Defaulted {
            secondary_factors.push(format!("mission phase defaulted to {}", phase));
        }

        let draft = DecisionDraft {
            anomaly_type: anomaly_type.to_string(),
            mission_phase: phase,
            recurrence_count,
            action: outcome.action.clone(),
            rationale: Rationale {
                severity: event.severity(),
                severity_level,
                baseline: outcome.baseline,
                escalated: outcome.escalated,
                recurrence_threshold: policy.recurrence_threshold(),
                window_secs: window.as_secs(),
                phase_source,
                safe_mode_recommended: outcome.action.class == ResponseClass::SurvivalOnly
                    && phase != MissionPhase::SafeMode,
                primary_factor: outcome.primary_factor,
                secondary_factors,
            },
        };
        let decision = self.tracer.record(draft);

        if let Some(ref m) = self.metrics {
            m.record_anomaly(anomaly_type, severity_level.as_str());
            m.record_decision(phase.as_str(), decision.action.class.as_str());
        }
        info!(
            decision_id = %decision.id,
            anomaly_type = %anomaly_type,
            phase = %phase,
            recurrence = recurrence_count,
            action = %decision.action,
            escalated = decision.is_escalation(),
            "recovery decision"
        );

        let report = self.sink.persist(event, &decision);
        let failure = match tokio::time::timeout(self.options.report_timeout, report).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "sink did not finish within {}ms",
                self.options.report_timeout.as_millis()
            )),
        };
        if let Some(reason) = failure {
            self.reporting_failures.fetch_add(1, Ordering::Relaxed);
            if let Some(ref m) = self.metrics {
                m.record_reporting_failure();
            }
            warn!(decision_id = %decision.id, error = %reason, "failed to report decision");
        }

        // Swept on the wall clock so a skewed event cannot age other types
        let handled = self.handled.fetch_add(1, Ordering::Relaxed) + 1;
        if self.options.cleanup_every > 0 && handled % self.options.cleanup_every == 0 {
            self.recurrence.cleanup();
        }

        outcome.action
    }
}
