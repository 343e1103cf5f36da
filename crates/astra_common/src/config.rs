//! Configuration for the anomaly guard.
//!
//! Loaded from a TOML file. Thresholds that govern breaker trips and policy
//! escalation have no built-in defaults and must be supplied by the operator.

use crate::error::{ConfigError, ErrorKind};
use crate::types::{MissionPhase, ResponseClass};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file path
pub const CONFIG_PATH: &str = "/etc/astraguard/config.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstraConfig {
    /// Named circuit breakers
    #[serde(default)]
    pub breakers: BTreeMap<String, BreakerConfig>,

    /// Named retry policies
    #[serde(default)]
    pub retry: BTreeMap<String, RetryConfig>,

    pub recurrence: RecurrenceConfig,

    pub policy: PolicyConfig,

    #[serde(default)]
    pub tracer: TracerConfig,

    #[serde(default)]
    pub handler: HandlerConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub heuristic: HeuristicConfig,

    #[serde(default)]
    pub reporting: ReportingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures in CLOSED before tripping
    pub failure_threshold: u32,

    /// Consecutive HALF_OPEN successes before closing
    pub success_threshold: u32,

    /// Cooldown spent in OPEN before probing
    pub recovery_timeout_secs: u64,

    /// Probe calls allowed through concurrently while HALF_OPEN
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_half_open_max_calls() -> u32 {
    1
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, success_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            recovery_timeout_secs: recovery_timeout.as_secs(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(invalid(format!("breaker '{}': failure_threshold must be >= 1", name)));
        }
        if self.success_threshold == 0 {
            return Err(invalid(format!("breaker '{}': success_threshold must be >= 1", name)));
        }
        if self.half_open_max_calls == 0 {
            return Err(invalid(format!("breaker '{}': half_open_max_calls must be >= 1", name)));
        }
        Ok(())
    }
}

/// Jitter strategy applied to the nominal backoff delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterType {
    /// delay * uniform(0.5, 1.5)
    #[default]
    Full,
    /// delay/2 + uniform(0, delay/2)
    Equal,
    /// min(max_delay, uniform(0, delay * 3))
    Decorrelated,
    /// nominal delay unchanged
    None,
}

/// Retry policy for one protected operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,

    pub base_delay_ms: u64,

    pub max_delay_ms: u64,

    #[serde(default)]
    pub jitter: JitterType,

    /// Error kinds that earn another attempt
    #[serde(default = "default_retryable")]
    pub retryable: Vec<ErrorKind>,
}

fn default_retryable() -> Vec<ErrorKind> {
    vec![ErrorKind::Transient]
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(invalid(format!("retry '{}': max_attempts must be >= 1", name)));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(invalid(format!(
                "retry '{}': max_delay_ms ({}) must be >= base_delay_ms ({})",
                name, self.max_delay_ms, self.base_delay_ms
            )));
        }
        Ok(())
    }
}

/// Recurrence window and memory bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceConfig {
    /// Trailing window used for escalation decisions
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Timestamps older than this are dropped by cleanup
    #[serde(default = "default_max_retention_secs")]
    pub max_retention_secs: u64,

    /// Hard cap on retained timestamps per anomaly type
    #[serde(default = "default_max_per_type")]
    pub max_per_type: usize,

    /// Sweep all types every N handled events (0 disables)
    #[serde(default = "default_cleanup_every")]
    pub cleanup_every: u64,

    /// Distinct anomaly types tracked at once; the least recently seen type
    /// is forgotten when a new one arrives at the limit
    #[serde(default = "default_max_types")]
    pub max_types: usize,
}

fn default_window_secs() -> u64 {
    3_600
}

fn default_max_retention_secs() -> u64 {
    86_400
}

fn default_max_per_type() -> usize {
    10_000
}

fn default_cleanup_every() -> u64 {
    100
}

fn default_max_types() -> usize {
    4_096
}

impl Default for RecurrenceConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_retention_secs: default_max_retention_secs(),
            max_per_type: default_max_per_type(),
            cleanup_every: default_cleanup_every(),
            max_types: default_max_types(),
        }
    }
}

impl RecurrenceConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn max_retention(&self) -> Duration {
        Duration::from_secs(self.max_retention_secs)
    }
}

/// Policy resolution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// In-window count above which the response escalates
    pub recurrence_threshold: u64,

    /// anomaly type -> response class name -> sub-action id
    #[serde(default)]
    pub sub_actions: BTreeMap<String, BTreeMap<String, String>>,
}

impl PolicyConfig {
    pub fn new(recurrence_threshold: u64) -> Self {
        Self {
            recurrence_threshold,
            sub_actions: BTreeMap::new(),
        }
    }

    /// Parsed sub-action table, keyed by anomaly type and response class
    pub fn sub_action_table(
        &self,
    ) -> Result<BTreeMap<String, BTreeMap<ResponseClass, String>>, ConfigError> {
        let mut table = BTreeMap::new();
        for (anomaly_type, by_class) in &self.sub_actions {
            let mut parsed = BTreeMap::new();
            for (class_name, sub_action) in by_class {
                let class: ResponseClass = class_name.parse().map_err(|e| {
                    invalid(format!("policy.sub_actions.{}: {}", anomaly_type, e))
                })?;
                parsed.insert(class, sub_action.clone());
            }
            table.insert(anomaly_type.clone(), parsed);
        }
        Ok(table)
    }
}

/// Decision tracer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerConfig {
    #[serde(default = "default_tracer_capacity")]
    pub capacity: usize,
}

fn default_tracer_capacity() -> usize {
    1_000
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            capacity: default_tracer_capacity(),
        }
    }
}

/// Handler behaviour when collaborators misbehave
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Phase assumed when the phase provider fails
    #[serde(default = "default_fallback_phase")]
    pub fallback_phase: MissionPhase,

    /// How long a file-backed phase reading stays cached
    #[serde(default = "default_phase_cache_ms")]
    pub phase_cache_ms: u64,
}

fn default_fallback_phase() -> MissionPhase {
    MissionPhase::NominalOps
}

fn default_phase_cache_ms() -> u64 {
    1_000
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            fallback_phase: default_fallback_phase(),
            phase_cache_ms: default_phase_cache_ms(),
        }
    }
}

/// Model inference endpoint and the resilience wrappers guarding it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// HTTP endpoint; heuristic-only detection when absent
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_model_timeout_ms")]
    pub timeout_ms: u64,

    /// Name of the breaker in `[breakers]` protecting inference
    #[serde(default = "default_model_breaker")]
    pub breaker: String,

    /// Name of the policy in `[retry]` wrapping inference
    #[serde(default = "default_model_retry")]
    pub retry_policy: String,
}

fn default_model_timeout_ms() -> u64 {
    2_500
}

fn default_model_breaker() -> String {
    "anomaly_model".to_string()
}

fn default_model_retry() -> String {
    "model_inference".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: default_model_timeout_ms(),
            breaker: default_model_breaker(),
            retry_policy: default_model_retry(),
        }
    }
}

/// Limits for the rule-based fallback detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicConfig {
    #[serde(default = "default_voltage_min")]
    pub voltage_min: f64,

    #[serde(default = "default_voltage_max")]
    pub voltage_max: f64,

    #[serde(default = "default_temperature_max")]
    pub temperature_max: f64,

    #[serde(default = "default_gyro_max")]
    pub gyro_max: f64,

    /// Score strictly above this is an anomaly
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,
}

fn default_voltage_min() -> f64 {
    7.0
}

fn default_voltage_max() -> f64 {
    9.0
}

fn default_temperature_max() -> f64 {
    40.0
}

fn default_gyro_max() -> f64 {
    0.1
}

fn default_anomaly_threshold() -> f64 {
    0.5
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            voltage_min: default_voltage_min(),
            voltage_max: default_voltage_max(),
            temperature_max: default_temperature_max(),
            gyro_max: default_gyro_max(),
            anomaly_threshold: default_anomaly_threshold(),
        }
    }
}

/// Where decisions are reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// JSON-lines feedback file; decisions are only logged when absent
    #[serde(default)]
    pub feedback_path: Option<PathBuf>,

    /// Longest a single report may take before it is abandoned
    #[serde(default = "default_report_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_report_timeout_ms() -> u64 {
    2_000
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            feedback_path: None,
            timeout_ms: default_report_timeout_ms(),
        }
    }
}

impl ReportingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::Invalid(msg)
}

impl AstraConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: AstraConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, breaker) in &self.breakers {
            breaker.validate(name)?;
        }
        for (name, retry) in &self.retry {
            retry.validate(name)?;
        }

        if self.recurrence.window_secs == 0 {
            return Err(invalid("recurrence.window_secs must be >= 1".to_string()));
        }
        if self.recurrence.max_retention_secs < self.recurrence.window_secs {
            return Err(invalid(format!(
                "recurrence.max_retention_secs ({}) must cover window_secs ({})",
                self.recurrence.max_retention_secs, self.recurrence.window_secs
            )));
        }
        if self.recurrence.max_per_type == 0 {
            return Err(invalid("recurrence.max_per_type must be >= 1".to_string()));
        }
        if self.reporting.timeout_ms == 0 {
            return Err(invalid("reporting.timeout_ms must be >= 1".to_string()));
        }
        if self.recurrence.max_types == 0 {
            return Err(invalid("recurrence.max_types must be >= 1".to_string()));
        }
        if self.tracer.capacity == 0 {
            return Err(invalid("tracer.capacity must be >= 1".to_string()));
        }

        if !self.breakers.contains_key(&self.model.breaker) {
            return Err(invalid(format!(
                "model.breaker '{}' has no [breakers.{}] section",
                self.model.breaker, self.model.breaker
            )));
        }
        if !self.retry.contains_key(&self.model.retry_policy) {
            return Err(invalid(format!(
                "model.retry_policy '{}' has no [retry.{}] section",
                self.model.retry_policy, self.model.retry_policy
            )));
        }

        let h = &self.heuristic;
        if h.voltage_min > h.voltage_max {
            return Err(invalid("heuristic.voltage_min must be <= voltage_max".to_string()));
        }

        self.policy.sub_action_table()?;
        Ok(())
    }
}
