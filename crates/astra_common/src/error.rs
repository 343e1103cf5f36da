//! Error taxonomy shared by the detection and decision layers.
//!
//! Every failure coming back from a model-inference collaborator is classified
//! into a closed set of kinds before any retry logic looks at it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed tag set used to decide retryability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, connection resets, 5xx responses
    Transient,
    /// Anything that will fail the same way again
    Permanent,
    /// The collaborator rejected or returned malformed data
    Validation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that know which [`ErrorKind`] they belong to
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// Model inference errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    #[error("transient inference failure: {0}")]
    Transient(String),

    #[error("permanent inference failure: {0}")]
    Permanent(String),

    #[error("inference rejected input or returned malformed output: {0}")]
    Validation(String),
}

impl Classify for InferenceError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) => ErrorKind::Transient,
            Self::Permanent(_) => ErrorKind::Permanent,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }
}

/// Malformed input rejected before it touches any shared state
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("anomaly type must be a non-empty string")]
    EmptyAnomalyType,

    #[error("source identifier must be a non-empty string")]
    EmptySource,

    #[error("severity must be within [0.0, 1.0], got {0}")]
    SeverityOutOfRange(f64),

    #[error("feature vector is empty")]
    EmptyFeatures,

    #[error("feature '{name}' is not a finite number")]
    NonFiniteFeature { name: String },
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_error_classification() {
        assert_eq!(
            InferenceError::Transient("timeout".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            InferenceError::Permanent("bad model".into()).kind(),
            ErrorKind::Permanent
        );
        assert_eq!(
            InferenceError::Validation("nan".into()).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_error_kind_serde_tags() {
        let json = serde_json::to_string(&ErrorKind::Transient).unwrap();
        assert_eq!(json, "\"transient\"");
        let kind: ErrorKind = serde_json::from_str("\"permanent\"").unwrap();
        assert_eq!(kind, ErrorKind::Permanent);
    }
}
