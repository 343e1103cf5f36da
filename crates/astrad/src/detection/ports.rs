//! Detection collaborator traits
//!
//! Production code talks to a model over HTTP; tests use
//! `ScriptedInferenceClient` with pre-configured responses.

use astra_common::{Features, InferenceError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Traits
// ============================================================================

/// Remote or local model producing `(is_anomaly, score)`
///
/// Every failure must already be classified into an [`InferenceError`] kind.
#[async_trait]
pub trait ModelInferenceClient: Send + Sync {
    async fn infer(&self, features: &Features) -> Result<(bool, f64), InferenceError>;
}

/// Deterministic evaluator used when the model is unavailable. Never fails.
pub trait HeuristicFallback: Send + Sync {
    fn evaluate(&self, features: &Features) -> (bool, f64);
}

// ============================================================================
// Scripted client (testing)
// ============================================================================

/// Model client replaying a fixed script of outcomes
pub struct ScriptedInferenceClient {
    script: Mutex<VecDeque<Result<(bool, f64), InferenceError>>>,
    exhausted: Result<(bool, f64), InferenceError>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedInferenceClient {
    /// Client that returns `outcome` on every call
    pub fn always(outcome: Result<(bool, f64), InferenceError>) -> Self {
        Self::scripted(Vec::new(), outcome)
    }

    /// Client that replays `script` in order, then returns `exhausted` forever
    pub fn scripted(
        script: Vec<Result<(bool, f64), InferenceError>>,
        exhausted: Result<(bool, f64), InferenceError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            exhausted,
            latency: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep this long (tokio timer) before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelInferenceClient for ScriptedInferenceClient {
    async fn infer(&self, _features: &Features) -> Result<(bool, f64), InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let next = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        next.unwrap_or_else(|| self.exhausted.clone())
    }
}
