//! Registry of named circuit breakers
//!
//! Constructed once at startup and passed to whoever needs a breaker.

use super::circuit::{BreakerSnapshot, CircuitBreaker};
use crate::metrics::GuardMetrics;
use astra_common::{AstraConfig, BreakerConfig};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Registry of circuit breakers keyed by operation name
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    metrics: Option<Arc<GuardMetrics>>,
}

impl BreakerRegistry {
    pub fn new(metrics: Option<Arc<GuardMetrics>>) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Registry pre-populated with every breaker named in the config
    pub fn from_config(config: &AstraConfig, metrics: Option<Arc<GuardMetrics>>) -> Self {
        let registry = Self::new(metrics);
        for (name, breaker_config) in &config.breakers {
            registry.get_or_register(name, breaker_config.clone());
        }
        registry
    }

    /// Return the breaker called `name`, creating it from `config` if absent.
    /// An existing breaker keeps its original configuration.
    pub fn get_or_register(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            debug!(breaker = %name, "registering circuit breaker");
            Arc::new(CircuitBreaker::new(name, config, self.metrics.clone()))
        }))
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Snapshots of every breaker, sorted by name
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        let mut snapshots: Vec<BreakerSnapshot> = breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
