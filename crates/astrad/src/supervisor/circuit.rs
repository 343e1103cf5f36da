//! Circuit breaker guarding one unreliable operation
//!
//! State reads and transitions happen under a per-breaker mutex; lifetime
//! counters are plain atomics. Every admitted call runs on its own task so a
//! caller that gives up waiting cannot skip the bookkeeping.

use astra_common::BreakerConfig;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::metrics::GuardMetrics;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally
    Closed,
    /// Circuit is open, calls are rejected
    Open,
    /// Circuit is half-open, probing whether the operation recovered
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a guarded call did not produce a value
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// Fail-fast rejection; the operation was never invoked
    #[error("circuit '{name}' is open")]
    Open { name: String },

    #[error("operation failed: {0}")]
    Failed(E),

    /// The operation task panicked or was cancelled by the runtime
    #[error("operation behind circuit '{name}' aborted: {reason}")]
    Aborted { name: String, reason: String },
}

impl<E> BreakerError<E> {
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Point-in-time view of a breaker for observability
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub failures_total: u64,
    pub successes_total: u64,
    pub trips_total: u64,
    pub recoveries_total: u64,
    pub rejections_total: u64,
    pub since_transition: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    probes_in_flight: u32,
    last_transition: Instant,
    /// Bumped on every transition; outcomes from an older epoch only touch totals
    epoch: u64,
}

#[derive(Debug, Default)]
struct BreakerCounters {
    failures_total: AtomicU64,
    successes_total: AtomicU64,
    trips_total: AtomicU64,
    recoveries_total: AtomicU64,
    rejections_total: AtomicU64,
}

/// Admission slip handed out when a call is let through
#[derive(Debug, Clone, Copy)]
struct Ticket {
    epoch: u64,
    probe: bool,
}

/// Circuit breaker for one named operation
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    counters: BreakerCounters,
    metrics: Option<Arc<GuardMetrics>>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: BreakerConfig,
        metrics: Option<Arc<GuardMetrics>>,
    ) -> Self {
        let name = name.into();
        if let Some(ref m) = metrics {
            m.set_breaker_state(&name, CircuitState::Closed);
        }

        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                probes_in_flight: 0,
                last_transition: Instant::now(),
                epoch: 0,
            }),
            counters: BreakerCounters::default(),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state without applying the cooldown check
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.failure_count,
            half_open_successes: inner.success_count,
            failures_total: self.counters.failures_total.load(Ordering::Relaxed),
            successes_total: self.counters.successes_total.load(Ordering::Relaxed),
            trips_total: self.counters.trips_total.load(Ordering::Relaxed),
            recoveries_total: self.counters.recoveries_total.load(Ordering::Relaxed),
            rejections_total: self.counters.rejections_total.load(Ordering::Relaxed),
            since_transition: inner.last_transition.elapsed(),
        }
    }

    /// Force the breaker back to CLOSED and zero every counter
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.probes_in_flight = 0;
        inner.last_transition = Instant::now();
        inner.epoch += 1;

        self.counters.failures_total.store(0, Ordering::Relaxed);
        self.counters.successes_total.store(0, Ordering::Relaxed);
        self.counters.trips_total.store(0, Ordering::Relaxed);
        self.counters.recoveries_total.store(0, Ordering::Relaxed);
        self.counters.rejections_total.store(0, Ordering::Relaxed);

        if let Some(ref m) = self.metrics {
            m.set_breaker_state(&self.name, CircuitState::Closed);
        }
        info!(breaker = %self.name, "circuit manually reset");
    }

    /// Run `operation` behind the breaker, returning the raw outcome.
    ///
    /// Any `Err` from the operation counts as one circuit failure.
    pub async fn try_call<T, E, Fut>(self: &Arc<Self>, operation: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let ticket = match self.admit() {
            Some(ticket) => ticket,
            None => {
                self.counters.rejections_total.fetch_add(1, Ordering::Relaxed);
                if let Some(ref m) = self.metrics {
                    m.record_breaker_event(&self.name, "rejected");
                }
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                });
            }
        };

        let guard = SettleGuard {
            breaker: Arc::clone(self),
            ticket,
            settled: false,
        };
        let task = tokio::spawn(async move {
            let mut guard = guard;
            let outcome = operation.await;
            guard.settle(outcome.is_ok());
            outcome
        });

        match task.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(BreakerError::Failed(e)),
            Err(join_err) => Err(BreakerError::Aborted {
                name: self.name.clone(),
                reason: join_err.to_string(),
            }),
        }
    }

    /// Run `operation` behind the breaker; rejections and failures both
    /// resolve through `fallback`.
    pub async fn call<T, E, Fut, F>(self: &Arc<Self>, operation: Fut, fallback: F) -> T
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
        F: FnOnce(&BreakerError<E>) -> T,
    {
        match self.try_call(operation).await {
            Ok(value) => value,
            Err(e) => {
                debug!(breaker = %self.name, error = %e, "using fallback");
                fallback(&e)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // Critical sections never panic midway, so a poisoned guard is still consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self) -> Option<Ticket> {
        let mut inner = self.lock();

        if inner.state == CircuitState::Open
            && inner.last_transition.elapsed() >= self.config.recovery_timeout()
        {
            self.transition(&mut inner, CircuitState::HalfOpen);
        }

        match inner.state {
            CircuitState::Closed => Some(Ticket {
                epoch: inner.epoch,
                probe: false,
            }),
            CircuitState::HalfOpen if inner.probes_in_flight < self.config.half_open_max_calls => {
                inner.probes_in_flight += 1;
                Some(Ticket {
                    epoch: inner.epoch,
                    probe: true,
                })
            }
            _ => None,
        }
    }

    fn on_success(&self, ticket: Ticket) {
        self.counters.successes_total.fetch_add(1, Ordering::Relaxed);
        if let Some(ref m) = self.metrics {
            m.record_breaker_event(&self.name, "success");
        }

        let mut inner = self.lock();
        if inner.epoch != ticket.epoch {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                if ticket.probe {
                    inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                }
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, ticket: Ticket) {
        self.counters.failures_total.fetch_add(1, Ordering::Relaxed);
        if let Some(ref m) = self.metrics {
            m.record_breaker_event(&self.name, "failure");
        }

        let mut inner = self.lock();
        if inner.epoch != ticket.epoch {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // Any probe failure restarts the cooldown
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.last_transition = Instant::now();
        inner.epoch += 1;
        inner.success_count = 0;
        inner.probes_in_flight = 0;

        match to {
            CircuitState::Open => {
                self.counters.trips_total.fetch_add(1, Ordering::Relaxed);
                if let Some(ref m) = self.metrics {
                    m.record_breaker_event(&self.name, "trip");
                }
                warn!(
                    breaker = %self.name,
                    from = %from,
                    consecutive_failures = inner.failure_count,
                    cooldown_secs = self.config.recovery_timeout_secs,
                    "circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.failure_count = 0;
                info!(breaker = %self.name, "circuit half-open, probing");
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
                self.counters.recoveries_total.fetch_add(1, Ordering::Relaxed);
                if let Some(ref m) = self.metrics {
                    m.record_breaker_event(&self.name, "recovery");
                }
                info!(breaker = %self.name, "circuit closed, operation recovered");
            }
        }

        if let Some(ref m) = self.metrics {
            m.set_breaker_state(&self.name, to);
        }
    }
}

/// Records the outcome of an admitted call exactly once. Dropped unsettled
/// (panic, runtime shutdown) it counts as a failure.
struct SettleGuard {
    breaker: Arc<CircuitBreaker>,
    ticket: Ticket,
    settled: bool,
}

impl SettleGuard {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.on_success(self.ticket);
        } else {
            self.breaker.on_failure(self.ticket);
        }
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_failure(self.ticket);
        }
    }
}
