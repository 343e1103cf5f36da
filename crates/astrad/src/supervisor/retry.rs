//! Retry with exponential backoff and jitter
//!
//! Only errors whose [`ErrorKind`] is in the policy's retryable set earn another
//! attempt. The wait between attempts is a tokio timer, so it suspends only the
//! calling task.

use astra_common::{Classify, ErrorKind, JitterType, RetryConfig};
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::metrics::GuardMetrics;

/// Backoff policy for one protected operation
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: JitterType,
    retryable: HashSet<ErrorKind>,
}

impl RetryPolicy {
    /// Policy retrying transient errors only
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter: JitterType) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter,
            retryable: HashSet::from([ErrorKind::Transient]),
        }
    }

    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// Delay before `attempt` (1-based) without jitter
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before `attempt` with this policy's jitter applied
    pub fn jittered_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if nominal.is_zero() {
            return Duration::ZERO;
        }

        let d = nominal.as_secs_f64();
        let secs = match self.jitter {
            JitterType::Full => d * rng.gen_range(0.5..=1.5),
            JitterType::Equal => d / 2.0 + rng.gen_range(0.0..=d / 2.0),
            JitterType::Decorrelated => rng.gen_range(0.0..=d * 3.0).min(self.max_delay.as_secs_f64()),
            JitterType::None => d,
        };

        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay(), config.max_delay(), config.jitter)
            .with_retryable(config.retryable.iter().copied())
    }
}

/// Nominal delay before every attempt; index 0 is the first attempt and is zero
pub fn backoff_schedule(policy: &RetryPolicy) -> Vec<Duration> {
    (1..=policy.max_attempts)
        .map(|attempt| policy.nominal_delay(attempt))
        .collect()
}

/// How a retried operation ultimately failed
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Error kind outside the retryable set; no further attempts were made
    #[error("non-retryable failure on attempt {attempt}: {error}")]
    NonRetryable { attempt: u32, error: E },

    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// The last error the operation returned
    pub fn into_inner(self) -> E {
        match self {
            Self::NonRetryable { error, .. } => error,
            Self::Exhausted { last, .. } => last,
        }
    }
}

impl<E: Classify> Classify for RetryError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NonRetryable { error, .. } => error.kind(),
            Self::Exhausted { last, .. } => last.kind(),
        }
    }
}

/// Per-policy retry counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    pub attempts: u64,
    pub retries: u64,
    pub exhaustions: u64,
    pub non_retryable: u64,
}

#[derive(Debug, Default)]
struct RetryCounters {
    attempts: AtomicU64,
    retries: AtomicU64,
    exhaustions: AtomicU64,
    non_retryable: AtomicU64,
}

/// Runs an operation under a [`RetryPolicy`]
#[derive(Debug)]
pub struct RetryExecutor {
    name: String,
    policy: RetryPolicy,
    counters: RetryCounters,
    metrics: Option<Arc<GuardMetrics>>,
}

impl RetryExecutor {
    pub fn new(name: impl Into<String>, policy: RetryPolicy, metrics: Option<Arc<GuardMetrics>>) -> Self {
        Self {
            name: name.into(),
            policy,
            counters: RetryCounters::default(),
            metrics,
        }
    }

    pub fn from_config(
        name: impl Into<String>,
        config: &RetryConfig,
        metrics: Option<Arc<GuardMetrics>>,
    ) -> Self {
        Self::new(name, RetryPolicy::from(config), metrics)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            exhaustions: self.counters.exhaustions.load(Ordering::Relaxed),
            non_retryable: self.counters.non_retryable.load(Ordering::Relaxed),
        }
    }

    /// Call `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` is reached.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let mut attempt: u32 = 1;

        loop {
            if attempt > 1 {
                let delay = {
                    let mut rng = rand::thread_rng();
                    self.policy.jittered_delay(attempt, &mut rng)
                };
                if let Some(ref m) = self.metrics {
                    m.record_retry_delay(&self.name, delay.as_secs_f64());
                }
                debug!(
                    policy = %self.name,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "backing off before retry"
                );
                sleep(delay).await;
            }

            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            if let Some(ref m) = self.metrics {
                m.record_retry_attempt(&self.name);
            }

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let kind = error.kind();
            if !self.policy.is_retryable(kind) {
                self.counters.non_retryable.fetch_add(1, Ordering::Relaxed);
                debug!(policy = %self.name, attempt, kind = %kind, error = %error, "non-retryable failure");
                return Err(RetryError::NonRetryable { attempt, error });
            }

            if attempt >= self.policy.max_attempts {
                self.counters.exhaustions.fetch_add(1, Ordering::Relaxed);
                if let Some(ref m) = self.metrics {
                    m.record_retry_exhaustion(&self.name);
                }
                warn!(policy = %self.name, attempts = attempt, error = %error, "retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            debug!(policy = %self.name, attempt, error = %error, "retryable failure");
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astra_common::InferenceError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::AtomicU32;

    fn policy(max_attempts: u32, jitter: JitterType) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(500), Duration::from_secs(8), jitter)
    }

    #[test]
    fn test_nominal_delays_double_and_cap() {
        let p = policy(7, JitterType::None);
        let schedule: Vec<u64> = backoff_schedule(&p).iter().map(|d| d.as_millis() as u64).collect();
        assert_eq!(schedule, vec![0, 500, 1000, 2000, 4000, 8000, 8000]);
    }

    #[test]
    fn test_nominal_delay_saturates_for_huge_attempts() {
        let p = policy(3, JitterType::None);
        assert_eq!(p.nominal_delay(200), Duration::from_secs(8));
    }

    #[test]
    fn test_full_jitter_bounds() {
        let p = policy(5, JitterType::Full);
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 2..=5 {
            let nominal = p.nominal_delay(attempt).as_secs_f64();
            for _ in 0..200 {
                let d = p.jittered_delay(attempt, &mut rng).as_secs_f64();
                assert!(d >= nominal * 0.5 - 1e-9 && d <= nominal * 1.5 + 1e-9, "{} vs {}", d, nominal);
            }
        }
        assert_eq!(p.jittered_delay(1, &mut rng), Duration::ZERO);
    }

    #[test]
    fn test_equal_and_decorrelated_jitter_bounds() {
        let equal = policy(6, JitterType::Equal);
        let decorrelated = policy(6, JitterType::Decorrelated);
        let mut rng = StdRng::seed_from_u64(42);

        for attempt in 2..=6 {
            let nominal = equal.nominal_delay(attempt).as_secs_f64();
            for _ in 0..200 {
                let e = equal.jittered_delay(attempt, &mut rng).as_secs_f64();
                assert!(e >= nominal / 2.0 - 1e-9 && e <= nominal + 1e-9);

                let d = decorrelated.jittered_delay(attempt, &mut rng);
                assert!(d <= Duration::from_secs(8));
            }
        }
    }

    #[test]
    fn test_policy_from_config() {
        let config = RetryConfig {
            max_attempts: 4,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter: JitterType::Equal,
            retryable: vec![ErrorKind::Transient, ErrorKind::Validation],
        };
        let p = RetryPolicy::from(&config);
        assert_eq!(p.max_attempts, 4);
        assert!(p.is_retryable(ErrorKind::Validation));
        assert!(!p.is_retryable(ErrorKind::Permanent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let executor = RetryExecutor::new("model", policy(3, JitterType::Full), None);
        let calls = Arc::new(AtomicU32::new(0));

        let result = executor
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(InferenceError::Transient("timeout".into()))
                    } else {
                        Ok(0.9)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 0.9);
        assert_eq!(
            executor.stats(),
            RetryStats {
                attempts: 3,
                retries: 2,
                exhaustions: 0,
                non_retryable: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let executor = RetryExecutor::new("model", policy(5, JitterType::Full), None);
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<f64, _> = executor
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(InferenceError::Permanent("bad model".into()))
                }
            })
            .await;

        match result {
            Err(RetryError::NonRetryable { attempt, error }) => {
                assert_eq!(attempt, 1);
                assert_eq!(error, InferenceError::Permanent("bad model".into()));
            }
            other => panic!("expected non-retryable, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(executor.stats().non_retryable, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_waits_nominal_schedule() {
        let p = RetryPolicy::new(
            3,
            Duration::from_millis(100),
            Duration::from_secs(1),
            JitterType::None,
        );
        let executor = RetryExecutor::new("model", p, None);
        let started = tokio::time::Instant::now();

        let result: Result<(), _> = executor
            .execute(|| async { Err(InferenceError::Transient("reset".into())) })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_exhausted());
        assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
        assert_eq!(err.kind(), ErrorKind::Transient);

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(310));
        assert_eq!(executor.stats().exhaustions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_does_not_block_other_tasks() {
        let p = RetryPolicy::new(2, Duration::from_secs(5), Duration::from_secs(5), JitterType::None);
        let executor = Arc::new(RetryExecutor::new("model", p, None));

        let slow = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                executor
                    .execute(|| async { Err::<(), _>(InferenceError::Transient("slow".into())) })
                    .await
            })
        };

        // Runs to completion while the first task sleeps between attempts
        let quick = tokio::spawn(async { 1 + 1 });
        assert_eq!(quick.await.unwrap(), 2);
        assert!(!slow.is_finished());

        assert!(slow.await.unwrap().is_err());
    }
}
