//! Resilience primitives for unreliable collaborators
//!
//! - Circuit breakers that fail fast once an operation is unhealthy
//! - A registry of named breakers constructed at startup
//! - Retry with exponential backoff and jitter
//!
//! Composition at a call site is fixed: retry innermost, breaker outermost, so
//! an exhausted retry reaches the breaker as a single failure.

pub mod circuit;
pub mod registry;
pub mod retry;

pub use circuit::{BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use registry::BreakerRegistry;
pub use retry::{backoff_schedule, RetryError, RetryExecutor, RetryPolicy, RetryStats};
