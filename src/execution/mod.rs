//! Execution primitives.
//!
//! Each primitive is usable on its own; [`ResilientClient`](crate::ResilientClient)
//! composes them per service class:
//!
//! ```text
//! cache ─► queue (priority) ─► rate limiter ─► circuit breaker
//!                                                  └─► retry ─► router ─► transport
//! ```

pub mod circuit;
pub mod classify;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod routing;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Permit, StateChange};
pub use classify::{Classification, ErrorClassifier, ErrorContext, FailureKind, Severity};
pub use queue::{Queued, RequestQueue};
pub use rate_limit::RateLimiter;
pub use retry::{RetryConfig, RetryExecutor};
pub use routing::{EndpointHealth, EndpointRouter};
