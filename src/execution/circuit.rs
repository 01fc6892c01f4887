//! Three-state circuit breaker.
//!
//! # States
//! - Closed: calls pass through; consecutive failures are counted
//! - Open: calls fail fast with [`HuginnError::CircuitOpen`], no downstream call
//! - Half-open: up to `half_open_max_calls` probes run at once; the rest
//!   fail fast as if open
//!
//! # Transitions
//! ```text
//! Closed    → Open:      failure_count >= failure_threshold
//! Open      → HalfOpen:  first call after reset_timeout has elapsed
//! HalfOpen  → Closed:    success_count >= success_threshold
//! HalfOpen  → Open:      any failure
//! ```
//!
//! The hard timeout bounds each attempt ([`CircuitBreaker::bounded`]), while
//! admission and outcome accounting ([`CircuitBreaker::guard`]) cover the
//! whole logical call, retries included.
//!
//! Every transition is broadcast as a [`StateChange`]; the client forwards
//! transitions into `Open` to its alert sink.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::telemetry;
use crate::{HuginnError, Result};

const EVENT_BUFFER: usize = 32;

/// Circuit breaker thresholds and timers.
///
/// ```rust
/// # use huginn::CircuitBreakerConfig;
/// # use std::time::Duration;
/// let config = CircuitBreakerConfig::new()
///     .failure_threshold(3)
///     .reset_timeout(Duration::from_secs(10));
/// assert_eq!(config.half_open_limit(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (while closed) that open the circuit. Default: 5.
    pub failure_threshold: u32,
    /// Successes (while half-open) that close the circuit. Default: 2.
    pub success_threshold: u32,
    /// Calls admitted at once while half-open. Default: `success_threshold`.
    pub half_open_max_calls: Option<u32>,
    /// Hard bound on each guarded attempt. Default: 30s.
    pub timeout: Duration,
    /// How long the circuit stays open before probing. Default: 60s.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            half_open_max_calls: None,
            timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold.
    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n.max(1);
        self
    }

    /// Set the success threshold.
    pub fn success_threshold(mut self, n: u32) -> Self {
        self.success_threshold = n.max(1);
        self
    }

    /// Set how many calls may probe a half-open circuit concurrently.
    pub fn half_open_max_calls(mut self, n: u32) -> Self {
        self.half_open_max_calls = Some(n.max(1));
        self
    }

    /// Set the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the open-state duration.
    pub fn reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    /// Effective half-open concurrency limit.
    pub fn half_open_limit(&self) -> u32 {
        self.half_open_max_calls
            .unwrap_or(self.success_threshold)
            .max(1)
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Lower-case label used in logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A state transition notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub service: String,
    pub from: CircuitState,
    pub to: CircuitState,
    /// Consecutive failures that triggered the change (zero unless opening).
    pub failures: u32,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: Instant,
    /// Half-open probes currently running.
    probes: u32,
    /// Bumped on every transition so stale permits release nothing.
    epoch: u64,
}

/// Admission granted by [`CircuitBreaker::try_acquire`].
///
/// A permit taken while half-open occupies one probe slot until dropped.
#[must_use = "dropping a permit releases its half-open probe slot"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: Option<u64>,
}

impl Permit<'_> {
    /// Whether this permit holds a half-open probe slot.
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Some(epoch) = self.probe {
            let mut inner = self.breaker.inner.lock();
            if inner.epoch == epoch {
                inner.probes = inner.probes.saturating_sub(1);
            }
        }
    }
}

impl fmt::Debug for Permit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("probe", &self.is_probe())
            .finish()
    }
}

/// Circuit breaker for one protected service class.
///
/// State is only mutated by the breaker's own success/failure handlers.
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    events: broadcast::Sender<StateChange>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                next_attempt_at: Instant::now(),
                probes: 0,
                epoch: 0,
            }),
            events,
        }
    }

    /// Protected service class name.
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failures counted so far in the closed state.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    /// Run a single attempt through the breaker.
    ///
    /// While open, returns `CircuitOpen` without polling `fut`. Otherwise the
    /// future races the configured timeout; a timeout counts as a failure,
    /// drops (cancels) the inner future and reports `operation` as the call
    /// that timed out. Caller errors are passed through without affecting
    /// the circuit.
    pub async fn execute<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.guard(self.bounded(operation, fut)).await
    }

    /// Run `fut` under the breaker's admission and outcome accounting.
    ///
    /// Unlike [`execute`](Self::execute) no deadline is applied: `fut` may
    /// be a whole retry loop whose attempts are each wrapped in
    /// [`bounded`](Self::bounded). The outcome counts once.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self.try_acquire()?;
        let result = fut.await;
        match &result {
            Ok(_) => self.record_success(),
            Err(err) if err.is_caller_error() => {}
            Err(_) => self.record_failure(),
        }
        result
    }

    /// Bound one attempt by the breaker timeout without touching its state.
    pub async fn bounded<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout(self.config.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                debug!(service = %self.service, operation, "breaker deadline elapsed");
                Err(HuginnError::Timeout {
                    operation: operation.to_owned(),
                    after: self.config.timeout,
                })
            }
        }
    }

    /// Admission check. Moves an expired open circuit to half-open.
    ///
    /// While half-open at most [`half_open_limit`] permits are outstanding;
    /// further callers get `CircuitOpen` until a probe finishes.
    ///
    /// [`half_open_limit`]: CircuitBreakerConfig::half_open_limit
    #[tracing::instrument(level = "trace", skip(self), fields(service = %self.service))]
    pub fn try_acquire(&self) -> Result<Permit<'_>> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(self.permit(None)),
            CircuitState::HalfOpen => self.take_probe(&mut inner),
            CircuitState::Open => {
                let now = Instant::now();
                if now >= inner.next_attempt_at {
                    debug!("reset timeout elapsed, probing");
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    self.take_probe(&mut inner)
                } else {
                    let retry_after = inner.next_attempt_at - now;
                    Err(HuginnError::CircuitOpen {
                        service: self.service.clone(),
                        retry_after,
                    })
                }
            }
        }
    }

    fn take_probe(&self, inner: &mut BreakerState) -> Result<Permit<'_>> {
        if inner.probes >= self.config.half_open_limit() {
            debug!(probes = inner.probes, "half-open probe limit reached");
            return Err(HuginnError::CircuitOpen {
                service: self.service.clone(),
                retry_after: self.config.timeout,
            });
        }
        inner.probes += 1;
        Ok(self.permit(Some(inner.epoch)))
    }

    fn permit(&self, probe: Option<u64>) -> Permit<'_> {
        Permit {
            breaker: self,
            probe,
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                debug!(
                    service = %self.service,
                    successes = inner.success_count,
                    threshold = self.config.success_threshold,
                    "success in half-open state"
                );
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            // A call admitted before the circuit opened finished late.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                warn!(
                    service = %self.service,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "failure in closed state"
                );
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!(service = %self.service, "failure in half-open state, reopening circuit");
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        let failures = match to {
            CircuitState::Open => inner.failure_count,
            _ => 0,
        };
        inner.state = to;
        inner.epoch += 1;
        inner.probes = 0;

        match to {
            CircuitState::Open => {
                inner.next_attempt_at = Instant::now() + self.config.reset_timeout;
                inner.success_count = 0;
                warn!(
                    service = %self.service,
                    failures,
                    reset_ms = self.config.reset_timeout.as_millis() as u64,
                    "circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.success_count = 0;
                debug!(service = %self.service, "circuit breaker half-open");
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
                info!(service = %self.service, "circuit breaker closed");
            }
        }

        metrics::counter!(telemetry::CIRCUIT_TRANSITIONS_TOTAL,
            "service" => self.service.clone(),
            "to" => to.label(),
        )
        .increment(1);

        // No subscribers is fine.
        let _ = self.events.send(StateChange {
            service: self.service.clone(),
            from,
            to,
            failures,
        });
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("service", &self.service)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("success_count", &inner.success_count)
            .field("probes", &inner.probes)
            .finish()
    }
}
