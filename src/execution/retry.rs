//! Retry configuration, delay calculation, and the retry executor.
//!
//! [`RetryExecutor`] runs an attempt function until it succeeds, the
//! failure is judged non-retryable, or `max_attempts` is reached. After
//! exhaustion it escalates through the injected sinks:
//!
//! - severity ≥ high → [`DeadLetter`] to the [`DeadLetterSink`]
//! - severity = critical → additionally an [`Alert`] to the [`AlertSink`]
//!
//! Both side channels run on spawned tasks; their failures are logged and
//! never replace the error returned to the caller.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rand::Rng;
use tracing::{debug, error, warn};

use super::classify::{ErrorContext, Severity};
use crate::telemetry;
use crate::traits::{AlertSink, DeadLetterSink};
use crate::types::{Alert, DeadLetter};
use crate::{HuginnError, Result};

/// Configuration for retry behaviour on transient errors.
///
/// Exponential backoff with additive jitter:
///
/// ```rust
/// # use huginn::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(200))
///     .jitter_factor(0.2);
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 500ms.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Default: 30s.
    pub max_delay: Duration,
    /// Growth factor per attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Fraction of the delay added as random jitter, in `[0, 1]`. Default: 0.1.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Set the base delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the jitter factor (clamped to `[0, 1]`).
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Calculate the delay after attempt `attempt` (0-indexed).
    ///
    /// `initial_delay * backoff_multiplier^attempt`, capped at `max_delay`.
    /// Does not include jitter; see [`jittered_delay()`](Self::jittered_delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Add jitter to `delay`: `delay + delay * jitter_factor * sample`, where
    /// `sample` is in `[0, 1)`. Jitter only ever lengthens the wait.
    pub fn apply_jitter(&self, delay: Duration, sample: f64) -> Duration {
        delay + delay.mul_f64(self.jitter_factor * sample.clamp(0.0, 1.0))
    }

    /// Backoff for `attempt` with random jitter applied.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let sample = rand::thread_rng().gen_range(0.0..1.0);
        self.apply_jitter(self.delay_for_attempt(attempt), sample)
    }

    /// Calculate the effective delay, respecting provider `retry_after` hints.
    ///
    /// If a `retry_after` duration is provided (from a `RateLimited` error),
    /// it takes precedence over the calculated backoff.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.jittered_delay(attempt))
    }
}

/// Executes attempts with classified, bounded, jittered-backoff retry.
pub struct RetryExecutor {
    config: RetryConfig,
    source: String,
    dead_letters: Arc<dyn DeadLetterSink>,
    alerts: Arc<dyn AlertSink>,
}

impl RetryExecutor {
    /// Create an executor. `source` names the service class in escalations.
    pub fn new(
        config: RetryConfig,
        source: impl Into<String>,
        dead_letters: Arc<dyn DeadLetterSink>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            config,
            source: source.into(),
            dead_letters,
            alerts,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `attempt` until success, a non-retryable failure, or exhaustion.
    ///
    /// `attempt` receives the 0-indexed attempt number. A failure is retried
    /// only if `context.retryable` is set and the classifier judges the
    /// error retryable; otherwise it is returned on first occurrence.
    pub async fn execute<F, Fut, T>(&self, mut attempt: F, context: &ErrorContext) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut n = 0;
        loop {
            let err = match attempt(n).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let (failure, class) = context.for_failure(&err);
            if !failure.retryable {
                debug!(
                    operation = %context.operation,
                    kind = ?class.kind,
                    error = %err,
                    "not retrying"
                );
                return Err(err);
            }

            if n + 1 >= max_attempts {
                warn!(
                    source = %self.source,
                    operation = %context.operation,
                    attempts = n + 1,
                    error = %err,
                    "retries exhausted"
                );
                self.escalate(&err, failure, n + 1);
                return Err(err);
            }

            metrics::counter!(telemetry::RETRIES_TOTAL,
                "service" => self.source.clone(),
                "operation" => context.operation.clone(),
            )
            .increment(1);

            let delay = self.config.effective_delay(n, err.retry_after());
            warn!(
                source = %self.source,
                operation = %context.operation,
                attempt = n + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after transient error"
            );
            tokio::time::sleep(delay).await;
            n += 1;
        }
    }

    /// Emit dead-letter and alert records for an exhausted call.
    fn escalate(&self, err: &HuginnError, context: ErrorContext, attempts: u32) {
        if context.severity < Severity::High {
            return;
        }

        let mut metadata = context.metadata.clone();
        metadata.insert("service".into(), self.source.clone().into());
        metadata.insert("attempts".into(), attempts.into());

        metrics::counter!(telemetry::DEAD_LETTERS_TOTAL,
            "service" => self.source.clone(),
            "severity" => context.severity.to_string(),
        )
        .increment(1);

        let backtrace = Backtrace::capture();
        let letter = DeadLetter {
            operation: context.operation.clone(),
            error_message: err.to_string(),
            stack_trace: (backtrace.status() == BacktraceStatus::Captured)
                .then(|| backtrace.to_string()),
            metadata: metadata.clone(),
            severity: context.severity,
            timestamp: SystemTime::now(),
        };
        let sink = Arc::clone(&self.dead_letters);
        tokio::spawn(async move {
            let operation = letter.operation.clone();
            if let Err(e) = sink.record(letter).await {
                error!(%operation, error = %e, "failed to record dead letter");
            }
        });

        if context.severity == Severity::Critical {
            let alert = Alert {
                title: format!("{} failed after {attempts} attempts", context.operation),
                message: err.to_string(),
                severity: Severity::Critical,
                source: format!("retry:{}", self.source),
                metadata,
            };
            let sink = Arc::clone(&self.alerts);
            tokio::spawn(async move {
                if let Err(e) = sink.notify(alert).await {
                    error!(error = %e, "failed to deliver alert");
                }
            });
        }
    }
}
