//! Token-bucket admission control.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, sleep};
use tracing::trace;

/// Bucket state. Invariant: `0 <= tokens <= max_tokens`.
#[derive(Debug)]
struct RateLimitState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter.
///
/// The bucket starts full. Tokens refill continuously at
/// `requests_per_second / 1000` tokens per millisecond up to
/// `requests_per_second`, and every admission consumes one. The
/// read-modify-write of the token count happens under a mutex; waiting for
/// a token happens outside it, on a tokio timer.
pub struct RateLimiter {
    state: Mutex<RateLimitState>,
    max_tokens: f64,
    refill_per_ms: f64,
}

impl RateLimiter {
    /// Create a limiter admitting `requests_per_second` calls per second.
    ///
    /// A rate of zero is treated as one.
    pub fn new(requests_per_second: u32) -> Self {
        let rate = f64::from(requests_per_second.max(1));
        Self {
            state: Mutex::new(RateLimitState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
            max_tokens: rate,
            refill_per_ms: rate / 1000.0,
        }
    }

    /// Bucket capacity.
    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }

    /// Wait until a token is available, then consume it.
    ///
    /// Never fails. Each waiter sleeps for its own computed deficit and
    /// re-checks the bucket on wake-up, so concurrent callers cannot
    /// over-admit.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                self.deficit_wait(state.tokens)
            };
            trace!(wait_ms = wait.as_millis() as u64, "rate limiter waiting for token");
            sleep(wait).await;
        }
    }

    /// Consume a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently in the bucket (after a lazy refill).
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut RateLimitState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        let refilled = state.tokens + elapsed.as_secs_f64() * 1000.0 * self.refill_per_ms;
        state.tokens = refilled.min(self.max_tokens);
        state.last_refill = now;
    }

    /// Time until the bucket holds one whole token: `(1 - tokens) / refill_rate`.
    fn deficit_wait(&self, tokens: f64) -> Duration {
        let ms = (1.0 - tokens) / self.refill_per_ms;
        // Round up to the next microsecond so the wake-up never lands just short.
        Duration::from_micros((ms * 1000.0).ceil().max(1.0) as u64)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_tokens", &self.max_tokens)
            .field("available", &self.available_tokens())
            .finish()
    }
}
