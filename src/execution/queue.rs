//! Priority request queue gated by the rate limiter.
//!
//! Jobs are ordered by descending priority and, among equal priorities, by
//! enqueue order. A single dispatch loop drains the queue: it waits for a
//! rate-limiter token, pops the current head and spawns it. Admission is
//! therefore strictly ordered; completion is not (a fast job admitted later
//! may finish before a slow one admitted earlier).
//!
//! ```text
//!  enqueue(p=1) ─┐
//!  enqueue(p=5) ─┼─► [ 5 | 3 | 1 ] ──► acquire() ──► spawn(job)
//!  enqueue(p=3) ─┘        heap          limiter        settles caller
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use super::rate_limit::RateLimiter;
use crate::{HuginnError, Result};

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct QueuedRequest {
    priority: i32,
    seq: u64,
    job: Job,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    // Max-heap: higher priority first, then lower sequence number first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    pending: BinaryHeap<QueuedRequest>,
    next_seq: u64,
    draining: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    limiter: Arc<RateLimiter>,
}

/// Priority-ordered dispatcher in front of a [`RateLimiter`].
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                limiter,
            }),
        }
    }

    /// Jobs waiting for admission.
    pub fn len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue `job` at `priority` and return a future for its result.
    ///
    /// The job is queued immediately, not when the returned future is first
    /// polled. It is settled exactly once; if it can never run (runtime shut
    /// down, job panicked) the future resolves to [`HuginnError::QueueClosed`].
    ///
    /// # Panics
    ///
    /// Must be called within a tokio runtime: the first enqueue on an idle
    /// queue spawns the dispatch loop.
    pub fn enqueue<T, F, Fut>(&self, priority: i32, job: F) -> Queued<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || -> BoxFuture<'static, ()> {
            Box::pin(async move {
                // Caller may have stopped waiting.
                let _ = tx.send(job().await);
            })
        });

        let start_loop = {
            let mut state = self.inner.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(QueuedRequest { priority, seq, job });
            trace!(priority, seq, pending = state.pending.len(), "enqueued");
            !std::mem::replace(&mut state.draining, true)
        };

        if start_loop {
            tokio::spawn(Self::drain(Arc::clone(&self.inner)));
        }

        Queued { rx }
    }

    /// Dispatch loop. Exactly one runs while `draining` is set.
    async fn drain(inner: Arc<QueueInner>) {
        loop {
            {
                let mut state = inner.state.lock();
                if state.pending.is_empty() {
                    state.draining = false;
                    return;
                }
            }

            inner.limiter.acquire().await;

            // Only this loop pops, so the queue is still non-empty.
            let next = inner.state.lock().pending.pop();
            if let Some(request) = next {
                trace!(priority = request.priority, seq = request.seq, "dispatching");
                tokio::spawn((request.job)());
            }
        }
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("pending", &self.len())
            .finish()
    }
}

/// Completion of a queued job.
#[must_use = "the job runs regardless, but its result is only observable by awaiting"]
pub struct Queued<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Queued<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(HuginnError::QueueClosed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_order_is_priority_then_fifo() {
        let noop = || -> Job { Box::new(|| -> BoxFuture<'static, ()> { Box::pin(async {}) }) };
        let mut heap = BinaryHeap::new();
        for (seq, priority) in [(0, 1), (1, 5), (2, 3), (3, 5), (4, 1)] {
            heap.push(QueuedRequest {
                priority,
                seq,
                job: noop(),
            });
        }
        let order: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|r| (r.priority, r.seq))
            .collect();
        assert_eq!(order, [(5, 1), (5, 3), (3, 2), (1, 0), (1, 4)]);
    }
}
