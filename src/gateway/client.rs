//! The composed client for one service class.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::cache::result::merge_batch_results;
use crate::cache::{ResultCache, SweeperHandle};
use crate::execution::{
    CircuitBreaker, CircuitState, EndpointRouter, ErrorContext, RateLimiter, RequestQueue,
    RetryExecutor, Severity, StateChange,
};
use crate::telemetry;
use crate::traits::{AlertSink, RemoteCall};
use crate::types::{Alert, CallDescriptor, ClientStats, Endpoint};
use crate::{HuginnError, Result};

/// Parts shared between the client handle and queued jobs.
pub(crate) struct ClientCore {
    pub(crate) service: String,
    pub(crate) transport: Arc<dyn RemoteCall>,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) router: Arc<EndpointRouter>,
    pub(crate) retry: RetryExecutor,
    pub(crate) request_timeout: Duration,
}

impl ClientCore {
    /// Breaker-guarded, retried execution of one call.
    ///
    /// The breaker admits and scores the logical call once; its hard timeout
    /// applies to every attempt, so a full retry budget always ends in the
    /// retry executor's escalation rather than a breaker cut-off.
    async fn run(&self, call: &CallDescriptor) -> Result<Value> {
        let mut context = ErrorContext::new(call.operation.as_str())
            .retryable(!call.options.no_retry)
            .with_metadata("target", call.target.as_str())
            .with_metadata("args", Value::Array(call.args.clone()));
        if let Some(severity) = call.options.severity {
            context = context.severity(severity);
        }

        let attempts = self
            .retry
            .execute(|attempt| self.attempt(call, attempt), &context);
        self.breaker.guard(attempts).await
    }

    /// One deadline-bounded attempt against the routed endpoint.
    async fn attempt(&self, call: &CallDescriptor, attempt: u32) -> Result<Value> {
        let endpoint = match &call.options.routing_key {
            Some(key) => self.router.resolve_keyed(&self.service, key, attempt)?,
            None => self.router.resolve(&self.service)?,
        };
        debug!(%endpoint, attempt, "dispatching attempt");

        let start = Instant::now();
        let request = tokio::time::timeout(
            self.request_timeout,
            self.transport.call(&endpoint, call),
        );
        let result = self
            .breaker
            .bounded(&call.operation, async {
                request.await.unwrap_or_else(|_| {
                    Err(HuginnError::Timeout {
                        operation: call.operation.clone(),
                        after: self.request_timeout,
                    })
                })
            })
            .await;

        match &result {
            Ok(_) => self.router.record_success(&self.service, &endpoint),
            Err(err) => self.router.record_failure(&self.service, &endpoint, err),
        }
        self.record_request(&call.operation, &endpoint, start, result.is_ok());
        result
    }

    fn record_request(&self, operation: &str, endpoint: &Endpoint, start: Instant, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        let route = if endpoint.is_primary() {
            "primary"
        } else {
            "fallback"
        };
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "service" => self.service.clone(),
            "operation" => operation.to_owned(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
            "service" => self.service.clone(),
            "operation" => operation.to_owned(),
            "endpoint" => route,
        )
        .record(start.elapsed().as_secs_f64());
    }
}

/// Cached, queued, rate-limited, breaker-guarded, retried and failed-over
/// access to one downstream service class.
///
/// Created with [`Huginn::builder()`](crate::Huginn::builder). Dropping the
/// client stops its background tasks; calls already admitted run to
/// completion.
pub struct ResilientClient {
    core: Arc<ClientCore>,
    queue: RequestQueue,
    limiter: Arc<RateLimiter>,
    cache: ResultCache,
    _sweeper: Option<SweeperHandle>,
    alert_forwarder: JoinHandle<()>,
}

impl ResilientClient {
    pub(crate) fn new(
        core: ClientCore,
        limiter: Arc<RateLimiter>,
        cache: ResultCache,
        sweeper: Option<SweeperHandle>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let events = core.breaker.subscribe();
        let alert_forwarder = tokio::spawn(forward_open_alerts(events, alerts));
        Self {
            core: Arc::new(core),
            queue: RequestQueue::new(Arc::clone(&limiter)),
            limiter,
            cache,
            _sweeper: sweeper,
            alert_forwarder,
        }
    }

    /// Service class this client protects.
    pub fn service(&self) -> &str {
        &self.core.service
    }

    /// Execute a call.
    ///
    /// Cacheable calls are answered from the cache when a live entry exists;
    /// concurrent misses for the same key share a single downstream call.
    /// Everything else goes through the priority queue.
    #[instrument(skip_all, fields(service = %self.core.service, operation = %call.operation))]
    pub async fn execute(&self, call: CallDescriptor) -> Result<Value> {
        if !call.is_cacheable() {
            return self.dispatch(call).await;
        }

        let key = call.cache_key();
        let ttl = call.options.cache_ttl;
        let operation = call.operation.clone();
        let (value, hit) = self
            .cache
            .get_or_try_insert_with(key, ttl, self.dispatch(call))
            .await?;

        let name = if hit {
            telemetry::CACHE_HITS_TOTAL
        } else {
            telemetry::CACHE_MISSES_TOTAL
        };
        metrics::counter!(name,
            "service" => self.core.service.clone(),
            "operation" => operation,
        )
        .increment(1);
        Ok(value)
    }

    /// Execute many calls, returning results in input order.
    ///
    /// Cache hits are answered directly. Remaining calls are deduplicated by
    /// cache key and dispatched in bursts sized by the tokens currently
    /// available. The first failure fails the whole batch.
    #[instrument(skip_all, fields(service = %self.core.service, calls = calls.len()))]
    pub async fn execute_batch(&self, calls: Vec<CallDescriptor>) -> Result<Vec<Value>> {
        let mut cached = Vec::with_capacity(calls.len());
        for call in &calls {
            let hit = if call.is_cacheable() {
                self.cache.get(&call.cache_key()).await
            } else {
                None
            };
            cached.push(hit);
        }

        // One load per distinct cacheable key; uncacheable calls always load.
        let mut unique = Vec::new();
        let mut slots = Vec::new();
        let mut seen = HashMap::new();
        for (call, hit) in calls.into_iter().zip(&cached) {
            if hit.is_some() {
                continue;
            }
            let slot = if call.is_cacheable() {
                match seen.entry(call.cache_key()) {
                    Entry::Occupied(e) => *e.get(),
                    Entry::Vacant(e) => {
                        e.insert(unique.len());
                        unique.push(call);
                        unique.len() - 1
                    }
                }
            } else {
                unique.push(call);
                unique.len() - 1
            };
            slots.push(slot);
        }
        debug!(
            hits = cached.iter().filter(|c| c.is_some()).count(),
            loads = unique.len(),
            "batch partitioned"
        );

        let mut loaded = Vec::with_capacity(unique.len());
        let mut pending = unique.into_iter().peekable();
        while pending.peek().is_some() {
            let burst = (self.limiter.available_tokens().floor() as usize).max(1);
            let chunk: Vec<_> = pending.by_ref().take(burst).collect();
            for result in join_all(chunk.into_iter().map(|call| self.execute(call))).await {
                loaded.push(result?);
            }
        }

        let loaded = slots
            .into_iter()
            .map(|slot| loaded.get(slot).cloned().ok_or(HuginnError::EmptyResponse))
            .collect::<Result<Vec<_>>>()?;
        merge_batch_results(cached, loaded)
    }

    /// Remove cached results whose key contains `pattern`.
    ///
    /// Keys start with `"{target}:{operation}:"`, so a target or
    /// target-and-operation prefix invalidates exactly those reads.
    pub fn invalidate(&self, pattern: &str) -> Result<()> {
        self.cache.invalidate(pattern)
    }

    /// Drop every cached result.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Switch this service class back to its primary endpoint.
    pub fn reset_to_primary(&self) {
        self.core.router.reset_to_primary(&self.core.service);
    }

    /// Health snapshot.
    pub async fn stats(&self) -> ClientStats {
        self.cache.sync().await;
        let health = self
            .core
            .router
            .health(&self.core.service)
            .unwrap_or_default();
        ClientStats {
            service: self.core.service.clone(),
            cache_size: self.cache.len(),
            queue_length: self.queue.len(),
            available_tokens: self.limiter.available_tokens(),
            circuit_state: self.core.breaker.state(),
            using_fallback: health.using_fallback,
            consecutive_failures: health.consecutive_failures,
        }
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.core.breaker
    }

    pub fn router(&self) -> &Arc<EndpointRouter> {
        &self.core.router
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    async fn dispatch(&self, call: CallDescriptor) -> Result<Value> {
        let core = Arc::clone(&self.core);
        self.queue
            .enqueue(call.priority, move || async move { core.run(&call).await })
            .await
    }
}

impl Drop for ResilientClient {
    fn drop(&mut self) {
        self.alert_forwarder.abort();
    }
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("service", &self.core.service)
            .field("transport", &self.core.transport.name())
            .field("breaker", &self.core.breaker)
            .field("queue", &self.queue)
            .finish()
    }
}

/// Turn breaker transitions into `Open` into alerts.
async fn forward_open_alerts(
    mut events: tokio::sync::broadcast::Receiver<StateChange>,
    alerts: Arc<dyn AlertSink>,
) {
    loop {
        match events.recv().await {
            Ok(change) if change.to == CircuitState::Open => {
                let mut metadata = Map::new();
                metadata.insert("from".into(), change.from.label().into());
                metadata.insert("failures".into(), change.failures.into());
                let alert = Alert {
                    title: format!("Circuit breaker opened: {}", change.service),
                    message: format!(
                        "{} consecutive failures, calls to {} are failing fast",
                        change.failures, change.service
                    ),
                    severity: Severity::High,
                    source: format!("circuit-breaker:{}", change.service),
                    metadata,
                };
                if let Err(e) = alerts.notify(alert).await {
                    error!(service = %change.service, error = %e, "failed to deliver alert");
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "circuit events lagged");
            }
            Err(RecvError::Closed) => return,
        }
    }
}
