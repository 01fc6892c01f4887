//! End-to-end tests for [`ResilientClient`] over a mock transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::{Value, json};

use huginn::{
    CallDescriptor, CircuitBreakerConfig, CircuitState, Endpoint, Huginn, HuginnBuilder,
    HuginnError, MemorySink, RemoteCall, Result, RetryConfig, ServiceEndpoints, Severity,
};

// ============================================================================
// Mock transport
// ============================================================================

/// Transport that answers with `respond` and remembers every endpoint hit.
struct MockTransport {
    respond: fn(&CallDescriptor, u32) -> Result<Value>,
    delay: Duration,
    calls: AtomicU32,
    endpoints: Mutex<Vec<String>>,
}

impl MockTransport {
    fn new(respond: fn(&CallDescriptor, u32) -> Result<Value>) -> Arc<Self> {
        Arc::new(Self {
            respond,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            endpoints: Mutex::new(Vec::new()),
        })
    }

    fn slow(respond: fn(&CallDescriptor, u32) -> Result<Value>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            respond,
            delay,
            calls: AtomicU32::new(0),
            endpoints: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteCall for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn call(&self, endpoint: &Endpoint, call: &CallDescriptor) -> Result<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().push(endpoint.url().to_owned());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.respond)(call, n)
    }
}

fn echo(call: &CallDescriptor, n: u32) -> Result<Value> {
    Ok(json!({"op": call.operation, "args": call.args, "n": n}))
}

fn refuse(_: &CallDescriptor, _: u32) -> Result<Value> {
    Err(HuginnError::Network("connection refused".into()))
}

fn builder(transport: &Arc<MockTransport>) -> HuginnBuilder {
    Huginn::builder()
        .service("rpc-reads")
        .endpoints(ServiceEndpoints::new("http://primary").fallback("http://backup"))
        .shared_transport(transport.clone())
        .max_requests_per_second(100)
        .retry(RetryConfig::disabled())
}

/// Poll until `check` passes or a second of wall-clock time elapses.
async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn concurrent_identical_reads_share_one_call_until_expiry() {
    let transport = MockTransport::slow(echo, Duration::from_millis(50));
    let client = builder(&transport)
        .max_requests_per_second(2)
        .build()
        .unwrap();

    let call = CallDescriptor::new("0xabc", "eth_getBalance")
        .arg("0xabc")
        .arg("latest")
        .cache_ttl(Duration::from_millis(1000));

    let results = join_all((0..5).map(|_| client.execute(call.clone()))).await;
    let values: Vec<Value> = results.into_iter().map(|r| r.unwrap()).collect();
    assert!(values.iter().all(|v| *v == values[0]));
    assert_eq!(transport.call_count(), 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    client.execute(call).await.unwrap();
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn distinct_args_are_distinct_entries() {
    let transport = MockTransport::new(echo);
    let client = builder(&transport).build().unwrap();

    client
        .execute(CallDescriptor::new("0xabc", "balanceOf").arg("0x1"))
        .await
        .unwrap();
    client
        .execute(CallDescriptor::new("0xabc", "balanceOf").arg("0x2"))
        .await
        .unwrap();
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn skip_cache_always_reaches_downstream() {
    let transport = MockTransport::new(echo);
    let client = builder(&transport).build().unwrap();

    for _ in 0..3 {
        client
            .execute(CallDescriptor::new("rpc", "eth_blockNumber").skip_cache())
            .await
            .unwrap();
    }
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn zero_ttl_is_not_cached() {
    let transport = MockTransport::new(echo);
    let client = builder(&transport).build().unwrap();

    let call = CallDescriptor::new("rpc", "eth_gasPrice").cache_ttl(Duration::ZERO);
    client.execute(call.clone()).await.unwrap();
    client.execute(call).await.unwrap();
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn failures_are_not_cached() {
    fn fail_first(call: &CallDescriptor, n: u32) -> Result<Value> {
        if n == 0 {
            Err(HuginnError::Rpc {
                code: -32000,
                message: "header not found".into(),
            })
        } else {
            echo(call, n)
        }
    }
    let transport = MockTransport::new(fail_first);
    let client = builder(&transport).build().unwrap();
    let call = CallDescriptor::new("rpc", "eth_getBlockByNumber").arg("0x10");

    assert!(client.execute(call.clone()).await.is_err());
    assert!(client.execute(call).await.is_ok());
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn invalidate_forces_a_refetch() {
    let transport = MockTransport::new(echo);
    let client = builder(&transport).build().unwrap();
    let call = CallDescriptor::new("0xabc", "totalSupply");

    client.execute(call.clone()).await.unwrap();
    client.execute(call.clone()).await.unwrap();
    assert_eq!(transport.call_count(), 1);

    client.invalidate("0xabc:").unwrap();
    client.execute(call).await.unwrap();
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn clear_cache_forces_a_refetch() {
    let transport = MockTransport::new(echo);
    let client = builder(&transport).build().unwrap();
    let call = CallDescriptor::new("0xabc", "decimals");

    client.execute(call.clone()).await.unwrap();
    client.clear_cache();
    client.execute(call).await.unwrap();
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn open_circuit_fails_fast_without_downstream_calls() {
    let transport = MockTransport::new(refuse);
    let client = builder(&transport)
        .circuit_breaker(
            CircuitBreakerConfig::new()
                .failure_threshold(2)
                .reset_timeout(Duration::from_secs(60)),
        )
        .build()
        .unwrap();
    let call = CallDescriptor::new("rpc", "eth_call").skip_cache();

    for _ in 0..2 {
        let err = client.execute(call.clone()).await.unwrap_err();
        assert!(matches!(err, HuginnError::Network(_)));
    }
    assert_eq!(client.circuit_breaker().state(), CircuitState::Open);

    let err = client.execute(call).await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn circuit_opening_raises_an_alert() {
    let transport = MockTransport::new(refuse);
    let sink = MemorySink::new();
    let client = builder(&transport)
        .circuit_breaker(CircuitBreakerConfig::new().failure_threshold(1))
        .alert_sink(sink.clone())
        .build()
        .unwrap();

    let _ = client
        .execute(CallDescriptor::new("rpc", "eth_call").skip_cache())
        .await;

    eventually(|| !sink.alerts().is_empty()).await;
    let alert = &sink.alerts()[0];
    assert_eq!(alert.title, "Circuit breaker opened: rpc-reads");
    assert_eq!(alert.source, "circuit-breaker:rpc-reads");
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.metadata["failures"], 1);
}

#[tokio::test]
async fn exhausted_retries_reach_the_dead_letter_sink() {
    let transport = MockTransport::new(refuse);
    let sink = MemorySink::new();
    let client = builder(&transport)
        .retry(
            RetryConfig::new()
                .max_attempts(2)
                .initial_delay(Duration::from_millis(1)),
        )
        .failover_threshold(100)
        .dead_letter_sink(sink.clone())
        .build()
        .unwrap();

    let call = CallDescriptor::new("0xabc", "eth_getLogs")
        .arg(json!({"fromBlock": "0x1"}))
        .skip_cache();
    client.execute(call).await.unwrap_err();
    assert_eq!(transport.call_count(), 2);

    eventually(|| sink.dead_letters().len() == 1).await;
    let letter = &sink.dead_letters()[0];
    assert_eq!(letter.operation, "eth_getLogs");
    assert_eq!(letter.metadata["target"], "0xabc");
    assert_eq!(letter.metadata["service"], "rpc-reads");
}

#[tokio::test(start_paused = true)]
async fn default_budget_ends_in_a_dead_letter_when_every_attempt_hangs() {
    let transport = MockTransport::slow(echo, Duration::from_secs(3600));
    let sink = MemorySink::new();
    let client = Huginn::builder()
        .service("rpc-reads")
        .endpoints(ServiceEndpoints::new("http://primary"))
        .shared_transport(transport.clone())
        .dead_letter_sink(sink.clone())
        .build()
        .unwrap();

    let err = client
        .execute(CallDescriptor::new("0xabc", "eth_getLogs").skip_cache())
        .await
        .unwrap_err();
    match err {
        HuginnError::Timeout { operation, after } => {
            assert_eq!(operation, "eth_getLogs");
            assert_eq!(after, Duration::from_secs(10));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert_eq!(transport.call_count(), 3);

    eventually(|| sink.dead_letters().len() == 1).await;
    let letter = &sink.dead_letters()[0];
    assert_eq!(letter.operation, "eth_getLogs");
    assert_eq!(letter.severity, Severity::High);
    assert_eq!(letter.metadata["attempts"], 3);
    assert_eq!(client.stats().await.circuit_state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn breaker_timeout_bounds_each_attempt() {
    let transport = MockTransport::slow(echo, Duration::from_secs(3600));
    let client = builder(&transport)
        .request_timeout(Duration::from_secs(10))
        .circuit_breaker(CircuitBreakerConfig::new().timeout(Duration::from_secs(2)))
        .retry(
            RetryConfig::new()
                .max_attempts(2)
                .initial_delay(Duration::from_millis(1)),
        )
        .build()
        .unwrap();

    let err = client
        .execute(CallDescriptor::new("rpc", "eth_call").skip_cache())
        .await
        .unwrap_err();
    match err {
        HuginnError::Timeout { operation, after } => {
            assert_eq!(operation, "eth_call");
            assert_eq!(after, Duration::from_secs(2));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn no_retry_calls_run_once() {
    let transport = MockTransport::new(refuse);
    let client = builder(&transport)
        .retry(
            RetryConfig::new()
                .max_attempts(5)
                .initial_delay(Duration::from_millis(1)),
        )
        .build()
        .unwrap();

    client
        .execute(CallDescriptor::new("rpc", "eth_sendRawTransaction").no_retry())
        .await
        .unwrap_err();
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn slow_attempts_hit_the_request_timeout() {
    let transport = MockTransport::slow(echo, Duration::from_secs(5));
    let client = builder(&transport)
        .request_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let err = client
        .execute(CallDescriptor::new("rpc", "eth_call").skip_cache())
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn stats_report_a_healthy_idle_client() {
    let transport = MockTransport::new(echo);
    let client = builder(&transport)
        .max_requests_per_second(7)
        .build()
        .unwrap();
    client
        .execute(CallDescriptor::new("rpc", "eth_chainId"))
        .await
        .unwrap();

    let stats = client.stats().await;
    assert_eq!(stats.service, "rpc-reads");
    assert_eq!(stats.cache_size, 1);
    assert_eq!(stats.queue_length, 0);
    assert!(stats.available_tokens <= 7.0);
    assert_eq!(stats.circuit_state, CircuitState::Closed);
    assert!(!stats.using_fallback);
    assert_eq!(stats.consecutive_failures, 0);

    let json = serde_json::to_value(&stats).unwrap();
    assert!(json.get("usingFallback").is_some());
    assert!(json.get("circuitState").is_some());
}

#[tokio::test]
async fn build_requires_endpoints() {
    let transport = MockTransport::new(echo);
    let err = Huginn::builder()
        .service("orders")
        .shared_transport(transport)
        .build()
        .unwrap_err();
    assert!(matches!(err, HuginnError::Configuration(_)));
}

#[test]
fn build_requires_a_runtime() {
    let transport = MockTransport::new(echo);
    let err = builder(&transport).build().unwrap_err();
    assert!(matches!(err, HuginnError::Configuration(_)));
}

#[tokio::test]
async fn clients_can_share_a_cache() {
    let transport = MockTransport::new(echo);
    let reads = builder(&transport).build().unwrap();
    let writes = builder(&transport)
        .service("rpc-writes")
        .shared_cache(reads.cache().clone())
        .build()
        .unwrap();

    let call = CallDescriptor::new("0xabc", "balanceOf").arg("0x1");
    reads.execute(call.clone()).await.unwrap();
    writes.invalidate("0xabc:").unwrap();
    reads.execute(call).await.unwrap();
    assert_eq!(transport.call_count(), 2);
}
