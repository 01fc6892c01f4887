//! Circuit breaker state machine tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use huginn::{CircuitBreaker, CircuitBreakerConfig, CircuitState, HuginnError, Result};

fn breaker() -> CircuitBreaker {
    CircuitBreaker::new(
        "rpc-reads",
        CircuitBreakerConfig::new()
            .failure_threshold(3)
            .success_threshold(2)
            .timeout(Duration::from_secs(1))
            .reset_timeout(Duration::from_secs(10)),
    )
}

/// A downstream stand-in that counts how often it is actually invoked.
#[derive(Clone, Default)]
struct Downstream {
    calls: Arc<AtomicU32>,
}

impl Downstream {
    async fn fail(&self) -> Result<u32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HuginnError::Network("connection refused".into()))
    }

    async fn slow_fail(&self) -> Result<u32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err(HuginnError::Network("connection refused".into()))
    }

    async fn slow_succeed(&self) -> Result<u32> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(n)
    }

    async fn succeed(&self) -> Result<u32> {
        Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn call<T>(breaker: &CircuitBreaker, fut: impl Future<Output = Result<T>>) -> Result<T> {
    breaker.execute("eth_call", fut).await
}

async fn trip(breaker: &CircuitBreaker, downstream: &Downstream) {
    for _ in 0..3 {
        let _ = call(breaker, downstream.fail()).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn opens_after_consecutive_failures() {
    let breaker = breaker();
    let downstream = Downstream::default();

    let _ = call(&breaker, downstream.fail()).await;
    let _ = call(&breaker, downstream.fail()).await;
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 2);

    let _ = call(&breaker, downstream.fail()).await;
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn success_resets_the_failure_count() {
    let breaker = breaker();
    let downstream = Downstream::default();

    let _ = call(&breaker, downstream.fail()).await;
    let _ = call(&breaker, downstream.fail()).await;
    call(&breaker, downstream.succeed()).await.unwrap();
    let _ = call(&breaker, downstream.fail()).await;

    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_never_reaches_downstream() {
    let breaker = breaker();
    let downstream = Downstream::default();
    trip(&breaker, &downstream).await;
    let before = downstream.calls();

    for _ in 0..5 {
        let err = call(&breaker, downstream.succeed()).await.unwrap_err();
        match err {
            HuginnError::CircuitOpen {
                service,
                retry_after,
            } => {
                assert_eq!(service, "rpc-reads");
                assert!(retry_after <= Duration::from_secs(10));
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }
    assert_eq!(downstream.calls(), before);
}

#[tokio::test(start_paused = true)]
async fn half_open_closes_after_enough_successes() {
    let breaker = breaker();
    let downstream = Downstream::default();
    trip(&breaker, &downstream).await;

    tokio::time::advance(Duration::from_secs(10)).await;

    call(&breaker, downstream.succeed()).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    call(&breaker, downstream.succeed()).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn half_open_failure_reopens() {
    let breaker = breaker();
    let downstream = Downstream::default();
    trip(&breaker, &downstream).await;

    tokio::time::advance(Duration::from_secs(10)).await;
    let _ = call(&breaker, downstream.fail()).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    // The reset timer restarted on reopening.
    tokio::time::advance(Duration::from_secs(5)).await;
    let err = call(&breaker, downstream.succeed()).await.unwrap_err();
    assert!(err.is_circuit_open());
}

#[tokio::test(start_paused = true)]
async fn half_open_admits_a_bounded_number_of_probes() {
    let breaker = breaker();
    let downstream = Downstream::default();
    trip(&breaker, &downstream).await;
    let before = downstream.calls();

    tokio::time::advance(Duration::from_secs(10)).await;
    let probes = (0..10).map(|_| call(&breaker, downstream.slow_fail()));
    let results = join_all(probes).await;

    // The probe limit defaults to the success threshold.
    assert_eq!(downstream.calls() - before, 2);
    let rejected = results
        .iter()
        .filter(|r| r.as_ref().is_err_and(HuginnError::is_circuit_open))
        .count();
    assert_eq!(rejected, 8);
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn finished_probes_free_their_slot() {
    let breaker = CircuitBreaker::new(
        "rpc-reads",
        CircuitBreakerConfig::new()
            .failure_threshold(1)
            .success_threshold(3)
            .half_open_max_calls(1)
            .reset_timeout(Duration::from_secs(10)),
    );
    let downstream = Downstream::default();
    let _ = call(&breaker, downstream.fail()).await;
    tokio::time::advance(Duration::from_secs(10)).await;

    let (first, second) = tokio::join!(
        call(&breaker, downstream.slow_succeed()),
        call(&breaker, downstream.slow_succeed()),
    );
    assert!(first.is_ok());
    assert!(second.unwrap_err().is_circuit_open());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    call(&breaker, downstream.succeed()).await.unwrap();
    call(&breaker, downstream.succeed()).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn still_open_before_reset_timeout() {
    let breaker = breaker();
    let downstream = Downstream::default();
    trip(&breaker, &downstream).await;

    tokio::time::advance(Duration::from_millis(9_999)).await;
    assert!(breaker.try_acquire().is_err());
    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(breaker.try_acquire().is_ok());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn slow_calls_time_out_and_count_as_failures() {
    let breaker = breaker();
    let err = breaker
        .execute("eth_getLogs", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("eth_getLogs"));
    assert_eq!(breaker.failure_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn caller_errors_do_not_count() {
    let breaker = breaker();
    for _ in 0..10 {
        let _ = breaker
            .execute("eth_call", async {
                Err::<(), _>(HuginnError::InvalidInput("bad address".into()))
            })
            .await;
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn transitions_are_broadcast() {
    let breaker = breaker();
    let downstream = Downstream::default();
    let mut events = breaker.subscribe();

    trip(&breaker, &downstream).await;
    let change = events.recv().await.unwrap();
    assert_eq!(change.from, CircuitState::Closed);
    assert_eq!(change.to, CircuitState::Open);
    assert_eq!(change.failures, 3);

    tokio::time::advance(Duration::from_secs(10)).await;
    call(&breaker, downstream.succeed()).await.unwrap();
    call(&breaker, downstream.succeed()).await.unwrap();
    assert_eq!(events.recv().await.unwrap().to, CircuitState::HalfOpen);
    assert_eq!(events.recv().await.unwrap().to, CircuitState::Closed);
}
