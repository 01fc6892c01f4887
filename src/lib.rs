//! Huginn - resilient remote-call execution layer
//!
//! Wraps every call to an unreliable or rate-limited downstream (blockchain
//! RPC nodes, exchange APIs, wrapped SDKs) in one composed pipeline:
//!
//! - read-through TTL cache with coalesced misses
//! - priority queue gated by a token-bucket rate limiter
//! - circuit breaker per service class
//! - classified retry with exponential backoff and jitter
//! - primary/fallback endpoint failover
//! - dead-letter and alert side channels on permanent failure
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use huginn::{CallDescriptor, Huginn, ServiceEndpoints};
//!
//! #[tokio::main]
//! async fn main() -> huginn::Result<()> {
//!     let client = Huginn::builder()
//!         .service("rpc-reads")
//!         .endpoints(ServiceEndpoints::new("https://rpc.primary").fallback("https://rpc.backup"))
//!         .max_requests_per_second(10)
//!         .build()?;
//!
//!     let balance = client
//!         .execute(
//!             CallDescriptor::new("0xabc", "eth_getBalance")
//!                 .arg("0xabc")
//!                 .arg("latest")
//!                 .cache_ttl(Duration::from_secs(5)),
//!         )
//!         .await?;
//!
//!     println!("{balance}");
//!     println!("{:?}", client.stats().await);
//!     Ok(())
//! }
//! ```
//!
//! # Custom transports
//!
//! Anything implementing [`RemoteCall`] can sit behind the layer; the
//! bundled [`transport::JsonRpcTransport`] (feature `json-rpc`, on by
//! default) speaks JSON-RPC 2.0 over HTTP.

pub mod cache;
pub mod config;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod sinks;
pub mod telemetry;
pub mod traits;
pub mod transport;
pub mod types;
mod version;

// Re-export main types at crate root
pub use cache::{CacheConfig, ResultCache};
pub use config::Config;
pub use error::{HuginnError, Result};
pub use execution::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, EndpointRouter, ErrorClassifier,
    ErrorContext, RateLimiter, RequestQueue, RetryConfig, RetryExecutor, Severity,
};
pub use gateway::{Huginn, HuginnBuilder, ResilientClient};
pub use sinks::{MemorySink, TracingSink};
pub use traits::{AlertSink, DeadLetterSink, RemoteCall};
pub use version::{PKG_VERSION, version_string};

// Re-export all types
pub use types::{
    Alert, CallDescriptor, CallOptions, ClientStats, DeadLetter, Endpoint, ServiceEndpoints,
};
