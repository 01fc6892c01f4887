//! Builder for configuring client instances

use std::sync::Arc;
use std::time::Duration;

use super::client::{ClientCore, ResilientClient};
use crate::cache::{CacheConfig, ResultCache};
use crate::config::Config;
use crate::execution::routing::DEFAULT_FAILURE_THRESHOLD;
use crate::execution::{
    CircuitBreaker, CircuitBreakerConfig, EndpointRouter, RateLimiter, RetryConfig, RetryExecutor,
};
use crate::sinks::TracingSink;
use crate::traits::{AlertSink, DeadLetterSink, RemoteCall};
use crate::types::ServiceEndpoints;
use crate::{HuginnError, Result};

/// Main entry point for creating client instances.
pub struct Huginn;

impl Huginn {
    /// Create a new builder for configuring a client.
    pub fn builder() -> HuginnBuilder {
        HuginnBuilder::new()
    }
}

/// Builder for configuring a [`ResilientClient`].
///
/// ```rust,no_run
/// use huginn::{CallDescriptor, Huginn, ServiceEndpoints};
///
/// #[tokio::main]
/// async fn main() -> huginn::Result<()> {
///     let client = Huginn::builder()
///         .service("rpc-reads")
///         .endpoints(ServiceEndpoints::new("https://rpc.primary").fallback("https://rpc.backup"))
///         .max_requests_per_second(20)
///         .build()?;
///
///     let block = client.execute(CallDescriptor::new("chain", "eth_blockNumber")).await?;
///     println!("{block}");
///     Ok(())
/// }
/// ```
pub struct HuginnBuilder {
    service: String,
    endpoints: Option<ServiceEndpoints>,
    transport: Option<Arc<dyn RemoteCall>>,
    max_requests_per_second: u32,
    request_timeout: Duration,
    cache_config: CacheConfig,
    shared_cache: Option<ResultCache>,
    breaker_config: CircuitBreakerConfig,
    retry_config: RetryConfig,
    router: Option<Arc<EndpointRouter>>,
    failover_threshold: u32,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    alerts: Option<Arc<dyn AlertSink>>,
}

impl HuginnBuilder {
    pub fn new() -> Self {
        Self {
            service: "default".to_string(),
            endpoints: None,
            transport: None,
            max_requests_per_second: 10,
            request_timeout: Duration::from_secs(10),
            cache_config: CacheConfig::default(),
            shared_cache: None,
            breaker_config: CircuitBreakerConfig::default(),
            retry_config: RetryConfig::default(),
            router: None,
            failover_threshold: DEFAULT_FAILURE_THRESHOLD,
            dead_letters: None,
            alerts: None,
        }
    }

    /// Start from a loaded [`Config`].
    ///
    /// Errors when the config has no primary endpoint.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new()
            .service(config.service.clone())
            .endpoints(config.service_endpoints()?)
            .max_requests_per_second(config.rate_limit.max_requests_per_second)
            .request_timeout(config.request_timeout())
            .cache(config.cache_config())
            .circuit_breaker(config.circuit_breaker_config())
            .retry(config.retry_config())
            .failover_threshold(config.failover.failure_threshold))
    }

    /// Name the protected service class (default: "default").
    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.service = name.into();
        self
    }

    /// Primary and fallback endpoints for this service class.
    pub fn endpoints(mut self, endpoints: ServiceEndpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Set the downstream transport.
    ///
    /// With the `json-rpc` feature the default is
    /// [`JsonRpcTransport`](crate::transport::JsonRpcTransport).
    pub fn transport(mut self, transport: impl RemoteCall + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Set a transport shared with other clients.
    pub fn shared_transport(mut self, transport: Arc<dyn RemoteCall>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sustained request rate and burst size (default: 10).
    pub fn max_requests_per_second(mut self, rps: u32) -> Self {
        self.max_requests_per_second = rps;
        self
    }

    /// Deadline for each attempt (default: 10s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Configure the client's own result cache.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Use a cache shared with other clients instead of creating one.
    ///
    /// The owner of the cache is responsible for sweeping it.
    pub fn shared_cache(mut self, cache: ResultCache) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    /// Circuit breaker thresholds and timers.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Retry policy.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Use a router shared with other service classes.
    ///
    /// Endpoints set with [`endpoints`](Self::endpoints) are registered on
    /// it; otherwise the service must already be registered.
    pub fn router(mut self, router: Arc<EndpointRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Consecutive unreachable failures before failing over (default: 3).
    ///
    /// Ignored when a shared router is supplied.
    pub fn failover_threshold(mut self, n: u32) -> Self {
        self.failover_threshold = n;
        self
    }

    /// Where exhausted calls are recorded (default: [`TracingSink`]).
    pub fn dead_letter_sink(mut self, sink: impl DeadLetterSink + 'static) -> Self {
        self.dead_letters = Some(Arc::new(sink));
        self
    }

    /// Where operator alerts go (default: [`TracingSink`]).
    pub fn alert_sink(mut self, sink: impl AlertSink + 'static) -> Self {
        self.alerts = Some(Arc::new(sink));
        self
    }

    /// Build the client.
    ///
    /// Must be called within a tokio runtime: the client spawns its sweep
    /// and alert-forwarding tasks here.
    pub fn build(self) -> Result<ResilientClient> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(HuginnError::Configuration(
                "ResilientClient must be built within a tokio runtime".to_string(),
            ));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };

        let router = self
            .router
            .unwrap_or_else(|| Arc::new(EndpointRouter::new(self.failover_threshold)));
        match self.endpoints {
            Some(endpoints) => router.register(self.service.clone(), endpoints),
            None if router.health(&self.service).is_none() => {
                return Err(HuginnError::Configuration(format!(
                    "no endpoints configured for service '{}'",
                    self.service
                )));
            }
            None => {}
        }

        let (cache, sweeper) = match self.shared_cache {
            Some(cache) => (cache, None),
            None => {
                let cache = ResultCache::new(&self.cache_config);
                let sweeper = (!self.cache_config.sweep_interval.is_zero())
                    .then(|| cache.spawn_sweeper(self.cache_config.sweep_interval));
                (cache, sweeper)
            }
        };

        let sink = Arc::new(TracingSink);
        let dead_letters: Arc<dyn DeadLetterSink> = match self.dead_letters {
            Some(custom) => custom,
            None => sink.clone(),
        };
        let alerts: Arc<dyn AlertSink> = match self.alerts {
            Some(custom) => custom,
            None => sink,
        };

        let core = ClientCore {
            transport,
            breaker: Arc::new(CircuitBreaker::new(self.service.clone(), self.breaker_config)),
            router,
            retry: RetryExecutor::new(
                self.retry_config,
                self.service.clone(),
                dead_letters,
                Arc::clone(&alerts),
            ),
            request_timeout: self.request_timeout,
            service: self.service,
        };
        let limiter = Arc::new(RateLimiter::new(self.max_requests_per_second));

        Ok(ResilientClient::new(core, limiter, cache, sweeper, alerts))
    }
}

impl Default for HuginnBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "json-rpc")]
fn default_transport() -> Result<Arc<dyn RemoteCall>> {
    Ok(Arc::new(crate::transport::JsonRpcTransport::new()))
}

#[cfg(not(feature = "json-rpc"))]
fn default_transport() -> Result<Arc<dyn RemoteCall>> {
    Err(HuginnError::Configuration(
        "no transport configured (enable the `json-rpc` feature or call .transport())".to_string(),
    ))
}
