//! Configuration loading.
//!
//! Configuration is loaded from TOML with the following resolution order:
//! 1. explicit path (e.g. `--config <path>`)
//! 2. `~/.huginn/config.toml` (user)
//! 3. `/etc/huginn/config.toml` (system)
//!
//! When no file exists the defaults apply. `HUGINN_*` environment variables
//! are applied on top of whichever source won:
//!
//! | variable | option |
//! |---|---|
//! | `HUGINN_SERVICE` | `service` |
//! | `HUGINN_PRIMARY_URL` | `endpoints.primary` |
//! | `HUGINN_FALLBACK_URLS` | `endpoints.fallbacks` (comma-separated) |
//! | `HUGINN_MAX_REQUESTS_PER_SECOND` | `rate_limit.max_requests_per_second` |
//! | `HUGINN_REQUEST_TIMEOUT_MS` | `request_timeout_ms` |
//! | `HUGINN_CACHE_DEFAULT_TTL_MS` | `cache.default_ttl_ms` |
//! | `HUGINN_CACHE_MAX_ENTRIES` | `cache.max_entries` |
//! | `HUGINN_CB_FAILURE_THRESHOLD` | `circuit_breaker.failure_threshold` |
//! | `HUGINN_CB_SUCCESS_THRESHOLD` | `circuit_breaker.success_threshold` |
//! | `HUGINN_CB_HALF_OPEN_MAX_CALLS` | `circuit_breaker.half_open_max_calls` |
//! | `HUGINN_CB_TIMEOUT_MS` | `circuit_breaker.timeout_ms` |
//! | `HUGINN_CB_RESET_TIMEOUT_MS` | `circuit_breaker.reset_timeout_ms` |
//! | `HUGINN_RETRY_MAX_ATTEMPTS` | `retry.max_attempts` |
//! | `HUGINN_RETRY_INITIAL_DELAY_MS` | `retry.initial_delay_ms` |
//! | `HUGINN_RETRY_MAX_DELAY_MS` | `retry.max_delay_ms` |
//! | `HUGINN_RETRY_BACKOFF_MULTIPLIER` | `retry.backoff_multiplier` |
//! | `HUGINN_RETRY_JITTER_FACTOR` | `retry.jitter_factor` |
//! | `HUGINN_FAILOVER_THRESHOLD` | `failover.failure_threshold` |

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::CacheConfig;
use crate::execution::{CircuitBreakerConfig, RetryConfig};
use crate::types::ServiceEndpoints;
use crate::{HuginnError, Result};

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Service class name used in logs, metrics and routing (default: "default").
    #[serde(default = "default_service")]
    pub service: String,
    /// Per-attempt deadline in milliseconds (default: 10000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub failover: FailoverSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: default_service(),
            request_timeout_ms: default_request_timeout_ms(),
            endpoints: EndpointsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheSection::default(),
            circuit_breaker: CircuitBreakerSection::default(),
            retry: RetrySection::default(),
            failover: FailoverSection::default(),
        }
    }
}

fn default_service() -> String {
    "default".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

/// Endpoint URLs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EndpointsConfig {
    #[serde(default)]
    pub primary: Option<String>,
    /// The first entry is the designated failover target.
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

/// Token-bucket settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Sustained rate and burst size (default: 10).
    #[serde(default = "default_rps")]
    pub max_requests_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: default_rps(),
        }
    }
}

fn default_rps() -> u32 {
    10
}

/// Result cache settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSection {
    pub default_ttl_ms: u64,
    pub max_entries: u64,
    pub sweep_interval_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            default_ttl_ms: defaults.default_ttl.as_millis() as u64,
            max_entries: defaults.max_entries,
            sweep_interval_ms: defaults.sweep_interval.as_millis() as u64,
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Concurrent half-open probes; unset means `success_threshold`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub half_open_max_calls: Option<u32>,
    /// Per-attempt hard timeout.
    pub timeout_ms: u64,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            success_threshold: defaults.success_threshold,
            half_open_max_calls: defaults.half_open_max_calls,
            timeout_ms: defaults.timeout.as_millis() as u64,
            reset_timeout_ms: defaults.reset_timeout.as_millis() as u64,
        }
    }
}

/// Retry settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            backoff_multiplier: defaults.backoff_multiplier,
            jitter_factor: defaults.jitter_factor,
        }
    }
}

/// Endpoint failover settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FailoverSection {
    /// Consecutive unreachable failures before switching to the fallback.
    pub failure_threshold: u32,
}

impl Default for FailoverSection {
    fn default() -> Self {
        Self {
            failure_threshold: crate::execution::routing::DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl Config {
    /// Load configuration from the standard locations, then apply
    /// `HUGINN_*` environment overrides.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::from_file(&path)?,
            None => {
                debug!("no config file found, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Parse a single TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HuginnError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path. `None` when no file exists.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(HuginnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".huginn").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/huginn/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// [`load`](Self::load)).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(service) = lookup("HUGINN_SERVICE") {
            self.service = service;
        }
        if let Some(url) = lookup("HUGINN_PRIMARY_URL") {
            self.endpoints.primary = Some(url);
        }
        if let Some(urls) = lookup("HUGINN_FALLBACK_URLS") {
            self.endpoints.fallbacks = urls
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        let rps = &mut self.rate_limit.max_requests_per_second;
        override_parsed(&lookup, "HUGINN_MAX_REQUESTS_PER_SECOND", rps)?;
        override_parsed(
            &lookup,
            "HUGINN_REQUEST_TIMEOUT_MS",
            &mut self.request_timeout_ms,
        )?;

        let cache = &mut self.cache;
        override_parsed(
            &lookup,
            "HUGINN_CACHE_DEFAULT_TTL_MS",
            &mut cache.default_ttl_ms,
        )?;
        override_parsed(&lookup, "HUGINN_CACHE_MAX_ENTRIES", &mut cache.max_entries)?;

        let cb = &mut self.circuit_breaker;
        override_parsed(
            &lookup,
            "HUGINN_CB_FAILURE_THRESHOLD",
            &mut cb.failure_threshold,
        )?;
        override_parsed(
            &lookup,
            "HUGINN_CB_SUCCESS_THRESHOLD",
            &mut cb.success_threshold,
        )?;
        if let Some(raw) = lookup("HUGINN_CB_HALF_OPEN_MAX_CALLS") {
            cb.half_open_max_calls = Some(parse_var("HUGINN_CB_HALF_OPEN_MAX_CALLS", &raw)?);
        }
        override_parsed(&lookup, "HUGINN_CB_TIMEOUT_MS", &mut cb.timeout_ms)?;
        override_parsed(
            &lookup,
            "HUGINN_CB_RESET_TIMEOUT_MS",
            &mut cb.reset_timeout_ms,
        )?;

        let retry = &mut self.retry;
        override_parsed(
            &lookup,
            "HUGINN_RETRY_MAX_ATTEMPTS",
            &mut retry.max_attempts,
        )?;
        override_parsed(
            &lookup,
            "HUGINN_RETRY_INITIAL_DELAY_MS",
            &mut retry.initial_delay_ms,
        )?;
        override_parsed(
            &lookup,
            "HUGINN_RETRY_MAX_DELAY_MS",
            &mut retry.max_delay_ms,
        )?;
        override_parsed(
            &lookup,
            "HUGINN_RETRY_BACKOFF_MULTIPLIER",
            &mut retry.backoff_multiplier,
        )?;
        override_parsed(
            &lookup,
            "HUGINN_RETRY_JITTER_FACTOR",
            &mut retry.jitter_factor,
        )?;

        let failover = &mut self.failover;
        override_parsed(
            &lookup,
            "HUGINN_FAILOVER_THRESHOLD",
            &mut failover.failure_threshold,
        )?;
        Ok(())
    }

    /// Endpoints for the router. Errors when no primary is configured.
    pub fn service_endpoints(&self) -> Result<ServiceEndpoints> {
        let primary = self.endpoints.primary.clone().ok_or_else(|| {
            HuginnError::Configuration(
                "endpoints.primary is not set (config file or HUGINN_PRIMARY_URL)".to_string(),
            )
        })?;
        Ok(self
            .endpoints
            .fallbacks
            .iter()
            .fold(ServiceEndpoints::new(primary), |e, url| e.fallback(url.clone())))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .default_ttl(Duration::from_millis(self.cache.default_ttl_ms))
            .max_entries(self.cache.max_entries)
            .sweep_interval(Duration::from_millis(self.cache.sweep_interval_ms))
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        let section = &self.circuit_breaker;
        let config = CircuitBreakerConfig::new()
            .failure_threshold(section.failure_threshold)
            .success_threshold(section.success_threshold)
            .timeout(Duration::from_millis(section.timeout_ms))
            .reset_timeout(Duration::from_millis(section.reset_timeout_ms));
        match section.half_open_max_calls {
            Some(n) => config.half_open_max_calls(n),
            None => config,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        let section = &self.retry;
        RetryConfig::new()
            .max_attempts(section.max_attempts)
            .initial_delay(Duration::from_millis(section.initial_delay_ms))
            .max_delay(Duration::from_millis(section.max_delay_ms))
            .backoff_multiplier(section.backoff_multiplier)
            .jitter_factor(section.jitter_factor)
    }
}

fn override_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_var(name, &raw)?;
    }
    Ok(())
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| HuginnError::Configuration(format!("Invalid {name}={raw:?}: {e}")))
}
