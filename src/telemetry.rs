//! Telemetry metric name constants.
//!
//! Centralised metric names for huginn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `service`: protected service class (e.g. "rpc-reads", "orders")
//! - `operation`: remote operation name (e.g. "eth_call", "getMarket")
//! - `status`: outcome: "ok" or "error"
//! - `to`: circuit state entered by a transition
//! - `endpoint`: route an attempt took: "primary" or "fallback"

/// Total attempts that reached the downstream (cache hits excluded).
///
/// Labels: `service`, `operation`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "huginn_requests_total";

/// Duration of a single downstream attempt in seconds.
///
/// Labels: `service`, `operation`, `endpoint` ("primary" | "fallback").
pub const REQUEST_DURATION_SECONDS: &str = "huginn_request_duration_seconds";

/// Total retry attempts (not counting the initial attempt).
///
/// Labels: `service`, `operation`.
pub const RETRIES_TOTAL: &str = "huginn_retries_total";

/// Total result cache hits.
///
/// Labels: `service`, `operation`.
pub const CACHE_HITS_TOTAL: &str = "huginn_cache_hits_total";

/// Total result cache misses.
///
/// Labels: `service`, `operation`.
pub const CACHE_MISSES_TOTAL: &str = "huginn_cache_misses_total";

/// Total circuit breaker state transitions.
///
/// Labels: `service`, `to` ("closed" | "open" | "half_open").
pub const CIRCUIT_TRANSITIONS_TOTAL: &str = "huginn_circuit_transitions_total";

/// Total switches from a primary endpoint to its fallback.
///
/// Labels: `service`.
pub const FAILOVERS_TOTAL: &str = "huginn_failovers_total";

/// Total dead-letter records emitted after retry exhaustion.
///
/// Labels: `service`, `severity`.
pub const DEAD_LETTERS_TOTAL: &str = "huginn_dead_letters_total";
