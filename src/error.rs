//! Huginn error types

use std::time::Duration;

/// Huginn error types.
///
/// Every variant carries owned strings rather than source errors so the
/// error is `Clone`: a coalesced cache fill hands the same failure to every
/// caller waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HuginnError {
    // Transport errors
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("request timeout: {operation} did not complete within {}ms", .after.as_millis())]
    Timeout { operation: String, after: Duration },

    #[error("rate limited (too many requests), retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Error object returned by a JSON-RPC node.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    // Caller errors
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Synthetic error raised when the circuit breaker short-circuits a call.
    #[error("circuit breaker open for {service}, retry after {}ms", .retry_after.as_millis())]
    CircuitOpen {
        service: String,
        retry_after: Duration,
    },

    // Resource errors
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Opaque failure surfaced by a wrapped SDK; only its message is known.
    #[error("{0}")]
    Remote(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(String),

    #[error("empty response from endpoint")]
    EmptyResponse,

    // Configuration / lifecycle errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("request queue closed before the call settled")]
    QueueClosed,
}

impl HuginnError {
    /// Provider-supplied wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether this is the breaker's own fast-fail rather than a downstream error.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Whether the call hit a hard deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the failure is transport-level and likely to clear on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Http(_) | Self::Timeout { .. } | Self::RateLimited { .. } => {
                true
            }
            Self::Api { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    /// Whether the failure was caused by the request itself rather than the
    /// health of the downstream. Caller errors never count against a circuit.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

impl From<serde_json::Error> for HuginnError {
    fn from(err: serde_json::Error) -> Self {
        HuginnError::Json(err.to_string())
    }
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;
