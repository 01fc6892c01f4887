//! Call descriptors and per-call options.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::execution::Severity;

/// Per-call overrides.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallOptions {
    /// Cache TTL for this call; `None` uses the cache default.
    pub cache_ttl: Option<Duration>,
    /// Bypass the result cache entirely (reads and writes).
    pub skip_cache: bool,
    /// Pin the first attempt to a fallback node chosen by stable hash.
    pub routing_key: Option<String>,
    /// Forbid retries regardless of the error (e.g. non-idempotent writes).
    pub no_retry: bool,
    /// Baseline severity for escalation after exhaustion.
    pub severity: Option<Severity>,
}

/// A remote operation to execute through the layer.
///
/// Identifies the logical target (contract address, API base, market
/// namespace), the operation name and its ordered arguments. The cache key is
/// derived from those three alone, so failing over to another endpoint never
/// changes which entry a call reads or fills.
///
/// ```rust
/// # use huginn::CallDescriptor;
/// # use std::time::Duration;
/// let call = CallDescriptor::new("0xPool", "eth_getBalance")
///     .arg("0xabc")
///     .arg("latest")
///     .priority(5)
///     .cache_ttl(Duration::from_secs(10));
/// assert_eq!(call.args.len(), 2);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct CallDescriptor {
    pub target: String,
    pub operation: String,
    pub args: Vec<Value>,
    /// Higher is served first. Default: 0.
    pub priority: i32,
    pub options: CallOptions,
}

impl CallDescriptor {
    /// Create a descriptor with no arguments and default options.
    pub fn new(target: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            operation: operation.into(),
            args: Vec::new(),
            priority: 0,
            options: CallOptions::default(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Append a large integer argument as its decimal string.
    ///
    /// Keeps 128-bit quantities (token amounts, wei) exact and makes them
    /// collide to the same cache key however the caller obtained them.
    pub fn big_arg(mut self, value: u128) -> Self {
        self.args.push(Value::String(value.to_string()));
        self
    }

    /// Replace the argument list.
    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Set the dispatch priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the cache TTL for this call.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.options.cache_ttl = Some(ttl);
        self
    }

    /// Bypass the result cache.
    pub fn skip_cache(mut self) -> Self {
        self.options.skip_cache = true;
        self
    }

    /// Pin the first attempt to a fallback node by routing key.
    pub fn routing_key(mut self, key: impl Into<String>) -> Self {
        self.options.routing_key = Some(key.into());
        self
    }

    /// Mark the call as non-retryable.
    pub fn no_retry(mut self) -> Self {
        self.options.no_retry = true;
        self
    }

    /// Set the baseline escalation severity.
    pub fn severity(mut self, severity: Severity) -> Self {
        self.options.severity = Some(severity);
        self
    }

    /// Whether this call may be served from or stored into the cache.
    pub fn is_cacheable(&self) -> bool {
        !self.options.skip_cache && self.options.cache_ttl != Some(Duration::ZERO)
    }

    /// Deterministic cache key for (target, operation, args).
    ///
    /// Arguments are rendered as canonical JSON: object keys sorted at every
    /// depth, numbers in plain decimal, no whitespace.
    pub fn cache_key(&self) -> String {
        let mut key = format!("{}:{}:", self.target, self.operation);
        write_canonical(&Value::Array(self.args.clone()), &mut key);
        key
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(k.as_str()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
