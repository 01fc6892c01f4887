//! Seams between the execution layer and the outside world.
//!
//! - [`RemoteCall`]: the raw downstream call (an RPC node, an exchange API,
//!   a wrapped SDK). The layer treats its payloads as opaque JSON.
//! - [`DeadLetterSink`]: receives calls that exhausted their retries.
//! - [`AlertSink`]: receives operator-facing events.
//!
//! Sink failures are logged by the caller and never reach the code that
//! issued the original call.

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;
use crate::types::{Alert, CallDescriptor, DeadLetter, Endpoint};

/// A single raw attempt against a resolved endpoint.
///
/// Implementations should not retry, cache or rate-limit on their own; the
/// layer does all of that around them. Returning quickly matters less than
/// returning an accurate error: the classifier decides retry and failover
/// from it.
#[async_trait]
pub trait RemoteCall: Send + Sync {
    /// Transport name for logging/debugging.
    fn name(&self) -> &str;

    /// Perform one attempt of `call` against `endpoint`.
    async fn call(&self, endpoint: &Endpoint, call: &CallDescriptor) -> Result<Value>;
}

/// Audit/replay store for permanently failed calls.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, letter: DeadLetter) -> Result<()>;
}

/// Operator notification channel.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, alert: Alert) -> Result<()>;
}
