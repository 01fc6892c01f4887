//! Records emitted to external collaborators.

use std::time::SystemTime;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::execution::Severity;

/// A call that failed permanently after exhausting its retries.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub operation: String,
    pub error_message: String,
    /// Captured only when backtraces are enabled (`RUST_BACKTRACE`).
    pub stack_trace: Option<String>,
    pub metadata: Map<String, Value>,
    pub severity: Severity,
    pub timestamp: SystemTime,
}

/// A structured event for an operator-facing notifier.
///
/// Formatting and delivery belong to the [`AlertSink`](crate::AlertSink).
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    /// Component that raised the alert, e.g. `"circuit-breaker:rpc-reads"`.
    pub source: String,
    pub metadata: Map<String, Value>,
}
