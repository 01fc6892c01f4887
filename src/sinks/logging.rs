//! Sinks that write to `tracing`.

use async_trait::async_trait;
use tracing::{error, warn};

use crate::Result;
use crate::execution::Severity;
use crate::traits::{AlertSink, DeadLetterSink};
use crate::types::{Alert, DeadLetter};

/// Logs dead letters and alerts as structured events.
///
/// Critical records are logged at `error`, everything else at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl DeadLetterSink for TracingSink {
    async fn record(&self, letter: DeadLetter) -> Result<()> {
        let metadata = serde_json::Value::Object(letter.metadata);
        if letter.severity == Severity::Critical {
            error!(
                operation = %letter.operation,
                severity = %letter.severity,
                error = %letter.error_message,
                %metadata,
                "dead letter"
            );
        } else {
            warn!(
                operation = %letter.operation,
                severity = %letter.severity,
                error = %letter.error_message,
                %metadata,
                "dead letter"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl AlertSink for TracingSink {
    async fn notify(&self, alert: Alert) -> Result<()> {
        let metadata = serde_json::Value::Object(alert.metadata);
        if alert.severity == Severity::Critical {
            error!(
                title = %alert.title,
                source = %alert.source,
                %metadata,
                "{}", alert.message
            );
        } else {
            warn!(
                title = %alert.title,
                source = %alert.source,
                %metadata,
                "{}", alert.message
            );
        }
        Ok(())
    }
}
