//! In-memory sink.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::Result;
use crate::traits::{AlertSink, DeadLetterSink};
use crate::types::{Alert, DeadLetter};

/// Collects dead letters and alerts in memory.
///
/// Cloning yields another handle to the same records, so one clone can be
/// handed to the client while another is inspected.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded dead letters, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().clone()
    }

    /// Snapshot of recorded alerts, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    /// Drop all records.
    pub fn clear(&self) {
        self.dead_letters.lock().clear();
        self.alerts.lock().clear();
    }
}

#[async_trait]
impl DeadLetterSink for MemorySink {
    async fn record(&self, letter: DeadLetter) -> Result<()> {
        self.dead_letters.lock().push(letter);
        Ok(())
    }
}

#[async_trait]
impl AlertSink for MemorySink {
    async fn notify(&self, alert: Alert) -> Result<()> {
        self.alerts.lock().push(alert);
        Ok(())
    }
}
