//! Health-check snapshot.

use serde::Serialize;

use crate::execution::CircuitState;

/// Point-in-time view of a client, for health-check endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStats {
    pub service: String,
    pub cache_size: u64,
    pub queue_length: usize,
    pub available_tokens: f64,
    pub circuit_state: CircuitState,
    pub using_fallback: bool,
    pub consecutive_failures: u32,
}
