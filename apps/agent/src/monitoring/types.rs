use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// Latency recorded when a peer did not answer at all
pub const NO_RESPONSE_LATENCY: i64 = -1;

/// Result of a reachability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reachability {
    pub offline: bool,
    pub latency_ms: i64,
}

impl Reachability {
    pub fn unreachable() -> Self {
        Self { offline: true, latency_ms: NO_RESPONSE_LATENCY }
    }

    pub fn reachable(latency_ms: i64) -> Self {
        Self { offline: false, latency_ms: latency_ms.max(0) }
    }
}

/// One probe of one peer by this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub owner_id: u64,
    pub peer_id: u64,
    pub offline: bool,
    pub latency_ms: i64,
    pub timestamp: Timestamp,
}

impl MetricSample {
    /// Build a sample. A negative latency always means no response, so it is
    /// stored as `-1` with the offline flag set.
    pub fn new(owner_id: u64, peer_id: u64, offline: bool, latency_ms: i64, timestamp: Timestamp) -> Self {
        let (offline, latency_ms) =
            if latency_ms < 0 { (true, NO_RESPONSE_LATENCY) } else { (offline, latency_ms) };

        Self { owner_id, peer_id, offline, latency_ms, timestamp }
    }
}
