use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// Downtime and latency of one peer over a window; derived, never stored
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedMetric {
    pub downtime_count: u64,
    pub mean_latency: f64,
}

/// One verdict as it landed on the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEvent {
    pub tx_hash: Option<String>,
    pub owner_id: u64,
    pub peer_id: u64,
    pub downtime_count: u64,
    pub mean_latency: f64,
    pub reported_at: Timestamp,
}
