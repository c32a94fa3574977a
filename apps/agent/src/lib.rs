//! peerwatch - per-node peer monitoring agent
//!
//! Periodically selects a bounded set of peers, probes their reachability and
//! liveness, stores the samples and reports aggregated verdicts to a ledger
//! through a simulate-then-commit gateway.

pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod monitoring;
pub mod nodeset;
pub mod notifier;
pub mod orchestrator;
pub mod persist;
pub mod pool;
pub mod scheduler;
pub mod verdict;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use database::{LibsqlMetricsStore, MetricsStore};
pub use gateway::{ChainGateway, Ledger};
pub use orchestrator::Agent;

/// Unix timestamp in seconds, as reported by the ledger.
pub type Timestamp = i64;

/// Current wall-clock time as a unix timestamp.
pub fn now_timestamp() -> Timestamp {
    chrono::Utc::now().timestamp()
}

/// Human-readable UTC rendering of a ledger timestamp for logs.
pub fn display_timestamp(ts: Timestamp) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
