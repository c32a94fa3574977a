//! Verdict construction and per-epoch deduplication.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::database::MetricsStore;
use crate::error::PersistError;
use crate::persist::{read_json, write_json};
use crate::{Timestamp, display_timestamp};

/// Aggregated judgement on one peer, as submitted to the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(rename = "peerId")]
    pub peer_id: u64,
    #[serde(rename = "downtime")]
    pub downtime_count: u64,
    #[serde(rename = "latency")]
    pub mean_latency: f64,
}

impl Verdict {
    fn entry(&self) -> SentEntry {
        SentEntry(self.peer_id, self.downtime_count, self.mean_latency)
    }
}

/// A peer whose report date has passed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuePeer {
    pub peer_id: u64,
    pub report_date: Timestamp,
}

impl DuePeer {
    /// A report is due once the ledger clock is strictly past the report date.
    pub fn is_due(report_date: Timestamp, ledger_time: Timestamp) -> bool {
        report_date < ledger_time
    }
}

/// `[peerId, downtime, latency]` as stored in the sent-verdict log
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentEntry(pub u64, pub u64, pub f64);

/// Verdicts already committed for one epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentVerdictLog {
    pub epoch_key: i64,
    pub verdicts: Vec<SentEntry>,
}

impl SentVerdictLog {
    pub fn contains(&self, epoch_key: i64, verdict: &Verdict) -> bool {
        self.epoch_key == epoch_key && self.verdicts.contains(&verdict.entry())
    }

    /// Drop the verdicts already sent under `epoch_key`. Entries logged under
    /// any other key do not count.
    pub fn unsent(&self, epoch_key: i64, verdicts: Vec<Verdict>) -> Vec<Verdict> {
        verdicts.into_iter().filter(|v| !self.contains(epoch_key, v)).collect()
    }
}

/// File-backed sent-verdict log
pub struct SentVerdictStore {
    path: PathBuf,
}

impl SentVerdictStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<SentVerdictLog, PersistError> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    pub fn filter_unsent(
        &self,
        epoch_key: i64,
        verdicts: Vec<Verdict>,
    ) -> Result<Vec<Verdict>, PersistError> {
        let log = self.load()?;
        let before = verdicts.len();
        let unsent = log.unsent(epoch_key, verdicts);
        if unsent.len() < before {
            info!(epoch = epoch_key, skipped = before - unsent.len(), "dropping verdicts already sent this epoch");
        }
        Ok(unsent)
    }

    /// Replace the log with the verdicts of a verified successful commit.
    pub fn record_sent(&self, epoch_key: i64, verdicts: &[Verdict]) -> Result<(), PersistError> {
        let log = SentVerdictLog { epoch_key, verdicts: verdicts.iter().map(Verdict::entry).collect() };
        write_json(&self.path, &log)
    }
}

/// Turns stored samples into verdicts for the peers that are due
pub struct VerdictBuilder {
    store: Arc<dyn MetricsStore>,
}

impl VerdictBuilder {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    /// Aggregate `[report_date - reward_period, report_date)` for each due
    /// peer. A peer whose aggregation fails is left out of the batch.
    pub async fn build(&self, owner_id: u64, due: &[DuePeer], reward_period: i64) -> Vec<Verdict> {
        let mut verdicts = Vec::with_capacity(due.len());

        for peer in due {
            let start = peer.report_date - reward_period;
            debug!(
                peer_id = peer.peer_id,
                start = %display_timestamp(start),
                end = %display_timestamp(peer.report_date),
                "aggregating samples"
            );

            match self.store.aggregate(owner_id, peer.peer_id, start, peer.report_date).await {
                Ok(metric) => {
                    info!(
                        peer_id = peer.peer_id,
                        downtime = metric.downtime_count,
                        latency = metric.mean_latency,
                        "epoch metrics"
                    );
                    verdicts.push(Verdict {
                        peer_id: peer.peer_id,
                        downtime_count: metric.downtime_count,
                        mean_latency: metric.mean_latency,
                    });
                }
                Err(e) => {
                    warn!(peer_id = peer.peer_id, error = %e, "cannot aggregate metrics, peer left out of report");
                }
            }
        }

        verdicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::MetricSample;
    use crate::testing::temp_store;
    use tempfile::tempdir;

    fn batch() -> Vec<Verdict> {
        vec![
            Verdict { peer_id: 2, downtime_count: 3, mean_latency: 25.0 },
            Verdict { peer_id: 8, downtime_count: 0, mean_latency: 12.0 },
        ]
    }

    #[test]
    fn test_due_is_strict() {
        assert!(DuePeer::is_due(99, 100));
        assert!(!DuePeer::is_due(100, 100));
        assert!(!DuePeer::is_due(101, 100));
    }

    #[test]
    fn test_same_batch_twice_in_one_epoch() {
        let dir = tempdir().unwrap();
        let store = SentVerdictStore::new(dir.path().join("sent.json"));

        let first = store.filter_unsent(500, batch()).unwrap();
        assert_eq!(first, batch());
        store.record_sent(500, &first).unwrap();

        let second = store.filter_unsent(500, batch()).unwrap();
        assert!(second.is_empty());

        let log = store.load().unwrap();
        assert_eq!(log.epoch_key, 500);
        assert_eq!(log.verdicts, vec![SentEntry(2, 3, 25.0), SentEntry(8, 0, 12.0)]);
    }

    #[test]
    fn test_other_epoch_entries_are_ignored() {
        let dir = tempdir().unwrap();
        let store = SentVerdictStore::new(dir.path().join("sent.json"));
        store.record_sent(500, &batch()).unwrap();

        assert_eq!(store.filter_unsent(600, batch()).unwrap(), batch());
    }

    #[test]
    fn test_changed_values_are_resent() {
        let log = SentVerdictLog { epoch_key: 1, verdicts: vec![SentEntry(2, 3, 25.0)] };
        let changed = vec![Verdict { peer_id: 2, downtime_count: 4, mean_latency: 25.0 }];
        assert_eq!(log.unsent(1, changed.clone()), changed);
    }

    #[test]
    fn test_record_replaces_previous_log() {
        let dir = tempdir().unwrap();
        let store = SentVerdictStore::new(dir.path().join("sent.json"));
        store.record_sent(500, &batch()).unwrap();
        store.record_sent(600, &batch()[..1]).unwrap();

        let log = store.load().unwrap();
        assert_eq!(log, SentVerdictLog { epoch_key: 600, verdicts: vec![SentEntry(2, 3, 25.0)] });
    }

    #[test]
    fn test_log_file_layout() {
        let log = SentVerdictLog { epoch_key: 42, verdicts: vec![SentEntry(2, 3, 25.5)] };
        assert_eq!(serde_json::to_string(&log).unwrap(), r#"{"epochKey":42,"verdicts":[[2,3,25.5]]}"#);
    }

    #[tokio::test]
    async fn test_builder_uses_reward_window() {
        let (_dir, store) = temp_store().await;
        for (offline, latency, ts) in [(false, 10, 950), (false, 30, 999), (false, 500, 1000), (false, 700, 899)] {
            store.save(&MetricSample::new(1, 4, offline, latency, ts)).await.unwrap();
        }

        let builder = VerdictBuilder::new(store);
        let verdicts = builder.build(1, &[DuePeer { peer_id: 4, report_date: 1000 }], 100).await;

        assert_eq!(verdicts, vec![Verdict { peer_id: 4, downtime_count: 0, mean_latency: 20.0 }]);
    }

    #[tokio::test]
    async fn test_builder_without_samples_reports_zeroes() {
        let (_dir, store) = temp_store().await;
        let builder = VerdictBuilder::new(store);

        let verdicts = builder.build(1, &[DuePeer { peer_id: 9, report_date: 1000 }], 100).await;
        assert_eq!(verdicts, vec![Verdict { peer_id: 9, downtime_count: 0, mean_latency: 0.0 }]);
    }
}
