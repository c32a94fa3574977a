use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::executor::MonitoringExecutor;
use super::types::MetricSample;
use crate::nodeset::MonitoredPeer;

enum TaskOutcome {
    Sample(MetricSample),
    Failed(u64, anyhow::Error),
    TimedOut(u64),
}

/// Fans probes out over the peer set with bounded concurrency.
///
/// Every peer gets its own task; a task that errors, times out or panics
/// only loses that peer's sample.
pub struct ConcurrentProber {
    executor: Arc<MonitoringExecutor>,
    max_workers: usize,
    probe_timeout: Duration,
}

impl ConcurrentProber {
    pub fn new(executor: Arc<MonitoringExecutor>, max_workers: usize, probe_timeout: Duration) -> Self {
        Self { executor, max_workers: max_workers.max(1), probe_timeout }
    }

    pub async fn probe_all(&self, peers: &[MonitoredPeer]) -> Vec<MetricSample> {
        if peers.is_empty() {
            return Vec::new();
        }

        let workers = peers.len().min(self.max_workers);
        let permits = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        for peer in peers.iter().cloned() {
            let executor = Arc::clone(&self.executor);
            let permits = Arc::clone(&permits);
            let probe_timeout = self.probe_timeout;

            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return TaskOutcome::Failed(peer.id, e.into()),
                };
                match timeout(probe_timeout, executor.execute(&peer)).await {
                    Ok(Ok(sample)) => TaskOutcome::Sample(sample),
                    Ok(Err(e)) => TaskOutcome::Failed(peer.id, e),
                    Err(_) => TaskOutcome::TimedOut(peer.id),
                }
            });
        }

        let mut samples = Vec::with_capacity(peers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TaskOutcome::Sample(sample)) => samples.push(sample),
                Ok(TaskOutcome::Failed(peer_id, e)) => {
                    warn!(peer_id, error = %e, "probe failed, no sample recorded");
                }
                Ok(TaskOutcome::TimedOut(peer_id)) => {
                    warn!(peer_id, timeout_secs = self.probe_timeout.as_secs_f64(), "probe timed out");
                }
                Err(e) => error!(error = %e, "probe task panicked"),
            }
        }

        info!(peers = peers.len(), samples = samples.len(), workers, "probe round finished");
        samples
    }
}
