use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use super::checker::{LivenessProbe, ReachabilityProbe};
use super::types::MetricSample;
use crate::nodeset::MonitoredPeer;
use crate::now_timestamp;

/// Monitoring executor - probes a single peer and turns the outcome into a sample
pub struct MonitoringExecutor {
    owner_id: u64,
    reachability: Arc<dyn ReachabilityProbe>,
    liveness: Vec<Arc<dyn LivenessProbe>>,
}

impl MonitoringExecutor {
    pub fn new(
        owner_id: u64,
        reachability: Arc<dyn ReachabilityProbe>,
        liveness: Vec<Arc<dyn LivenessProbe>>,
    ) -> Self {
        Self { owner_id, reachability, liveness }
    }

    /// Probe `peer` once.
    ///
    /// Liveness checks only run when the peer is reachable; any of them
    /// failing marks the sample offline while keeping the measured latency.
    /// An error from the reachability probe is returned to the caller and
    /// produces no sample.
    pub async fn execute(&self, peer: &MonitoredPeer) -> Result<MetricSample> {
        let reach = self.reachability.probe(&peer.address).await?;
        let mut offline = reach.offline;

        if !offline {
            for probe in &self.liveness {
                let healthy = match probe.check(peer).await {
                    Ok(healthy) => healthy,
                    Err(e) => {
                        warn!(peer_id = peer.id, probe = probe.name(), error = %e, "liveness probe errored");
                        false
                    }
                };
                if !healthy {
                    offline = true;
                    break;
                }
            }
        }

        let sample = MetricSample::new(self.owner_id, peer.id, offline, reach.latency_ms, now_timestamp());
        info!(peer_id = peer.id, offline = sample.offline, latency_ms = sample.latency_ms, "received metrics");
        Ok(sample)
    }
}
