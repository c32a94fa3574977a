//! The bounded set of peers this node watches during one reward epoch.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PersistError;
use crate::gateway::ChainGateway;
use crate::persist::{read_json, write_json};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredPeer {
    pub id: u64,
    pub address: String,
}

/// Cached peer set and the epoch marker it was selected under
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSetRecord {
    pub epoch_marker: i64,
    pub peers: Vec<MonitoredPeer>,
}

/// Pick up to `max_count` distinct peers from `active_ids`, never `self_id`.
///
/// When more peers are available than requested, the choice is a uniform
/// random sample without replacement. The result is sorted by id.
pub fn select_peers(active_ids: &BTreeSet<u64>, self_id: u64, max_count: usize) -> Vec<u64> {
    let available: Vec<u64> = active_ids.iter().copied().filter(|id| *id != self_id).collect();

    let mut selected = if available.len() <= max_count {
        available
    } else {
        available.choose_multiple(&mut rand::thread_rng(), max_count).copied().collect()
    };
    selected.sort_unstable();
    selected
}

/// File-backed peer set, refreshed when the reward epoch moves on
pub struct NodeSetCache {
    path: PathBuf,
    self_id: u64,
    max_count: usize,
}

impl NodeSetCache {
    pub fn new(path: impl Into<PathBuf>, self_id: u64, max_count: usize) -> Self {
        Self { path: path.into(), self_id, max_count }
    }

    pub fn load(&self) -> Result<Option<NodeSetRecord>, PersistError> {
        read_json(&self.path)
    }

    /// Return the cached record while its marker is at least
    /// `current_epoch_marker`; otherwise select a fresh set, resolve the
    /// addresses and overwrite the cache.
    pub async fn get_or_refresh(
        &self,
        gateway: &ChainGateway,
        current_epoch_marker: i64,
    ) -> Result<NodeSetRecord> {
        match self.load() {
            Ok(Some(record)) if record.epoch_marker >= current_epoch_marker => return Ok(record),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "unreadable node set cache, selecting a new set"),
        }

        let active = gateway.active_node_ids().await.context("cannot list active nodes")?;
        let ids = select_peers(&active, self.self_id, self.max_count);

        let mut peers = Vec::with_capacity(ids.len());
        for id in ids {
            match gateway.node(id).await {
                Ok(node) => peers.push(MonitoredPeer { id, address: node.address }),
                Err(e) => warn!(peer_id = id, error = %e, "cannot resolve peer address, leaving it out"),
            }
        }

        let record = NodeSetRecord { epoch_marker: current_epoch_marker, peers };
        write_json(&self.path, &record).context("cannot persist node set cache")?;
        info!(epoch = current_epoch_marker, peers = record.peers.len(), "selected new peer set");

        Ok(record)
    }
}
