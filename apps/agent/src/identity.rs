use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GatewayError, IdentityError};
use crate::gateway::ChainGateway;

/// Contents of the node identity file, `{"nodeId": <id>}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityFile {
    pub node_id: u64,
}

pub fn read_node_id(path: &Path) -> Result<u64, IdentityError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| IdentityError::Read { path: path.to_path_buf(), source })?;
    let identity: IdentityFile = serde_json::from_str(&raw)
        .map_err(|source| IdentityError::Malformed { path: path.to_path_buf(), source })?;
    Ok(identity.node_id)
}

/// The command-line id wins; the identity file is only read without one.
pub fn resolve_node_id(cli_override: Option<u64>, path: &Path) -> Result<u64, IdentityError> {
    match cli_override {
        Some(id) => {
            info!(node_id = id, "using node id from command line");
            Ok(id)
        }
        None => read_node_id(path),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Fail unless `node_id` is in the ledger's active node set.
pub async fn ensure_registered(gateway: &ChainGateway, node_id: u64) -> Result<(), RegistrationError> {
    let active = gateway.active_node_ids().await?;
    if !active.contains(&node_id) {
        return Err(IdentityError::NotRegistered(node_id).into());
    }
    info!(node_id, active_nodes = active.len(), "node is registered");
    Ok(())
}
