/// Ledger gateway - every interaction with the external ledger
///
/// This module is responsible for:
/// - The narrow `Ledger` trait implemented by the external client
/// - Retry policies applied to reads, dry runs and commits
/// - The simulate-then-commit verdict submission protocol
pub mod chain;
pub mod retry;
pub mod rpc;

pub use chain::{ChainGateway, GatewayPolicies, SubmissionState};
pub use retry::{Attempt, RetryPolicy};
pub use rpc::JsonRpcLedger;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Timestamp;
use crate::error::GatewayError;
use crate::verdict::Verdict;

/// Ledger view of a registered node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub address: String,
    pub last_reward_timestamp: Timestamp,
    pub report_date: Timestamp,
}

/// Outcome of a verdict submission, dry run or committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub success: bool,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Operations the agent needs from the ledger client.
///
/// Implementations own signing and transaction encoding; the agent never
/// sees keys.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Ids of every node currently active on the ledger
    async fn active_node_ids(&self) -> Result<BTreeSet<u64>, GatewayError>;

    async fn node(&self, id: u64) -> Result<NodeInfo, GatewayError>;

    /// Length of one reward period in seconds
    async fn reward_period(&self) -> Result<i64, GatewayError>;

    /// Timestamp of the latest ledger block
    async fn current_ledger_time(&self) -> Result<Timestamp, GatewayError>;

    /// Submit verdicts; `dry_run` asks for a non-committing execution
    async fn submit_verdicts(
        &self,
        owner_id: u64,
        verdicts: &[Verdict],
        dry_run: bool,
    ) -> Result<TxReceipt, GatewayError>;
}
