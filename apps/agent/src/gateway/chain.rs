use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::retry::RetryPolicy;
use super::{Ledger, NodeInfo, TxReceipt};
use crate::Timestamp;
use crate::config::LedgerSection;
use crate::error::GatewayError;
use crate::verdict::Verdict;

/// Retry budgets per class of ledger call.
///
/// Commits get fewer attempts and a longer backoff than dry runs: a commit
/// that timed out may still have landed.
#[derive(Debug, Clone, Copy)]
pub struct GatewayPolicies {
    pub read: RetryPolicy,
    pub simulate: RetryPolicy,
    pub commit: RetryPolicy,
}

impl Default for GatewayPolicies {
    fn default() -> Self {
        Self {
            read: RetryPolicy::new(10, Duration::from_secs(2)),
            simulate: RetryPolicy::new(6, Duration::from_secs(5)),
            commit: RetryPolicy::new(3, Duration::from_secs(20)),
        }
    }
}

impl From<&LedgerSection> for GatewayPolicies {
    fn from(section: &LedgerSection) -> Self {
        Self {
            read: section.read_retry.policy(),
            simulate: section.simulate_retry.policy(),
            commit: section.commit_retry.policy(),
        }
    }
}

/// Progress of one verdict submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionState {
    Init,
    Simulated,
    Committed { tx_hash: Option<String> },
    Failed,
}

impl SubmissionState {
    /// Move to `next`, refusing transitions the protocol does not allow.
    fn advance(&mut self, next: SubmissionState) {
        let allowed = matches!(
            (&*self, &next),
            (SubmissionState::Init, SubmissionState::Simulated)
                | (SubmissionState::Init, SubmissionState::Failed)
                | (SubmissionState::Simulated, SubmissionState::Committed { .. })
                | (SubmissionState::Simulated, SubmissionState::Failed)
        );
        if allowed {
            *self = next;
        } else {
            error!(from = ?self, to = ?next, "ignored invalid submission transition");
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionState::Committed { .. } | SubmissionState::Failed)
    }
}

/// Retry-wrapped façade over the ledger client
pub struct ChainGateway {
    ledger: Arc<dyn Ledger>,
    policies: GatewayPolicies,
}

impl ChainGateway {
    pub fn new(ledger: Arc<dyn Ledger>, policies: GatewayPolicies) -> Self {
        Self { ledger, policies }
    }

    pub fn policies(&self) -> &GatewayPolicies {
        &self.policies
    }

    pub async fn active_node_ids(&self) -> Result<BTreeSet<u64>, GatewayError> {
        self.policies.read.run("active_node_ids", |_| self.ledger.active_node_ids()).await
    }

    pub async fn node(&self, id: u64) -> Result<NodeInfo, GatewayError> {
        self.policies.read.run("node", |_| self.ledger.node(id)).await
    }

    pub async fn reward_period(&self) -> Result<i64, GatewayError> {
        self.policies.read.run("reward_period", |_| self.ledger.reward_period()).await
    }

    pub async fn current_ledger_time(&self) -> Result<Timestamp, GatewayError> {
        self.policies.read.run("current_ledger_time", |_| self.ledger.current_ledger_time()).await
    }

    /// Submit verdicts with a dry run first, then the real transaction.
    ///
    /// Errors are wrapped in `GatewayError::Simulate` or `GatewayError::Commit`
    /// depending on the phase that failed. A simulate failure never reaches
    /// the commit call.
    pub async fn submit_verdicts(
        &self,
        owner_id: u64,
        verdicts: &[Verdict],
    ) -> Result<TxReceipt, GatewayError> {
        let mut state = SubmissionState::Init;

        if let Err(e) = self.simulate(owner_id, verdicts).await {
            state.advance(SubmissionState::Failed);
            warn!(owner_id, verdicts = verdicts.len(), error = %e, ?state, "verdict dry run failed");
            return Err(GatewayError::Simulate(Box::new(e)));
        }
        state.advance(SubmissionState::Simulated);
        info!(owner_id, verdicts = verdicts.len(), ?state, "verdict dry run passed");

        match self.commit(owner_id, verdicts).await {
            Ok(receipt) => {
                state.advance(SubmissionState::Committed { tx_hash: receipt.tx_hash.clone() });
                info!(owner_id, ?state, "verdict transaction committed");
                Ok(receipt)
            }
            Err(e) => {
                state.advance(SubmissionState::Failed);
                error!(owner_id, error = %e, ?state, "verdict transaction failed");
                Err(GatewayError::Commit(Box::new(e)))
            }
        }
    }

    async fn simulate(&self, owner_id: u64, verdicts: &[Verdict]) -> Result<TxReceipt, GatewayError> {
        self.policies
            .simulate
            .run("simulate_verdicts", |_| async move {
                let receipt = self.ledger.submit_verdicts(owner_id, verdicts, true).await?;
                if receipt.success {
                    Ok(receipt)
                } else {
                    Err(GatewayError::Rejected { raw: receipt.raw.to_string() })
                }
            })
            .await
    }

    async fn commit(&self, owner_id: u64, verdicts: &[Verdict]) -> Result<TxReceipt, GatewayError> {
        let receipt = self
            .policies
            .commit
            .run("commit_verdicts", |attempt| {
                if !attempt.is_first() {
                    warn!(owner_id, attempt = attempt.number, "re-sending verdict transaction");
                }
                self.ledger.submit_verdicts(owner_id, verdicts, false)
            })
            .await?;

        if receipt.success {
            Ok(receipt)
        } else {
            Err(GatewayError::Transaction { tx_hash: receipt.tx_hash, raw: receipt.raw.to_string() })
        }
    }
}
