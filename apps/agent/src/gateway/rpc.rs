use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use super::{Ledger, NodeInfo, TxReceipt};
use crate::Timestamp;
use crate::error::GatewayError;
use crate::verdict::Verdict;

/// JSON-RPC 2.0 client for the ledger sidecar.
///
/// The sidecar holds the node's keys and does the transaction encoding; this
/// client only forwards calls.
pub struct JsonRpcLedger {
    client: reqwest::Client,
    endpoint: Url,
    next_id: AtomicU64,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl JsonRpcLedger {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).with_context(|| format!("invalid ledger endpoint {endpoint}"))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client, endpoint, next_id: AtomicU64::new(1) })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest { jsonrpc: "2.0", id, method, params };
        debug!(method, id, "ledger rpc call");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Rpc(format!("{method}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Rpc(format!("{method}: HTTP {status}")));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("{method}: {e}")))?;

        decode_response(method, body)
    }
}

fn decode_response<T: DeserializeOwned>(method: &str, body: RpcResponse) -> Result<T, GatewayError> {
    if let Some(err) = body.error {
        return Err(GatewayError::Rpc(format!("{method}: [{}] {}", err.code, err.message)));
    }

    let result = body
        .result
        .ok_or_else(|| GatewayError::Decode(format!("{method}: response has no result")))?;

    serde_json::from_value(result).map_err(|e| GatewayError::Decode(format!("{method}: {e}")))
}

#[async_trait]
impl Ledger for JsonRpcLedger {
    async fn active_node_ids(&self) -> Result<BTreeSet<u64>, GatewayError> {
        self.call("getActiveNodeIds", json!([])).await
    }

    async fn node(&self, id: u64) -> Result<NodeInfo, GatewayError> {
        self.call("getNode", json!([id])).await
    }

    async fn reward_period(&self) -> Result<i64, GatewayError> {
        self.call("getRewardPeriod", json!([])).await
    }

    async fn current_ledger_time(&self) -> Result<Timestamp, GatewayError> {
        self.call("getCurrentLedgerTime", json!([])).await
    }

    async fn submit_verdicts(
        &self,
        owner_id: u64,
        verdicts: &[Verdict],
        dry_run: bool,
    ) -> Result<TxReceipt, GatewayError> {
        let params = json!({ "ownerId": owner_id, "verdicts": verdicts, "dryRun": dry_run });
        let mut receipt: TxReceipt = self.call("submitVerdicts", params).await?;
        if receipt.raw.is_null() {
            receipt.raw = json!({ "success": receipt.success, "txHash": receipt.tx_hash });
        }
        Ok(receipt)
    }
}
