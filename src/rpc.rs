//! JSON-RPC client for Ethereum nodes
//!
//! Provides the two calls the indexer needs: the latest block number and the
//! per-transaction state diffs of a replayed block.

use crate::types::{parse_hex_u64, TxStateDiff};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Source of per-block state diffs.
#[async_trait]
pub trait TraceSource: Send + Sync {
    /// Number of the newest block known to the node.
    async fn latest_block_number(&self) -> Result<u64>;

    /// State diff of every transaction in `block`.
    async fn state_diff(&self, block: u64) -> Result<Vec<TxStateDiff>>;
}

/// JSON-RPC client for Ethereum nodes.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Create a new RPC client.
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make a JSON-RPC call.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", method))?;

        let json: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        // Check for RPC error
        if let Some(error) = json.get("error") {
            anyhow::bail!("RPC error from {}: {}", method, error);
        }

        json.get("result")
            .cloned()
            .context("RPC response missing 'result' field")
    }
}

#[async_trait]
impl TraceSource for RpcClient {
    async fn latest_block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let number = result
            .as_str()
            .context("Block number response is not a string")?;
        parse_hex_u64(number).with_context(|| format!("Invalid block number {:?}", number))
    }

    async fn state_diff(&self, block: u64) -> Result<Vec<TxStateDiff>> {
        let params = json!([format!("0x{:x}", block), ["stateDiff"]]);
        let result = self.call("trace_replayBlockTransactions", params).await?;
        if result.is_null() {
            anyhow::bail!("Node returned no trace for block {}", block);
        }
        serde_json::from_value(result)
            .with_context(|| format!("Failed to deserialize state diff of block {}", block))
    }
}
