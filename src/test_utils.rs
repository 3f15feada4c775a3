//! Test helper impls

use crate::rpc::TraceSource;
use crate::types::TxStateDiff;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Account whose balance changes in every block.
pub(crate) const EOA: &str = "0x0000000000000000000000000000000000000001";
/// Contract whose storage changes in every even block.
pub(crate) const CONTRACT: &str = "0x000000000000000000000000000000000000000a";

/// A [TraceSource] for testing.
///
/// Produces a deterministic diff for every block and records each fetch.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    pub(crate) latest: u64,
    pub(crate) fail_at: Option<u64>,
    cancel_at: Option<(u64, CancellationToken)>,
    fetched: Mutex<Vec<u64>>,
}

impl ScriptedSource {
    pub(crate) fn new(latest: u64) -> Self {
        Self { latest, ..Default::default() }
    }

    pub(crate) fn failing_at(block: u64) -> Self {
        Self { fail_at: Some(block), ..Default::default() }
    }

    /// Fire `cancel` once `block` has been fetched.
    pub(crate) fn cancelling_at(mut self, block: u64, cancel: CancellationToken) -> Self {
        self.cancel_at = Some((block, cancel));
        self
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }
}

#[async_trait]
impl TraceSource for ScriptedSource {
    async fn latest_block_number(&self) -> Result<u64> {
        Ok(self.latest)
    }

    async fn state_diff(&self, block: u64) -> Result<Vec<TxStateDiff>> {
        self.fetched.lock().unwrap().push(block);
        if self.fail_at == Some(block) {
            anyhow::bail!("node unavailable");
        }
        if let Some((at, cancel)) = &self.cancel_at {
            if *at == block {
                cancel.cancel();
            }
        }

        let mut state_diff = std::collections::BTreeMap::new();
        state_diff.insert(
            EOA.to_string(),
            json!({
                "balance": {"*": {"from": "0x0", "to": format!("0x{:x}", block)}},
                "code": "=",
                "nonce": "=",
                "storage": {}
            }),
        );
        if block % 2 == 0 {
            let mut storage = serde_json::Map::new();
            storage.insert(
                format!("0x{:x}", (block / 2) % 2),
                json!({"*": {"from": "0x0", "to": format!("0x{:x}", block)}}),
            );
            state_diff.insert(
                CONTRACT.to_string(),
                json!({"balance": "=", "code": "=", "nonce": "=", "storage": storage}),
            );
        }

        Ok(vec![TxStateDiff { transaction_hash: None, state_diff }])
    }
}
