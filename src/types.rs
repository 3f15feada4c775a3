//! State diff trace types
//!
//! Wire types for the node's "replay block, return state diff" call and the
//! per-block records stored in cached range files.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// State diff of a single transaction.
///
/// The per-address entries are kept as raw JSON so the decoder can tolerate
/// the loosely-typed delta format and report malformed entries one at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxStateDiff {
    /// Transaction hash (absent for block rewards on some clients)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<B256>,

    /// Address (hex string) -> raw account diff object
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub state_diff: BTreeMap<String, Value>,
}

/// All transaction diffs of one block, as written to a cached range file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDiffs {
    pub block_num: u64,
    pub diffs: Vec<TxStateDiff>,
}

fn deserialize_null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

// Hex parsing helpers

/// Pad an odd-length hex string with a leading zero.
/// This handles cases where RPC returns hex strings without leading zeros.
pub fn pad_hex_string(s: &str) -> String {
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Parse a quantity such as `"0x1b4"` into a u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

/// Parse a 20-byte address, with or without 0x prefix.
pub fn parse_address(s: &str) -> Option<Address> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(pad_hex_string(s)).ok()?;
    (bytes.len() == 20).then(|| Address::from_slice(&bytes))
}

/// Parse a storage slot key. Short keys are left-padded to 32 bytes.
pub fn parse_slot(s: &str) -> Option<B256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    let bytes = hex::decode(pad_hex_string(s)).ok()?;
    if bytes.len() > 32 {
        return None;
    }
    let mut padded = [0u8; 32];
    padded[32 - bytes.len()..].copy_from_slice(&bytes);
    Some(B256::from(padded))
}

/// Parse hex-encoded bytes, treating `""` and `"0x"` as empty.
pub fn parse_hex_bytes(s: &str) -> Option<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(pad_hex_string(s)).ok()
}
