//! State diff decoding
//!
//! Normalizes one raw per-address diff object into the touches it implies.
//! The node reports each of `balance`, `code`, `nonce` and `storage` either as
//! the unchanged sentinel `"="` or as a keyed change object:
//!
//! ```text
//! {"*": {"from": .., "to": ..}}   changed
//! {"+": ..}                       created (no previous value)
//! {"-": ..}                       deleted (no new value)
//! ```
//!
//! `storage` is instead a map from slot key to such a change object.

use crate::error::DecodeError;
use crate::types::{parse_address, parse_hex_bytes, parse_slot};
use alloy_primitives::{Address, B256};
use serde_json::{Map, Value};

/// One field of an account diff.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta<'a> {
    Unchanged,
    /// `from` is `None` on creation, `to` is `None` on deletion.
    Changed { from: Option<&'a Value>, to: Option<&'a Value> },
}

impl Delta<'_> {
    pub fn is_changed(&self) -> bool {
        matches!(self, Delta::Changed { .. })
    }
}

/// Decoded view of a single address in a transaction's state diff.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountDiff {
    pub address: Address,
    /// Balance, code or nonce changed.
    pub account_changed: bool,
    /// At least one storage slot changed.
    pub storage_changed: bool,
    /// Code genuinely changed, or storage changed.
    pub is_contract: bool,
    /// Slots that changed.
    pub slots: Vec<B256>,
    /// Storage entries that could not be decoded.
    pub rejected_slots: Vec<DecodeError>,
}

impl AccountDiff {
    /// Whether this entry produces any touch at all.
    pub fn is_touch(&self) -> bool {
        self.account_changed || self.storage_changed
    }
}

/// Decode one `address -> diff` entry.
///
/// Fields that are missing or `null` count as unchanged. A malformed balance,
/// code or nonce field, a non-object storage field, or a bad address fails the
/// whole entry. Individually malformed storage slots are collected in
/// `rejected_slots` and left to the caller's policy.
pub fn decode_account_diff(address: &str, raw: &Value) -> Result<AccountDiff, DecodeError> {
    let addr = parse_address(address).ok_or_else(|| DecodeError::Address(address.to_string()))?;
    let fields = raw.as_object().ok_or_else(|| DecodeError::Field {
        address: address.to_string(),
        field: "diff",
        reason: format!("expected object, got {}", kind(raw)),
    })?;

    let balance = field_delta(address, fields, "balance")?;
    let nonce = field_delta(address, fields, "nonce")?;
    let code = field_delta(address, fields, "code")?;

    let mut slots = Vec::new();
    let mut rejected_slots = Vec::new();
    match fields.get("storage") {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) if s == "=" => {}
        Some(Value::Object(entries)) => {
            for (slot_key, slot_delta) in entries {
                let Some(slot) = parse_slot(slot_key) else {
                    rejected_slots.push(DecodeError::Slot {
                        address: address.to_string(),
                        slot: slot_key.clone(),
                    });
                    continue;
                };
                match parse_delta(address, "storage", slot_delta) {
                    Ok(delta) if delta.is_changed() => slots.push(slot),
                    Ok(_) => {}
                    Err(err) => rejected_slots.push(err),
                }
            }
        }
        Some(other) => {
            return Err(DecodeError::Field {
                address: address.to_string(),
                field: "storage",
                reason: format!("expected \"=\" or slot map, got {}", kind(other)),
            })
        }
    }

    let account_changed = balance.is_changed() || nonce.is_changed() || code.is_changed();
    let storage_changed = !slots.is_empty();
    let code_changed = match &code {
        Delta::Unchanged => false,
        Delta::Changed { from, to } => is_nontrivial_code(*from) || is_nontrivial_code(*to),
    };

    Ok(AccountDiff {
        address: addr,
        account_changed,
        storage_changed,
        is_contract: code_changed || storage_changed,
        slots,
        rejected_slots,
    })
}

fn field_delta<'a>(
    address: &str,
    fields: &'a Map<String, Value>,
    field: &'static str,
) -> Result<Delta<'a>, DecodeError> {
    match fields.get(field) {
        None => Ok(Delta::Unchanged),
        Some(value) => parse_delta(address, field, value),
    }
}

/// Parse a single change object, tolerating any single key.
pub fn parse_delta<'a>(
    address: &str,
    field: &'static str,
    value: &'a Value,
) -> Result<Delta<'a>, DecodeError> {
    let malformed = |reason: String| DecodeError::Field {
        address: address.to_string(),
        field,
        reason,
    };

    match value {
        Value::Null => Ok(Delta::Unchanged),
        Value::String(s) if s == "=" => Ok(Delta::Unchanged),
        Value::Object(map) if map.is_empty() => Ok(Delta::Unchanged),
        // Unwrapped pair: {"from": .., "to": ..}
        Value::Object(map) if map.keys().all(|k| k == "from" || k == "to") => Ok(Delta::Changed {
            from: map.get("from").and_then(non_null),
            to: map.get("to").and_then(non_null),
        }),
        Value::Object(map) => {
            if map.len() != 1 {
                return Err(malformed(format!("expected one change key, got {}", map.len())));
            }
            let (key, inner) = map.iter().next().ok_or_else(|| malformed("empty".into()))?;
            let delta = match key.as_str() {
                "+" => Delta::Changed { from: None, to: non_null(inner) },
                "-" => Delta::Changed { from: non_null(inner), to: None },
                _ => match inner {
                    Value::Object(pair) if pair.contains_key("from") || pair.contains_key("to") => {
                        Delta::Changed {
                            from: pair.get("from").and_then(non_null),
                            to: pair.get("to").and_then(non_null),
                        }
                    }
                    Value::Object(_) => {
                        return Err(malformed(format!("change {key:?} has no from/to pair")))
                    }
                    other => Delta::Changed { from: None, to: non_null(other) },
                },
            };
            Ok(delta)
        }
        other => Err(malformed(format!("unexpected {}", kind(other)))),
    }
}

fn non_null(value: &Value) -> Option<&Value> {
    (!value.is_null()).then_some(value)
}

fn is_nontrivial_code(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .and_then(parse_hex_bytes)
        .map_or(false, |code| !code.is_empty())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ADDR: &str = "0x0000000000000000000000000000000000000001";

    #[test]
    fn test_balance_only_change() {
        let raw = json!({
            "balance": {"*": {"from": "0x0", "to": "0x10"}},
            "code": "=",
            "nonce": "=",
            "storage": {}
        });
        let diff = decode_account_diff(ADDR, &raw).unwrap();
        assert!(diff.account_changed);
        assert!(!diff.storage_changed);
        assert!(!diff.is_contract);
        assert!(diff.slots.is_empty());
    }

    #[test]
    fn test_all_unchanged_is_not_a_touch() {
        let raw = json!({"balance": "=", "code": "=", "nonce": "=", "storage": {}});
        let diff = decode_account_diff(ADDR, &raw).unwrap();
        assert!(!diff.account_changed);
        assert!(!diff.is_touch());
    }

    #[test]
    fn test_contract_creation() {
        let raw = json!({
            "balance": {"+": "0x0"},
            "code": {"+": "0x6080604052"},
            "nonce": {"+": "0x1"},
            "storage": {
                "0x0000000000000000000000000000000000000000000000000000000000000000": {"+": "0x1"}
            }
        });
        let diff = decode_account_diff(ADDR, &raw).unwrap();
        assert!(diff.account_changed);
        assert!(diff.storage_changed);
        assert!(diff.is_contract);
        assert_eq!(diff.slots, vec![B256::ZERO]);
    }

    #[test]
    fn test_account_deletion_with_null_to() {
        let raw = json!({
            "balance": {"*": {"from": "0x5", "to": null}},
            "code": {"-": "0x60"},
            "nonce": "=",
            "storage": "="
        });
        let diff = decode_account_diff(ADDR, &raw).unwrap();
        assert!(diff.account_changed);
        assert!(diff.is_contract);
    }

    #[test]
    fn test_empty_code_change_is_not_contract() {
        let raw = json!({"code": {"*": {"from": "0x", "to": "0x"}}, "balance": "="});
        let diff = decode_account_diff(ADDR, &raw).unwrap();
        assert!(diff.account_changed);
        assert!(!diff.is_contract);
    }

    #[test]
    fn test_storage_only_change_marks_contract() {
        let raw = json!({
            "balance": "=",
            "code": "=",
            "nonce": "=",
            "storage": {"0x01": {"*": {"from": "0x0", "to": "0x2"}}}
        });
        let diff = decode_account_diff(ADDR, &raw).unwrap();
        assert!(!diff.account_changed);
        assert!(diff.storage_changed);
        assert!(diff.is_contract);
        assert_eq!(diff.slots, vec![B256::with_last_byte(1)]);
    }

    #[test]
    fn test_alternate_change_key() {
        let value = json!({"changed": {"from": "0x1", "to": "0x2"}});
        let delta = parse_delta(ADDR, "nonce", &value).unwrap();
        assert_eq!(
            delta,
            Delta::Changed { from: Some(&json!("0x1")), to: Some(&json!("0x2")) }
        );
    }

    #[test]
    fn test_unwrapped_from_to_pair() {
        let value = json!({"from": "0x1", "to": "0x2"});
        let delta = parse_delta(ADDR, "balance", &value).unwrap();
        assert_eq!(
            delta,
            Delta::Changed { from: Some(&json!("0x1")), to: Some(&json!("0x2")) }
        );

        let raw = json!({
            "balance": "=",
            "storage": {"0x04": {"from": "0x0", "to": "0x9"}}
        });
        let diff = decode_account_diff(ADDR, &raw).unwrap();
        assert_eq!(diff.slots, vec![B256::with_last_byte(4)]);

        let value = json!({"from": "0x1", "to": "0x2", "extra": 1});
        assert!(parse_delta(ADDR, "balance", &value).is_err());
    }

    #[test]
    fn test_malformed_field_is_error() {
        let raw = json!({"balance": 42});
        let err = decode_account_diff(ADDR, &raw).unwrap_err();
        assert!(matches!(err, DecodeError::Field { field: "balance", .. }));

        let raw = json!({"storage": [1, 2]});
        assert!(decode_account_diff(ADDR, &raw).is_err());
    }

    #[test]
    fn test_bad_address_is_error() {
        let raw = json!({"balance": "="});
        let err = decode_account_diff("0xnothex", &raw).unwrap_err();
        assert!(matches!(err, DecodeError::Address(_)));
    }

    #[test]
    fn test_bad_slot_is_collected() {
        let raw = json!({
            "storage": {
                "0xzz": {"*": {"from": "0x0", "to": "0x1"}},
                "0x02": {"*": {"from": "0x0", "to": "0x1"}}
            }
        });
        let diff = decode_account_diff(ADDR, &raw).unwrap();
        assert_eq!(diff.slots, vec![B256::with_last_byte(2)]);
        assert_eq!(diff.rejected_slots.len(), 1);
    }
}
