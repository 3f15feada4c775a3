//! Key encoding and decoding utilities
//!
//! All keys use a single-byte prefix followed by binary data.
//! Block numbers and sequence numbers are big-endian so that RocksDB's
//! lexicographic order matches numeric order.

use alloy_primitives::{Address, B256};

/// Name of the watermark metadata entry.
pub const META_LAST_INDEXED_RANGE: &[u8] = b"last_indexed_range";

/// Encode an account key.
///
/// Format: byte 'A' (0x41) + address (20 bytes)
/// Total length: 21 bytes
pub fn encode_account_key(addr: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(21);
    key.push(b'A');
    key.extend_from_slice(addr.as_slice());
    key
}

/// Encode a storage key.
///
/// Format: byte 'S' (0x53) + address (20 bytes) + slot (32 bytes)
/// Total length: 53 bytes
pub fn encode_storage_key(addr: Address, slot: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(53);
    key.push(b'S');
    key.extend_from_slice(addr.as_slice());
    key.extend_from_slice(slot.as_slice());
    key
}

/// Prefix shared by every event of one account.
///
/// Format: byte 'a' (0x61) + address (20 bytes)
pub fn account_event_prefix(addr: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(37);
    key.push(b'a');
    key.extend_from_slice(addr.as_slice());
    key
}

/// Encode an account touch event key.
///
/// Format: account_event_prefix + block (8 bytes, BE) + seq (8 bytes, BE)
/// Total length: 37 bytes
pub fn encode_account_event_key(addr: Address, block: u64, seq: u64) -> Vec<u8> {
    let mut key = account_event_prefix(addr);
    key.extend_from_slice(&block.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Decode an account event key into (address, block, seq).
pub fn decode_account_event_key(key: &[u8]) -> Option<(Address, u64, u64)> {
    if key.len() != 37 || key[0] != b'a' {
        return None;
    }
    let addr = Address::from_slice(&key[1..21]);
    let (block, seq) = decode_block_seq(&key[21..])?;
    Some((addr, block, seq))
}

/// Prefix shared by every event of one storage slot.
///
/// Format: byte 's' (0x73) + address (20 bytes) + slot (32 bytes)
pub fn storage_event_prefix(addr: Address, slot: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(69);
    key.push(b's');
    key.extend_from_slice(addr.as_slice());
    key.extend_from_slice(slot.as_slice());
    key
}

/// Encode a storage touch event key.
///
/// Format: storage_event_prefix + block (8 bytes, BE) + seq (8 bytes, BE)
/// Total length: 69 bytes
pub fn encode_storage_event_key(addr: Address, slot: B256, block: u64, seq: u64) -> Vec<u8> {
    let mut key = storage_event_prefix(addr, slot);
    key.extend_from_slice(&block.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Decode a storage event key into (address, slot, block, seq).
pub fn decode_storage_event_key(key: &[u8]) -> Option<(Address, B256, u64, u64)> {
    if key.len() != 69 || key[0] != b's' {
        return None;
    }
    let addr = Address::from_slice(&key[1..21]);
    let slot = B256::from_slice(&key[21..53]);
    let (block, seq) = decode_block_seq(&key[53..])?;
    Some((addr, slot, block, seq))
}

/// Encode a watermark event key.
///
/// Format: byte 'w' (0x77) + seq (8 bytes, BE)
/// Total length: 9 bytes
pub fn encode_watermark_event_key(seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(b'w');
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Decode a watermark event key into its sequence number.
pub fn decode_watermark_event_key(key: &[u8]) -> Option<u64> {
    if key.len() != 9 || key[0] != b'w' {
        return None;
    }
    Some(u64::from_be_bytes(key[1..9].try_into().ok()?))
}

fn decode_block_seq(bytes: &[u8]) -> Option<(u64, u64)> {
    let block = u64::from_be_bytes(bytes.get(0..8)?.try_into().ok()?);
    let seq = u64::from_be_bytes(bytes.get(8..16)?.try_into().ok()?);
    Some((block, seq))
}
