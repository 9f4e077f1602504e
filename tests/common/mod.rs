//! Common test utilities shared across the integration suite.
#![allow(dead_code)]

use catl::ledger::LedgerInfo;
use catl::shamap::{SHAMap, TreeType};
use catl::types::Key;

/// Key whose first four bytes carry `n`, keeping test tries shallow.
pub fn wide_key(n: u32) -> Key {
    let mut bytes = [0u8; 32];
    bytes[0..4].copy_from_slice(&n.to_be_bytes());
    Key::new(bytes)
}

/// Key of the `0x00…nn` form used by the overlap scenario: zero except for
/// the last byte.
pub fn tail_key(n: u8) -> Key {
    let mut bytes = [0u8; 32];
    bytes[31] = n;
    Key::new(bytes)
}

/// Deterministic canonical ledger header for a sequence number.
pub fn ledger_info(seq: u32) -> LedgerInfo {
    LedgerInfo {
        seq,
        drops: 100_000_000_000 + seq as u64,
        parent_hash: [seq as u8; 32],
        tx_hash: [0u8; 32],
        account_hash: [0u8; 32],
        parent_close_time: 700_000_000 + seq * 10 - 10,
        close_time: 700_000_000 + seq * 10,
        close_time_resolution: 10,
        close_flags: 0,
        hash: [(seq as u8).wrapping_add(1); 32],
    }
}

/// Fresh empty transaction map.
pub fn empty_tx() -> SHAMap {
    SHAMap::new(TreeType::Transaction)
}

/// Transaction map holding the given `(key, payload)` pairs.
pub fn tx_map(items: &[(Key, &[u8])]) -> SHAMap {
    let mut map = SHAMap::new(TreeType::Transaction);
    for (key, data) in items {
        map.set_item(*key, data.to_vec());
    }
    map
}
