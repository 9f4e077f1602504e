//! SHA-512-half digests with the network's node-type prefixes.
//!
//! Every node hash is the first 256 bits of a SHA-512 digest over a 4-byte
//! domain prefix followed by the node's logical content. The prefixes match
//! the Ripple/Xahau wire protocol so hashes stored in archives agree with
//! what the network itself computes.

use sha2::{Digest, Sha512};

use crate::types::{Hash256, Key};

/// Prefix for inner nodes (`MIN\0`)
pub const INNER_NODE_PREFIX: [u8; 4] = *b"MIN\0";

/// Prefix for account-state leaves (`MLN\0`)
pub const LEAF_NODE_PREFIX: [u8; 4] = *b"MLN\0";

/// Prefix for transaction-with-metadata leaves (`SND\0`)
pub const TX_NODE_PREFIX: [u8; 4] = *b"SND\0";

/// First 256 bits of SHA-512 over the concatenation of `parts`.
pub fn sha512_half(parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    Hash256(out)
}

/// Digest of an inner node: prefix plus all 16 child hashes in branch order,
/// empty branches contributing the zero hash.
pub fn inner_node_hash(children: &[Hash256; 16]) -> Hash256 {
    let mut hasher = Sha512::new();
    hasher.update(INNER_NODE_PREFIX);
    for child in children {
        hasher.update(child.as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    Hash256(out)
}

/// Digest of a leaf: type prefix, payload, then the key.
pub fn leaf_node_hash(prefix: [u8; 4], data: &[u8], key: &Key) -> Hash256 {
    sha512_half(&[&prefix, data, key.as_bytes()])
}
