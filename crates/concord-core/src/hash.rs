//! Pinned key hashing for ring placement.
//!
//! The ring position of a key or virtual node is the first 8 bytes of its
//! SHA-256 digest, read big-endian as a `u64`. Clients and servers must use
//! the identical derivation or routing diverges across the deployment, so
//! the algorithm is pinned here and validated against configuration.

use sha2::{Digest, Sha256};

/// The only hash algorithm accepted in configuration.
pub const HASH_ALGORITHM: &str = "sha256";

/// Hash arbitrary bytes to a position on the 64-bit ring.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}

/// Hash a string key to a ring position.
#[must_use]
pub fn hash_key(key: &str) -> u64 {
    hash_bytes(key.as_bytes())
}

/// The ring label of a virtual node: `"<nodeId>:<vnodeIndex>"`.
#[must_use]
pub fn vnode_label(node_id: &str, vnode_index: u32) -> String {
    format!("{node_id}:{vnode_index}")
}

/// Ring position of a virtual node, derived from its label.
#[must_use]
pub fn vnode_hash(node_id: &str, vnode_index: u32) -> u64 {
    hash_bytes(vnode_label(node_id, vnode_index).as_bytes())
}

/// Hex-encode a SHA-256 digest over `data`, for integrity hashes.
#[must_use]
pub fn digest_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
