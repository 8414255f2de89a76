//! Key ranges for shard placement.

use serde::{Deserialize, Serialize};

use crate::hash;

/// A half-open interval `[start, end)` over the key space.
///
/// Hash-sharded tables place keys on the 64-bit ring; range-sharded tables
/// split on byte-lexicographic key order. Either flavor may wrap around the
/// end of its space (`start > end`), in which case the range covers
/// `[start, MAX] ∪ [MIN, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyRange {
    /// A slice of the 64-bit hash ring.
    Hash {
        /// Inclusive start position
        start: u64,
        /// Exclusive end position
        end: u64,
    },
    /// A byte-lexicographic key interval.
    Bytes {
        /// Inclusive start key
        start: String,
        /// Exclusive end key
        end: String,
    },
}

impl KeyRange {
    /// The full hash ring.
    #[must_use]
    pub fn full() -> Self {
        Self::Hash { start: 0, end: 0 }
    }

    /// Whether the range covers no keys.
    ///
    /// By convention `start == end` on the hash ring denotes the *full*
    /// ring (the wrap-around degenerate), so only byte ranges can be empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Hash { .. } => false,
            Self::Bytes { start, end } => start == end,
        }
    }

    /// Whether a raw key falls inside the range.
    ///
    /// Hash ranges hash the key with the pinned algorithm first; byte
    /// ranges compare lexicographically.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        match self {
            Self::Hash { .. } => self.contains_hash(hash::hash_bytes(key)),
            Self::Bytes { start, end } => {
                let (s, e) = (start.as_bytes(), end.as_bytes());
                if s < e {
                    s <= key && key < e
                } else if s > e {
                    key >= s || key < e
                } else {
                    false
                }
            }
        }
    }

    /// Whether a ring position falls inside a hash range.
    ///
    /// Always false for byte ranges.
    #[must_use]
    pub fn contains_hash(&self, pos: u64) -> bool {
        match self {
            Self::Hash { start, end } => {
                if start == end {
                    true
                } else if start < end {
                    *start <= pos && pos < *end
                } else {
                    pos >= *start || pos < *end
                }
            }
            Self::Bytes { .. } => false,
        }
    }

    /// Number of ring positions covered by a hash range.
    ///
    /// `(2^64 - start) + end` when the range wraps. Byte ranges have no
    /// meaningful size and return `None`.
    #[must_use]
    pub fn size(&self) -> Option<u128> {
        match self {
            Self::Hash { start, end } => {
                let (s, e) = (u128::from(*start), u128::from(*end));
                if s == e {
                    Some(1u128 << 64)
                } else if s < e {
                    Some(e - s)
                } else {
                    Some((1u128 << 64) - s + e)
                }
            }
            Self::Bytes { .. } => None,
        }
    }
}
