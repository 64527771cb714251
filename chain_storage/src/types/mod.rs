//! Core domain types for the storage engine.
//!
//! This module defines the strongly-typed hash wrapper shared by every
//! entity in the engine, plus the five persisted/cached types described by
//! the data model: blocks, transactions, chain heads, the in-memory DAG
//! cache, and known-peer records.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod block;
pub mod cached;
pub mod head;
pub mod peer;
pub mod tx;

pub use block::{Blk, BlkHeader, FullBlock};
pub use cached::{CachedBlock, CachedHead};
pub use head::Head;
pub use peer::KnownPeer;
pub use tx::{Tx, TxIn, TxOut};

/// Length in bytes of every hash used by the engine.
pub const HASH_LEN: usize = 32;

/// Strongly-typed 256-bit hash.
///
/// Backs block hashes, transaction hashes, and the zero-hash coinbase
/// sentinel. Computed as double-SHA256 over an entity's canonical encoded
/// bytes, matching Bitcoin wire conventions.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash256(pub [u8; HASH_LEN]);

impl Hash256 {
    /// The all-zero hash. Used as the coinbase "no source transaction"
    /// sentinel in [`TxIn::source_tx`].
    pub const ZERO: Hash256 = Hash256([0u8; HASH_LEN]);

    /// Computes the double-SHA256 digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&second);
        Hash256(out)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Hash256(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }
}

impl std::fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash256({})", hex::encode(self.0))
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = Hash256::compute(b"hello");
        let b = Hash256::compute(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn zero_hash_is_zero() {
        assert!(Hash256::ZERO.is_zero());
        assert!(!Hash256::compute(b"x").is_zero());
    }
}
