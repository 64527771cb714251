//! Block types and hashing.
//!
//! This module defines the stored block header/body split described by the
//! data model: a lightweight [`Blk`] (header plus an ordered list of
//! transaction hashes, as persisted under the `BLOCK` discriminant) and a
//! [`FullBlock`] hydrated by the query surface by joining in the `Tx`
//! records the header references.

use serde::{Deserialize, Serialize};

use super::{Hash256, Tx};

/// Header fields common to every block.
///
/// Field order here is also the field order used by the codec layer's
/// little-endian encoding (see `codec::encode_block`), mirroring Bitcoin
/// wire conventions: previous-hash, version, merkle-root, create-time,
/// compact difficulty target, nonce.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlkHeader {
    /// Hash of the parent block. Zero for genesis.
    pub prev_hash: Hash256,
    /// Block format version.
    pub version: u32,
    /// Merkle root of the block's transactions.
    pub merkle_root: Hash256,
    /// Wall-clock creation time, seconds since Unix epoch.
    pub create_time: u64,
    /// Difficulty target in compact ("nBits") form.
    pub bits: u32,
    /// Proof-of-work nonce.
    pub nonce: u32,
}

/// A stored block: header, height, assigned head, and the ordered hashes
/// of its transactions.
///
/// `hash` is derived from `header` (see [`Blk::compute_hash`]) and cached
/// on the struct so callers don't recompute it on every access; the engine
/// is responsible for keeping the two consistent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blk {
    pub hash: Hash256,
    pub header: BlkHeader,
    pub height: u64,
    pub head_id: u64,
    /// Cumulative chain-work from genesis through this block, along the
    /// branch it was inserted on.
    pub cumulative_work: u128,
    pub tx_hashes: Vec<Hash256>,
}

impl Blk {
    /// Builds a `Blk` from a header, computing and filling in its hash.
    pub fn new(
        header: BlkHeader,
        height: u64,
        head_id: u64,
        cumulative_work: u128,
        tx_hashes: Vec<Hash256>,
    ) -> Self {
        let hash = Self::compute_hash(&header);
        Blk {
            hash,
            header,
            height,
            head_id,
            cumulative_work,
            tx_hashes,
        }
    }

    /// Computes the canonical hash of a header: double-SHA256 over its
    /// little-endian encoding (see `codec::encode_header`).
    pub fn compute_hash(header: &BlkHeader) -> Hash256 {
        let bytes = crate::codec::encode_header(header);
        Hash256::compute(&bytes)
    }

    pub fn is_genesis(&self) -> bool {
        self.header.prev_hash.is_zero()
    }
}

/// A block hydrated with its full transaction bodies, as returned by
/// [`crate::query`]'s `get_block`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FullBlock {
    pub blk: Blk,
    pub txs: Vec<Tx>,
}
