//! In-memory chain DAG cache types.
//!
//! `CachedBlock` and `CachedHead` hold only what the chain index needs to
//! answer queries and drive reorgs: relational links into the hash→block
//! and id→head tables owned by [`crate::chain_index::ChainIndex`], never
//! owning references, per the "cyclic block-DAG references" guidance
//! described in spec.md's design notes.

use super::Hash256;

/// In-memory header summary for one stored block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedBlock {
    pub hash: Hash256,
    pub parent_hash: Hash256,
    pub create_time: u64,
    pub height: u64,
    /// Id of the head this block was originally assigned to.
    pub head_id: u64,
    /// Cumulative chain-work from genesis through this block, so a side
    /// branch forking mid-chain can derive its starting chain-work without
    /// re-walking every ancestor.
    pub cumulative_work: u128,
}

/// A materialized chain head: its id, chain-work, height, the hash of its
/// last (tip) block, the ordered hashes of every block belonging to it,
/// and optionally the head it forked from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedHead {
    pub id: u64,
    pub chain_work: u128,
    pub height: u64,
    pub last_hash: Hash256,
    pub members: Vec<Hash256>,
    pub previous_head: Option<u64>,
}
