//! Cached in-memory chain-head DAG (component C3).
//!
//! `ChainIndex` mirrors the persisted `BLOCK`/`HEAD` records into
//! [`CachedBlock`]/[`CachedHead`] maps keyed by hash and by head id. Entries
//! reference each other only through hashes and ids, never through owning
//! pointers, so the cyclic parent/previous-head relationships in the block
//! DAG never need `Rc`/`Arc` cycles. [`engine::ChainStorageEngine`] is the
//! only writer; every read here is served from memory.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{EngineError, EngineResult};
use crate::store::{tags, KeyedStore};
use crate::types::{CachedBlock, CachedHead, Hash256};
use crate::{codec, types::Head};

struct State {
    blocks: HashMap<Hash256, CachedBlock>,
    heads: HashMap<u64, CachedHead>,
    /// Id of the head with the greatest cumulative chain-work (the trunk).
    trunk: Option<u64>,
}

impl State {
    fn empty() -> Self {
        State {
            blocks: HashMap::new(),
            heads: HashMap::new(),
            trunk: None,
        }
    }

    /// Re-derives the trunk head id. Ties in `(chain_work, height)` favor
    /// whichever head is already `self.trunk` — "the head already marked
    /// current wins, no flip" (spec §4.4) — since head ids are random and
    /// carry no insertion-order information to tie-break on otherwise.
    /// Only when no current trunk is tied for the max (startup rebuild, or
    /// the current trunk was just removed) does this fall back to the
    /// smallest id among the tied candidates, an arbitrary but
    /// deterministic choice.
    fn recompute_trunk(&mut self) {
        let Some(best) = self.heads.values().map(|h| (h.chain_work, h.height)).max() else {
            self.trunk = None;
            return;
        };
        let mut candidates: Vec<u64> = self
            .heads
            .values()
            .filter(|h| (h.chain_work, h.height) == best)
            .map(|h| h.id)
            .collect();
        if let Some(current) = self.trunk {
            if candidates.contains(&current) {
                return;
            }
        }
        candidates.sort_unstable();
        self.trunk = candidates.into_iter().next();
    }
}

pub struct ChainIndex {
    state: RwLock<State>,
}

impl ChainIndex {
    pub fn empty() -> Self {
        ChainIndex {
            state: RwLock::new(State::empty()),
        }
    }

    /// Rebuilds the in-memory cache by scanning every `BLOCK` and `HEAD`
    /// record in `store`. Run once at startup, after which the engine keeps
    /// the cache current incrementally.
    pub fn rebuild(store: &dyn KeyedStore) -> EngineResult<Self> {
        let mut state = State::empty();

        for (_, value) in store.scan_prefix(&[tags::TAG_HEAD])? {
            let head = codec::decode_head(&value).map_err(EngineError::CodecError)?;
            state.heads.insert(head.id, cached_head_from_persisted(&head, store)?);
        }

        for (_, value) in store.scan_prefix(&[tags::TAG_BLOCK])? {
            let blk = codec::decode_block(&value).map_err(EngineError::CodecError)?;
            state.blocks.insert(
                blk.hash,
                CachedBlock {
                    hash: blk.hash,
                    parent_hash: blk.header.prev_hash,
                    create_time: blk.header.create_time,
                    height: blk.height,
                    head_id: blk.head_id,
                    cumulative_work: blk.cumulative_work,
                },
            );
        }

        state.recompute_trunk();
        tracing::info!(
            blocks = state.blocks.len(),
            heads = state.heads.len(),
            "rebuilt chain index from store"
        );
        Ok(ChainIndex {
            state: RwLock::new(state),
        })
    }

    pub fn trunk_head_id(&self) -> Option<u64> {
        self.state.read().trunk
    }

    /// Hash of the trunk head's tip block, if any chain has been stored yet.
    pub fn current_head_hash(&self) -> Option<Hash256> {
        let state = self.state.read();
        let trunk = state.trunk?;
        state.heads.get(&trunk).map(|h| h.last_hash)
    }

    pub fn head(&self, id: u64) -> Option<CachedHead> {
        self.state.read().heads.get(&id).cloned()
    }

    pub fn block(&self, hash: &Hash256) -> Option<CachedBlock> {
        self.state.read().blocks.get(hash).cloned()
    }

    pub fn previous_block_hash(&self, hash: &Hash256) -> Option<Hash256> {
        self.state.read().blocks.get(hash).map(|b| b.parent_hash)
    }

    /// Id of the head whose tip is `hash`, if any. `None` means `hash`
    /// either doesn't exist or is a fork point buried inside some head's
    /// member list rather than sitting at its tip.
    pub fn head_with_tip(&self, hash: &Hash256) -> Option<u64> {
        self.state
            .read()
            .heads
            .values()
            .find(|h| &h.last_hash == hash)
            .map(|h| h.id)
    }

    /// Returns the cached block `hash` belongs to, and whether it lies on
    /// the current trunk.
    pub fn locate(&self, hash: &Hash256) -> Option<(CachedBlock, bool)> {
        let state = self.state.read();
        let block = state.blocks.get(hash)?.clone();
        let on_trunk = state
            .trunk
            .and_then(|id| state.heads.get(&id))
            .map(|h| h.members.contains(hash))
            .unwrap_or(false);
        Some((block, on_trunk))
    }

    /// Walks backward from `from`, yielding up to `limit` ancestor hashes
    /// (inclusive of `from`), stopping early at genesis. Used by the
    /// engine's startup UTXO-cache rebuild, which only needs a bounded
    /// trailing window rather than a path to a specific ancestor.
    pub fn trailing_hashes(&self, from: Hash256, limit: usize) -> Vec<Hash256> {
        let state = self.state.read();
        let mut out = Vec::with_capacity(limit);
        let mut cursor = Some(from);
        while let Some(hash) = cursor {
            if out.len() >= limit {
                break;
            }
            out.push(hash);
            cursor = state.blocks.get(&hash).and_then(|b| {
                if b.parent_hash.is_zero() {
                    None
                } else {
                    Some(b.parent_hash)
                }
            });
        }
        out
    }

    /// Enumerates the [`CachedBlock`]s strictly between `from` (included)
    /// and `to` (excluded), walking backward along parent pointers in
    /// descending height order. `None` if `to` is never reached — either
    /// a cached block is missing, or genesis is hit first — signaling a
    /// broken parent chain to the caller. This is the operation the
    /// mutator relies on to walk both legs of a reorg.
    pub fn walk(&self, from: Hash256, to: Hash256) -> Option<Vec<CachedBlock>> {
        let state = self.state.read();
        let mut out = Vec::new();
        let mut cursor = from;
        loop {
            if cursor == to {
                return Some(out);
            }
            let block = state.blocks.get(&cursor)?;
            out.push(block.clone());
            if block.parent_hash.is_zero() {
                return None;
            }
            cursor = block.parent_hash;
        }
    }

    /// Inserts or replaces a block's cache entry.
    pub fn put_block(&self, block: CachedBlock) {
        self.state.write().blocks.insert(block.hash, block);
    }

    /// Inserts or replaces a head's cache entry and re-derives the trunk.
    pub fn put_head(&self, head: CachedHead) {
        let mut state = self.state.write();
        state.heads.insert(head.id, head);
        state.recompute_trunk();
    }

    pub fn head_ids(&self) -> Vec<u64> {
        self.state.read().heads.keys().copied().collect()
    }
}

fn cached_head_from_persisted(head: &Head, store: &dyn KeyedStore) -> EngineResult<CachedHead> {
    let mut members = Vec::new();
    let mut last_hash = Hash256::ZERO;
    let mut last_height = None;

    for (_, value) in store.scan_prefix(&[tags::TAG_BLOCK])? {
        let blk = codec::decode_block(&value).map_err(EngineError::CodecError)?;
        if blk.head_id != head.id {
            continue;
        }
        members.push(blk.hash);
        if last_height.map(|h| blk.height > h).unwrap_or(true) {
            last_height = Some(blk.height);
            last_hash = blk.hash;
        }
    }

    Ok(CachedHead {
        id: head.id,
        chain_work: head.chain_work,
        height: head.height,
        last_hash,
        members,
        previous_head: head.previous_head,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(hash: u8, parent: u8, height: u64) -> CachedBlock {
        CachedBlock {
            hash: Hash256::from_bytes([hash; 32]),
            parent_hash: if parent == 0 {
                Hash256::ZERO
            } else {
                Hash256::from_bytes([parent; 32])
            },
            create_time: 0,
            height,
            head_id: 1,
            cumulative_work: height as u128,
        }
    }

    #[test]
    fn trailing_hashes_stops_at_genesis() {
        let idx = ChainIndex::empty();
        idx.put_block(block(1, 0, 0));
        idx.put_block(block(2, 1, 1));
        idx.put_block(block(3, 2, 2));

        let hashes = idx.trailing_hashes(Hash256::from_bytes([3; 32]), 10);
        assert_eq!(hashes.len(), 3);
        assert_eq!(hashes[0], Hash256::from_bytes([3; 32]));
        assert_eq!(hashes[2], Hash256::from_bytes([1; 32]));
    }

    #[test]
    fn trailing_hashes_respects_limit() {
        let idx = ChainIndex::empty();
        idx.put_block(block(1, 0, 0));
        idx.put_block(block(2, 1, 1));
        idx.put_block(block(3, 2, 2));

        let hashes = idx.trailing_hashes(Hash256::from_bytes([3; 32]), 2);
        assert_eq!(hashes.len(), 2);
    }

    #[test]
    fn walk_enumerates_blocks_between_two_hashes_excluding_the_ancestor() {
        let idx = ChainIndex::empty();
        idx.put_block(block(1, 0, 0));
        idx.put_block(block(2, 1, 1));
        idx.put_block(block(3, 2, 2));

        let path = idx
            .walk(Hash256::from_bytes([3; 32]), Hash256::from_bytes([1; 32]))
            .unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].hash, Hash256::from_bytes([3; 32]));
        assert_eq!(path[1].hash, Hash256::from_bytes([2; 32]));
    }

    #[test]
    fn walk_returns_none_when_the_ancestor_is_never_reached() {
        let idx = ChainIndex::empty();
        idx.put_block(block(1, 0, 0));
        idx.put_block(block(2, 1, 1));

        assert!(idx.walk(Hash256::from_bytes([2; 32]), Hash256::from_bytes([9; 32])).is_none());
    }

    #[test]
    fn trunk_is_the_head_with_greatest_chain_work() {
        let idx = ChainIndex::empty();
        idx.put_head(CachedHead {
            id: 1,
            chain_work: 10,
            height: 5,
            last_hash: Hash256::from_bytes([1; 32]),
            members: vec![],
            previous_head: None,
        });
        idx.put_head(CachedHead {
            id: 2,
            chain_work: 20,
            height: 4,
            last_hash: Hash256::from_bytes([2; 32]),
            members: vec![],
            previous_head: None,
        });

        assert_eq!(idx.trunk_head_id(), Some(2));
        assert_eq!(idx.current_head_hash(), Some(Hash256::from_bytes([2; 32])));
    }

    #[test]
    fn tied_chain_work_does_not_flip_away_from_the_current_head() {
        let idx = ChainIndex::empty();
        idx.put_head(CachedHead {
            id: 42,
            chain_work: 10,
            height: 3,
            last_hash: Hash256::from_bytes([1; 32]),
            members: vec![],
            previous_head: None,
        });
        assert_eq!(idx.trunk_head_id(), Some(42));

        // A second head reaches the exact same (chain_work, height). Per
        // spec §4.4, a tie leaves the already-current head in place.
        idx.put_head(CachedHead {
            id: 7,
            chain_work: 10,
            height: 3,
            last_hash: Hash256::from_bytes([2; 32]),
            members: vec![],
            previous_head: None,
        });
        assert_eq!(idx.trunk_head_id(), Some(42));
    }
}
