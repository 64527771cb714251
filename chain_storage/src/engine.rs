//! Chain mutator / UTXO engine (component C4).
//!
//! `ChainStorageEngine` is the only writer in the system: block insertion,
//! reorganization, and peer-store writes all serialize through its single
//! `write_lock`, matching the single-writer/multi-reader model. A failed
//! batch commit poisons the engine (`poisoned`) rather than attempting to
//! unwind partially-applied in-memory state, per the error-handling policy:
//! the engine stays readable but refuses further writes until reopened.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use rand::Rng;

use crate::chain_index::ChainIndex;
use crate::codec;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::{Batch, KeyedStore, MemStore, RocksStore};
use crate::types::{Blk, BlkHeader, CachedBlock, CachedHead, Hash256, Head, KnownPeer, Tx, TxOut};

/// Outcome of a successful [`ChainStorageEngine::insert_block`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The block was appended to some head (the current head, a trailing
    /// side head, or a brand-new fork) without changing which head is
    /// current.
    Appended { hash: Hash256, head_id: u64, height: u64 },
    /// The block gave its head enough chain-work to overtake the previous
    /// current head; the engine rewound and replayed accordingly.
    Reorganized { hash: Hash256, from_head: u64, to_head: u64 },
}

/// A single deferred mutation to the UTXO cache, applied in emission order
/// once the underlying batch has committed. Keeping these in one ordered
/// list (rather than separate "puts" and "removes" vectors) matters during
/// reorgs, where the same `(tx_hash, index)` key can be unwound and then
/// replayed within a single `insert_block` call.
enum CacheOp {
    Put((Hash256, u32), TxOut),
    Remove((Hash256, u32)),
}

/// Converts a header's compact difficulty target into a per-block work
/// contribution used purely for fork-choice bookkeeping. This is an
/// accounting computation, not proof-of-work *validation* (checking that a
/// block's hash actually satisfies its target) — that remains the
/// consensus layer's job, external to this engine.
fn block_work(header: &BlkHeader) -> u128 {
    header.bits as u128
}

pub struct ChainStorageEngine {
    store: Box<dyn KeyedStore>,
    index: ChainIndex,
    utxo: RwLock<HashMap<(Hash256, u32), TxOut>>,
    write_lock: Mutex<()>,
    poisoned: AtomicBool,
    config: EngineConfig,
}

impl ChainStorageEngine {
    /// Opens a persistent engine backed by RocksDB at `config.db_path`.
    pub fn open(config: EngineConfig) -> EngineResult<Self> {
        let store = RocksStore::open(&config.store_config())?;
        Self::from_store(Box::new(store), config)
    }

    /// Opens an in-memory engine, for tests and scratch use.
    pub fn open_in_memory(utxo_window: u64) -> EngineResult<Self> {
        let mut config = EngineConfig::default();
        config.utxo_window = utxo_window;
        Self::from_store(Box::new(MemStore::new()), config)
    }

    fn from_store(store: Box<dyn KeyedStore>, config: EngineConfig) -> EngineResult<Self> {
        let index = ChainIndex::rebuild(store.as_ref())?;
        let utxo = rebuild_utxo_cache(store.as_ref(), &index, config.utxo_window)?;
        tracing::info!(utxo_entries = utxo.len(), "rebuilt utxo cache from store");
        Ok(ChainStorageEngine {
            store,
            index,
            utxo: RwLock::new(utxo),
            write_lock: Mutex::new(()),
            poisoned: AtomicBool::new(false),
            config,
        })
    }

    pub(crate) fn store(&self) -> &dyn KeyedStore {
        self.store.as_ref()
    }

    pub(crate) fn index(&self) -> &ChainIndex {
        &self.index
    }

    pub(crate) fn utxo_cache(&self) -> &RwLock<HashMap<(Hash256, u32), TxOut>> {
        &self.utxo
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    fn refuse_if_poisoned(&self) -> EngineResult<()> {
        if self.poisoned.load(Ordering::SeqCst) {
            Err(EngineError::StorageFault(
                "engine poisoned by a prior failed commit; reopen to continue".into(),
            ))
        } else {
            Ok(())
        }
    }

    fn fresh_head_id(&self) -> u64 {
        let mut rng = rand::thread_rng();
        loop {
            let candidate: u64 = rng.gen();
            if self.index.head(candidate).is_none() {
                return candidate;
            }
        }
    }

    /// Reads `key`, preferring `batch`'s own pending writes over the
    /// committed store — the write-through-cache discipline batches need
    /// so a logical operation sees its own uncommitted writes.
    fn read_key(&self, batch: Option<&Batch>, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        if let Some(batch) = batch {
            if let Some(value) = batch.get(key) {
                return Ok(value);
            }
        }
        self.store.get(key)
    }

    pub(crate) fn load_block(&self, batch: Option<&Batch>, hash: &Hash256) -> EngineResult<Option<Blk>> {
        match self.read_key(batch, &codec::key_block(hash))? {
            Some(bytes) => Ok(Some(codec::decode_block(&bytes).map_err(EngineError::CodecError)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn load_tx(&self, batch: Option<&Batch>, hash: &Hash256) -> EngineResult<Option<Tx>> {
        match self.read_key(batch, &codec::key_tx(hash))? {
            Some(bytes) => Ok(Some(codec::decode_tx(&bytes).map_err(EngineError::CodecError)?)),
            None => Ok(None),
        }
    }

    /// Applies or unapplies one transaction against `batch`, staging the
    /// UTXO cache effects into `cache_ops` rather than mutating the cache
    /// directly (the cache is only mutated once the batch has committed).
    ///
    /// When `canonical` is `false`, the transaction and its ATX entries
    /// are still persisted (every owner address of every output, and of
    /// every spent source output, earns an ATX entry per P5 regardless of
    /// branch), but no output's `available` flag is touched and the UTXO
    /// cache is left alone — the transaction simply isn't part of any
    /// chain's spendable set yet. `InconsistentStore` on a missing source
    /// transaction is only fatal when `canonical` is `true`: a
    /// non-canonical branch may reference a source this engine hasn't
    /// seen yet (it lives further along the same not-yet-replayed chain).
    fn forward_apply_tx(
        &self,
        batch: &mut Batch,
        tx: &Tx,
        canonical: bool,
        cache_ops: &mut Vec<CacheOp>,
    ) -> EngineResult<()> {
        let mut owners: HashSet<String> = HashSet::new();
        let mut outputs = tx.outputs.clone();
        for out in outputs.iter_mut() {
            out.available = canonical;
            owners.extend(out.owner_addresses().map(str::to_string));
            if canonical {
                cache_ops.push(CacheOp::Put((out.tx_hash, out.index), out.clone()));
            }
        }

        for input in &tx.inputs {
            if input.is_coinbase() {
                continue;
            }
            let source_key = codec::key_tx(&input.source_tx);
            let bytes = self.read_key(Some(&*batch), &source_key)?;
            let Some(bytes) = bytes else {
                if canonical {
                    return Err(EngineError::InconsistentStore(format!(
                        "missing source tx {} referenced by {}",
                        input.source_tx, tx.hash
                    )));
                }
                continue;
            };
            let mut source_tx = codec::decode_tx(&bytes).map_err(EngineError::CodecError)?;
            let Some(out) = source_tx.outputs.get_mut(input.source_index as usize) else {
                if canonical {
                    return Err(EngineError::InconsistentStore(format!(
                        "missing output {} on tx {}",
                        input.source_index, input.source_tx
                    )));
                }
                continue;
            };
            owners.extend(out.owner_addresses().map(str::to_string));
            if canonical {
                out.available = false;
                cache_ops.push(CacheOp::Remove((input.source_tx, input.source_index)));
                batch.put(source_key, codec::encode_tx(&source_tx));
            }
        }

        let mut stored_tx = tx.clone();
        stored_tx.outputs = outputs;
        batch.put(codec::key_tx(&tx.hash), codec::encode_tx(&stored_tx));

        for owner in owners {
            batch.put(codec::key_atx(&owner, &tx.hash), vec![0u8]);
        }

        Ok(())
    }

    /// Inverse of [`Self::forward_apply_tx`]'s canonical path: marks `tx`'s
    /// own outputs unavailable and restores its inputs' source outputs to
    /// available. ATX entries are left untouched — they record history,
    /// not current spendability.
    fn backward_apply_tx(&self, batch: &mut Batch, tx: &Tx, cache_ops: &mut Vec<CacheOp>) -> EngineResult<()> {
        let bytes = self
            .read_key(Some(&*batch), &codec::key_tx(&tx.hash))?
            .ok_or_else(|| EngineError::InconsistentStore(format!("missing tx {} during backward apply", tx.hash)))?;
        let mut stored_tx = codec::decode_tx(&bytes).map_err(EngineError::CodecError)?;
        for out in stored_tx.outputs.iter_mut() {
            out.available = false;
            cache_ops.push(CacheOp::Remove((out.tx_hash, out.index)));
        }
        batch.put(codec::key_tx(&tx.hash), codec::encode_tx(&stored_tx));

        for input in &tx.inputs {
            if input.is_coinbase() {
                continue;
            }
            let source_key = codec::key_tx(&input.source_tx);
            let bytes = self.read_key(Some(&*batch), &source_key)?.ok_or_else(|| {
                EngineError::InconsistentStore(format!(
                    "missing source tx {} during backward apply",
                    input.source_tx
                ))
            })?;
            let mut source_tx = codec::decode_tx(&bytes).map_err(EngineError::CodecError)?;
            let out = source_tx
                .outputs
                .get_mut(input.source_index as usize)
                .ok_or_else(|| {
                    EngineError::InconsistentStore(format!(
                        "missing output {} on tx {}",
                        input.source_index, input.source_tx
                    ))
                })?;
            out.available = true;
            cache_ops.push(CacheOp::Put((out.tx_hash, out.index), out.clone()));
            batch.put(source_key, codec::encode_tx(&source_tx));
        }
        Ok(())
    }

    /// Walks backward from `a` and `b` along parent pointers to find their
    /// nearest shared ancestor.
    fn lowest_common_ancestor(&self, a: Hash256, b: Hash256) -> EngineResult<Hash256> {
        let mut seen = HashSet::new();
        let mut cursor = Some(a);
        while let Some(hash) = cursor {
            seen.insert(hash);
            cursor = self.index.previous_block_hash(&hash).filter(|p| !p.is_zero());
        }

        let mut cursor = Some(b);
        while let Some(hash) = cursor {
            if seen.contains(&hash) {
                return Ok(hash);
            }
            cursor = self.index.previous_block_hash(&hash).filter(|p| !p.is_zero());
        }

        Err(EngineError::InconsistentStore(
            "no common ancestor between competing heads".into(),
        ))
    }

    /// Backward-applies `outgoing_tip`'s chain down to (excluding) its
    /// lowest common ancestor with `incoming_ref`, in reverse height order.
    /// Returns that ancestor.
    fn unwind_to_lca(
        &self,
        batch: &mut Batch,
        outgoing_tip: Hash256,
        incoming_ref: Hash256,
        cache_ops: &mut Vec<CacheOp>,
    ) -> EngineResult<Hash256> {
        let lca = self.lowest_common_ancestor(outgoing_tip, incoming_ref)?;

        let path = self
            .index
            .walk(outgoing_tip, lca)
            .ok_or_else(|| EngineError::InconsistentStore("broken parent chain while unwinding".into()))?;

        for cached in path {
            let hash = cached.hash;
            let blk = self
                .load_block(Some(&*batch), &hash)?
                .ok_or_else(|| EngineError::InconsistentStore(format!("missing block {hash} while unwinding")))?;
            let mut txs = Vec::with_capacity(blk.tx_hashes.len());
            for tx_hash in &blk.tx_hashes {
                txs.push(self.load_tx(Some(&*batch), tx_hash)?.ok_or_else(|| {
                    EngineError::InconsistentStore(format!("missing tx {tx_hash} in block {hash}"))
                })?);
            }
            txs.reverse();
            for tx in &txs {
                self.backward_apply_tx(batch, tx, cache_ops)?;
            }
        }

        Ok(lca)
    }

    /// Forward-applies every block strictly between `lca` (excluded) and
    /// `incoming_ref` (included), in ascending height order.
    fn replay_ancestors(
        &self,
        batch: &mut Batch,
        incoming_ref: Hash256,
        lca: Hash256,
        cache_ops: &mut Vec<CacheOp>,
    ) -> EngineResult<()> {
        let mut path = self
            .index
            .walk(incoming_ref, lca)
            .ok_or_else(|| EngineError::InconsistentStore("broken parent chain while replaying".into()))?;
        path.reverse();

        for cached in path {
            let hash = cached.hash;
            let blk = self
                .load_block(Some(&*batch), &hash)?
                .ok_or_else(|| EngineError::InconsistentStore(format!("missing block {hash} while replaying")))?;
            for tx_hash in &blk.tx_hashes {
                let tx = self.load_tx(Some(&*batch), tx_hash)?.ok_or_else(|| {
                    EngineError::InconsistentStore(format!("missing tx {tx_hash} in block {hash}"))
                })?;
                self.forward_apply_tx(batch, &tx, true, cache_ops)?;
            }
        }
        Ok(())
    }

    /// Inserts a validated block. `txs` must be in the block's wire order
    /// and already hashed consistently with `header.merkle_root` — that
    /// consistency check is a consensus-validation concern external to
    /// this engine.
    pub fn insert_block(&self, header: BlkHeader, txs: Vec<Tx>) -> EngineResult<InsertOutcome> {
        self.refuse_if_poisoned()?;
        let _write_guard = self.write_lock.lock();

        let tx_hashes: Vec<Hash256> = txs.iter().map(|t| t.hash).collect();
        let is_genesis = header.prev_hash.is_zero();

        let (height, head_id, cumulative_work, is_new_head, previous_head) = if is_genesis {
            if self.index.trunk_head_id().is_some() {
                return Err(EngineError::InconsistentStore(
                    "genesis block inserted into a non-empty chain".into(),
                ));
            }
            (0u64, self.fresh_head_id(), block_work(&header), true, None)
        } else {
            let parent = self.index.block(&header.prev_hash).ok_or_else(|| {
                EngineError::InconsistentStore(format!("missing parent block {}", header.prev_hash))
            })?;
            let height = parent.height + 1;
            let cumulative_work = parent.cumulative_work + block_work(&header);
            match self.index.head_with_tip(&header.prev_hash) {
                Some(existing_head_id) => {
                    let previous_head = self.index.head(existing_head_id).and_then(|h| h.previous_head);
                    (height, existing_head_id, cumulative_work, false, previous_head)
                }
                None => (height, self.fresh_head_id(), cumulative_work, true, Some(parent.head_id)),
            }
        };

        let blk = Blk::new(header, height, head_id, cumulative_work, tx_hashes);
        let hash = blk.hash;
        let parent_hash = blk.header.prev_hash;
        let create_time = blk.header.create_time;

        let trunk_before = self.index.trunk_head_id();
        let trunk_work_before = trunk_before.and_then(|id| self.index.head(id)).map(|h| h.chain_work);
        let extends_trunk_or_first = trunk_before.is_none() || (trunk_before == Some(head_id) && !is_new_head);
        let overtakes = !extends_trunk_or_first && cumulative_work > trunk_work_before.unwrap_or(0);

        let mut batch = self.store.open_batch();
        batch.put(codec::key_block(&hash), codec::encode_block(&blk));

        let mut cache_ops = Vec::new();

        if extends_trunk_or_first {
            for tx in &txs {
                self.forward_apply_tx(&mut batch, tx, true, &mut cache_ops)?;
            }
        } else {
            for tx in &txs {
                self.forward_apply_tx(&mut batch, tx, false, &mut cache_ops)?;
            }
            if overtakes {
                if let Some(outgoing_tip) = trunk_before.and_then(|id| self.index.head(id)).map(|h| h.last_hash) {
                    let lca = self.unwind_to_lca(&mut batch, outgoing_tip, parent_hash, &mut cache_ops)?;
                    self.replay_ancestors(&mut batch, parent_hash, lca, &mut cache_ops)?;
                }
                for tx in &txs {
                    self.forward_apply_tx(&mut batch, tx, true, &mut cache_ops)?;
                }
            }
        }

        let head_record = Head {
            id: head_id,
            chain_work: cumulative_work,
            height,
            previous_head,
        };
        batch.put(codec::key_head(head_id), codec::encode_head(&head_record));

        if let Err(e) = batch.commit(self.store.as_ref()) {
            self.poisoned.store(true, Ordering::SeqCst);
            tracing::error!(error = %e, "batch commit failed; engine poisoned");
            return Err(e);
        }

        self.index.put_block(CachedBlock {
            hash,
            parent_hash,
            create_time,
            height,
            head_id,
            cumulative_work,
        });

        let mut members = if is_new_head {
            Vec::new()
        } else {
            self.index.head(head_id).map(|h| h.members).unwrap_or_default()
        };
        members.push(hash);
        self.index.put_head(CachedHead {
            id: head_id,
            chain_work: cumulative_work,
            height,
            last_hash: hash,
            members,
            previous_head,
        });

        {
            let mut utxo = self.utxo.write();
            for op in cache_ops {
                match op {
                    CacheOp::Put(key, out) => {
                        utxo.insert(key, out);
                    }
                    CacheOp::Remove(key) => {
                        utxo.remove(&key);
                    }
                }
            }
        }

        let outcome = if overtakes {
            InsertOutcome::Reorganized {
                hash,
                from_head: trunk_before.expect("overtakes implies a prior trunk"),
                to_head: head_id,
            }
        } else {
            InsertOutcome::Appended { hash, head_id, height }
        };

        tracing::info!(%hash, head_id, height, reorg = overtakes, "inserted block");
        Ok(outcome)
    }

    /// Records an observed peer. Serializes through the same writer lock
    /// as block insertion, per the concurrency model.
    pub fn store_peer(&self, peer: KnownPeer) -> EngineResult<()> {
        self.refuse_if_poisoned()?;
        let _write_guard = self.write_lock.lock();

        let mut batch = self.store.open_batch();
        batch.put(codec::key_peer(&peer.address), codec::encode_peer(&peer));
        batch.commit(self.store.as_ref()).map_err(|e| {
            self.poisoned.store(true, Ordering::SeqCst);
            e
        })
    }
}

fn rebuild_utxo_cache(
    store: &dyn KeyedStore,
    index: &ChainIndex,
    depth: u64,
) -> EngineResult<HashMap<(Hash256, u32), TxOut>> {
    let mut cache = HashMap::new();
    let Some(tip) = index.current_head_hash() else {
        return Ok(cache);
    };

    for hash in index.trailing_hashes(tip, depth as usize) {
        let Some(blk) = load_block_from(store, &hash)? else {
            continue;
        };
        for tx_hash in &blk.tx_hashes {
            let tx = load_tx_from(store, tx_hash)?.ok_or_else(|| {
                EngineError::InconsistentStore(format!("missing tx {tx_hash} referenced by block {hash}"))
            })?;
            for out in tx.outputs {
                if out.available {
                    cache.insert((out.tx_hash, out.index), out);
                }
            }
        }
    }

    Ok(cache)
}

fn load_block_from(store: &dyn KeyedStore, hash: &Hash256) -> EngineResult<Option<Blk>> {
    match store.get(&codec::key_block(hash))? {
        Some(bytes) => Ok(Some(codec::decode_block(&bytes).map_err(EngineError::CodecError)?)),
        None => Ok(None),
    }
}

fn load_tx_from(store: &dyn KeyedStore, hash: &Hash256) -> EngineResult<Option<Tx>> {
    match store.get(&codec::key_tx(hash))? {
        Some(bytes) => Ok(Some(codec::decode_tx(&bytes).map_err(EngineError::CodecError)?)),
        None => Ok(None),
    }
}
