//! Keyed multi-index store (component C1).
//!
//! The store is a single ordered keyspace shared by every entity kind,
//! partitioned by a one-byte discriminant tag prefix (see [`tags`]).
//! Callers never see the tag directly: [`crate::codec`]'s `key_*` builders
//! prepend it, and [`KeyedStore::scan_prefix`]/[`KeyedStore::scan_prefix_rev`]
//! scan within one tag's region in ascending or descending key order.
//!
//! Two backends implement [`KeyedStore`]: [`rocks::RocksStore`] for
//! persistent use and [`mem::MemStore`] for tests. Both apply writes only
//! through [`Batch`], so a caller can never observe a partially-applied
//! group of puts/deletes.
//!
//! Batch lifecycle: [`KeyedStore::open_batch`] hands out a fresh, empty
//! [`Batch`]; [`Batch::commit`] consumes it and writes every queued
//! operation atomically; [`Batch::cancel`] consumes it and discards the
//! queued operations without touching the store.

pub mod mem;
pub mod rocks;

use crate::error::EngineResult;

pub use mem::MemStore;
pub use rocks::RocksStore;

/// One-byte discriminants prefixing every key in the shared keyspace.
pub mod tags {
    pub const TAG_TX: u8 = b'T';
    pub const TAG_BLOCK: u8 = b'B';
    pub const TAG_HEAD: u8 = b'H';
    pub const TAG_PEER: u8 = b'P';
    pub const TAG_ATX: u8 = b'A';
}

/// A single mutation queued into a [`Batch`].
#[derive(Clone, Debug)]
enum Op {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A group of puts/deletes applied atomically by [`KeyedStore::write`].
///
/// Mirrors RocksDB's own `WriteBatch`: building one is free of I/O, and
/// nothing is visible to readers until the whole batch is handed to
/// `write`. The engine holds at most one open `Batch` at a time (see
/// `engine::ChainStorageEngine`'s single-batch-per-mutation discipline).
#[derive(Clone, Debug, Default)]
pub struct Batch {
    ops: Vec<Op>,
}

impl Batch {
    pub fn new() -> Self {
        Batch::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(Op::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(Op::Delete(key));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Looks up `key` among this batch's own pending writes, last write
    /// wins. `Some(None)` means the batch deletes `key`; `Some(Some(v))`
    /// means it sets `key` to `v`; `None` means the batch has no opinion
    /// and the caller should fall back to the underlying store. This is
    /// the "per-batch write-through cache" a single logical operation
    /// needs to read back its own uncommitted writes.
    pub fn get(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        for op in self.ops.iter().rev() {
            match op {
                Op::Put(k, v) if k.as_slice() == key => return Some(Some(v.clone())),
                Op::Delete(k) if k.as_slice() == key => return Some(None),
                _ => {}
            }
        }
        None
    }

    /// Writes every queued operation atomically through `store`.
    pub fn commit(self, store: &dyn KeyedStore) -> EngineResult<()> {
        let ops = self.ops.len();
        store.write(self)?;
        tracing::debug!(ops, "batch committed");
        Ok(())
    }

    /// Discards the queued operations; nothing in the batch is ever
    /// written. Equivalent to dropping the batch, spelled out for callers
    /// that want the cancellation to read as deliberate.
    pub fn cancel(self) {
        tracing::debug!(ops = self.ops.len(), "batch cancelled");
    }
}

/// Backend-agnostic access to the keyed store.
///
/// Implementations must give `scan_prefix`/`scan_prefix_rev` byte-order
/// semantics identical to a `BTreeMap<Vec<u8>, Vec<u8>>` restricted to keys
/// starting with `prefix`, since the chain index and query surface rely on
/// that ordering (ascending block height within a head, ascending head id,
/// lexicographic address order for account scans).
pub trait KeyedStore: Send + Sync {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;

    fn scan_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> EngineResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>>;

    fn scan_prefix_rev<'a>(
        &'a self,
        prefix: &[u8],
    ) -> EngineResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>>;

    /// Applies every operation in `batch` atomically: either all of it is
    /// visible to subsequent reads, or (on failure) none of it is.
    fn write(&self, batch: Batch) -> EngineResult<()>;

    /// Hands out a fresh, empty batch. Free of I/O; nothing is reserved or
    /// locked on the store itself — the engine is responsible for only
    /// ever having one batch open at a time (spec's "at most one batch
    /// open per engine instance").
    fn open_batch(&self) -> Batch {
        tracing::debug!("batch opened");
        Batch::new()
    }
}
