//! RocksDB-backed [`KeyedStore`].
//!
//! Everything lives in a single column family (`"kv"`); the discriminant
//! tag prefix on every key is what partitions the keyspace, not separate
//! column families, since the query surface needs ordered scans that cross
//! entity boundaries (e.g. `ATX` keys are `tag | address | tx_hash`, never
//! looked up except by prefix).

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BlockBasedOptions, BoundColumnFamily, Cache, ColumnFamilyDescriptor, Direction, IteratorMode, Options, DB,
};

use super::{Batch, KeyedStore, Op};
use crate::error::{EngineError, EngineResult};

const CF_KV: &str = "kv";

/// Configuration for [`RocksStore::open`].
#[derive(Clone, Debug)]
pub struct RocksStoreConfig {
    pub path: String,
    pub create_if_missing: bool,
    /// Size, in MiB, of the block cache backing the `"kv"` column family's
    /// block-based table reads.
    pub cache_size_mib: usize,
}

impl Default for RocksStoreConfig {
    fn default() -> Self {
        RocksStoreConfig {
            path: "data/chain-store".to_string(),
            create_if_missing: true,
            cache_size_mib: 64,
        }
    }
}

pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    pub fn open(cfg: &RocksStoreConfig) -> EngineResult<Self> {
        let path = Path::new(&cfg.path);

        let mut opts = Options::default();
        opts.create_if_missing(cfg.create_if_missing);
        opts.create_missing_column_families(cfg.create_if_missing);

        let mut kv_opts = Options::default();
        let cache = Cache::new_lru_cache(cfg.cache_size_mib * 1024 * 1024);
        let mut table_opts = BlockBasedOptions::default();
        table_opts.set_block_cache(&cache);
        kv_opts.set_block_based_table_factory(&table_opts);

        let cfs = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new(CF_KV, kv_opts),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)
            .map_err(|e| EngineError::StorageFault(e.to_string()))?;

        tracing::info!(path = %cfg.path, "opened rocksdb keyed store");
        Ok(RocksStore { db })
    }

    fn cf(&self) -> EngineResult<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(CF_KV)
            .ok_or_else(|| EngineError::StorageFault("missing \"kv\" column family".into()))
    }
}

/// The lexicographically smallest key that is *not* prefixed by `prefix`,
/// used as the reverse-scan starting point. `None` if every byte is
/// already `0xFF` (no successor exists; caller should scan from the end).
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(&last) = upper.last() {
        if last == 0xFF {
            upper.pop();
        } else {
            *upper.last_mut().unwrap() += 1;
            return Some(upper);
        }
    }
    None
}

impl KeyedStore for RocksStore {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let cf = self.cf()?;
        Ok(self
            .db
            .get_cf(&cf, key)
            .map_err(|e| EngineError::StorageFault(e.to_string()))?)
    }

    fn scan_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> EngineResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>> {
        let cf = self.cf()?;
        let prefix = prefix.to_vec();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));
        Ok(Box::new(
            iter.filter_map(Result::ok)
                .take_while(move |(k, _)| k.starts_with(&prefix))
                .map(|(k, v)| (k.to_vec(), v.to_vec())),
        ))
    }

    fn scan_prefix_rev<'a>(
        &'a self,
        prefix: &[u8],
    ) -> EngineResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>> {
        let cf = self.cf()?;
        let upper = prefix_upper_bound(prefix);
        let iter = match &upper {
            Some(upper) => self
                .db
                .iterator_cf(&cf, IteratorMode::From(upper, Direction::Reverse)),
            None => self.db.iterator_cf(&cf, IteratorMode::End),
        };
        let prefix = prefix.to_vec();
        Ok(Box::new(
            iter.filter_map(Result::ok)
                .skip_while(move |(k, _)| match &upper {
                    Some(upper) => k.as_ref() >= upper.as_slice(),
                    None => false,
                })
                .take_while(move |(k, _)| k.starts_with(&prefix))
                .map(|(k, v)| (k.to_vec(), v.to_vec())),
        ))
    }

    fn write(&self, batch: Batch) -> EngineResult<()> {
        let cf = self.cf()?;
        let mut wb = rocksdb::WriteBatch::default();
        for op in batch.ops {
            match op {
                Op::Put(k, v) => wb.put_cf(&cf, k, v),
                Op::Delete(k) => wb.delete_cf(&cf, k),
            }
        }
        self.db
            .write(wb)
            .map_err(|e| EngineError::StorageFault(e.to_string()))
    }
}
