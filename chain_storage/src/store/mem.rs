//! In-memory [`KeyedStore`] backed by a `BTreeMap`, for tests and small
//! scratch databases.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{Batch, KeyedStore, Op};
use crate::error::{EngineError, EngineResult};

#[derive(Default)]
pub struct MemStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }
}

impl KeyedStore for MemStore {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let map = self.map.read().map_err(|_| lock_poisoned())?;
        Ok(map.get(key).cloned())
    }

    fn scan_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> EngineResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>> {
        let map = self.map.read().map_err(|_| lock_poisoned())?;
        let prefix = prefix.to_vec();
        let snapshot: Vec<_> = map
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(snapshot.into_iter()))
    }

    fn scan_prefix_rev<'a>(
        &'a self,
        prefix: &[u8],
    ) -> EngineResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>> {
        let map = self.map.read().map_err(|_| lock_poisoned())?;
        let prefix = prefix.to_vec();
        let mut snapshot: Vec<_> = map
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        snapshot.reverse();
        Ok(Box::new(snapshot.into_iter()))
    }

    fn write(&self, batch: Batch) -> EngineResult<()> {
        let mut map = self.map.write().map_err(|_| lock_poisoned())?;
        for op in batch.ops {
            match op {
                Op::Put(k, v) => {
                    map.insert(k, v);
                }
                Op::Delete(k) => {
                    map.remove(&k);
                }
            }
        }
        Ok(())
    }
}

fn lock_poisoned() -> EngineError {
    EngineError::StorageFault("in-memory store lock poisoned".into())
}
