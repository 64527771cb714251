//! Top-level configuration for the storage engine.
//!
//! `EngineConfig` holds the three knobs a caller tunes: where the database
//! lives on disk, how much memory its block cache gets, and how many
//! trailing blocks the UTXO cache is rebuilt over at startup. Built from
//! defaults, a config file, or environment variables, the same way the
//! teacher's own `ChainConfig`/`RocksDbConfig` pair is assembled.

use std::path::PathBuf;

use crate::store::rocks::RocksStoreConfig;

/// Top-level configuration for a storage engine instance: where it persists
/// data and how it behaves once open.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    /// Size, in MiB, of the keyed store's block cache.
    pub cache_size_mib: usize,
    /// Number of trunk blocks, counting back from the tip, the UTXO cache
    /// is rebuilt over at startup.
    pub utxo_window: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            db_path: PathBuf::from("data/chain-store"),
            cache_size_mib: 64,
            utxo_window: 2_000,
        }
    }
}

impl EngineConfig {
    pub(crate) fn store_config(&self) -> RocksStoreConfig {
        RocksStoreConfig {
            path: self.db_path.to_string_lossy().into_owned(),
            create_if_missing: true,
            cache_size_mib: self.cache_size_mib,
        }
    }
}
