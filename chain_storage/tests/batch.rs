//! P6: batch atomicity against the on-disk RocksDB backend. A committed
//! batch survives a reopen of the store; a cancelled batch leaves no trace.

use chain_storage::store::rocks::RocksStoreConfig;
use chain_storage::{codec, Hash256, KeyedStore, RocksStore, Tx, TxIn, TxOut};

fn sample_tx() -> Tx {
    let input = TxIn {
        source_tx: Hash256::ZERO,
        source_index: 0,
        sequence: 0,
        script: vec![],
    };
    let output = TxOut {
        tx_hash: Hash256::ZERO,
        index: 0,
        value: 7,
        script: vec![],
        owners: [Some("zeta".to_string()), None, None],
        available: false,
    };
    Tx::new(1, 0, Hash256::compute(b"some-block"), vec![input], vec![output])
}

fn config(path: &std::path::Path) -> RocksStoreConfig {
    RocksStoreConfig {
        path: path.to_string_lossy().into_owned(),
        create_if_missing: true,
        cache_size_mib: 8,
    }
}

#[test]
fn committed_batch_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let tx = sample_tx();

    {
        let store = RocksStore::open(&cfg).unwrap();
        let mut batch = store.open_batch();
        batch.put(codec::key_tx(&tx.hash), codec::encode_tx(&tx));
        batch.commit(&store).unwrap();
    }

    let store = RocksStore::open(&cfg).unwrap();
    let bytes = store.get(&codec::key_tx(&tx.hash)).unwrap().unwrap();
    assert_eq!(codec::decode_tx(&bytes).unwrap(), tx);
}

#[test]
fn cancelled_batch_does_not_persist() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let store = RocksStore::open(&cfg).unwrap();

    let tx = sample_tx();
    let mut batch = store.open_batch();
    batch.put(codec::key_tx(&tx.hash), codec::encode_tx(&tx));
    batch.cancel();

    assert_eq!(store.get(&codec::key_tx(&tx.hash)).unwrap(), None);
}
