//! P5: every owner address of every output or spent source output earns
//! an ATX entry, regardless of whether that address is a recipient or a
//! spender in a given transaction.

use chain_storage::{Blk, BlkHeader, ChainStorageEngine, Hash256, Tx, TxIn, TxOut};

fn header(prev: Hash256, bits: u32, create_time: u64) -> BlkHeader {
    BlkHeader {
        prev_hash: prev,
        version: 1,
        merkle_root: Hash256::compute(b"merkle"),
        create_time,
        bits,
        nonce: 0,
    }
}

fn coinbase(block_hash: Hash256, value: u64, owner: &str) -> Tx {
    let input = TxIn {
        source_tx: Hash256::ZERO,
        source_index: 0,
        sequence: 0,
        script: vec![],
    };
    let output = TxOut {
        tx_hash: Hash256::ZERO,
        index: 0,
        value,
        script: vec![],
        owners: [Some(owner.to_string()), None, None],
        available: false,
    };
    Tx::new(1, 0, block_hash, vec![input], vec![output])
}

#[test]
fn atx_index_covers_both_spender_and_recipient() {
    let engine = ChainStorageEngine::open_in_memory(100).unwrap();

    let g_header = header(Hash256::ZERO, 1, 1_000);
    let g_hash = Blk::compute_hash(&g_header);
    engine.insert_block(g_header, vec![]).unwrap();

    let a_header = header(g_hash, 1, 1_100);
    let a_hash = Blk::compute_hash(&a_header);
    let a_tx = coinbase(a_hash, 50, "alpha");
    let a_tx_hash = a_tx.hash;
    engine.insert_block(a_header, vec![a_tx]).unwrap();

    let b_header = header(a_hash, 1, 1_200);
    let b_hash = Blk::compute_hash(&b_header);
    let input = TxIn {
        source_tx: a_tx_hash,
        source_index: 0,
        sequence: 0,
        script: vec![],
    };
    let output = TxOut {
        tx_hash: Hash256::ZERO,
        index: 0,
        value: 50,
        script: vec![],
        owners: [Some("beta".to_string()), None, None],
        available: false,
    };
    let b_tx = Tx::new(1, 0, b_hash, vec![input], vec![output]);
    let b_tx_hash = b_tx.hash;
    engine.insert_block(b_header, vec![b_tx]).unwrap();

    // "alpha" spent in b_tx: an ATX entry must exist so get_spent finds it.
    let spent = engine.get_spent(&["alpha".to_string()], 0, None).unwrap();
    assert_eq!(spent.len(), 1);
    assert_eq!(spent[0].tx_hash, b_tx_hash);
    assert_eq!(spent[0].source_tx, a_tx_hash);

    // "beta" received in b_tx: a separate ATX entry for the same tx.
    let received = engine.get_received(&["beta".to_string()], 0, None).unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].tx_hash, b_tx_hash);
    assert_eq!(received[0].value, 50);

    // "alpha" also appears in its own receiving transaction's ATX entry.
    let alpha_received = engine.get_received(&["alpha".to_string()], 0, None).unwrap();
    assert_eq!(alpha_received.len(), 1);
    assert_eq!(alpha_received[0].tx_hash, a_tx_hash);
}
