//! Property-style coverage for P2 (UTXO consistency) and P3 (reorg
//! reversibility) from the storage engine specification.

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

fn spend_all(block_hash: Hash256, source_tx: Hash256, value: u64, owner: &str) -> Tx {
    let input = TxIn {
        source_tx,
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

fn balance(engine: &ChainStorageEngine, address: &str) -> u64 {
    engine
        .get_unspent_outputs(&[address.to_string()], None)
        .unwrap()
        .iter()
        .map(|o| o.value)
        .sum()
}

/// P3: applying a block then reorganizing away from it restores every
/// output's `available` flag to its pre-block value.
#[test]
fn reorg_reversibility_restores_pre_block_availability() {
    let engine = ChainStorageEngine::open_in_memory(100).unwrap();

    let g_header = header(Hash256::ZERO, 10, 1_000);
    let g_hash = Blk::compute_hash(&g_header);
    engine.insert_block(g_header, vec![]).unwrap();

    let a_header = header(g_hash, 10, 1_100);
    let a_hash = Blk::compute_hash(&a_header);
    let a_tx = coinbase(a_hash, 50, "alpha");
    let a_tx_hash = a_tx.hash;
    engine.insert_block(a_header, vec![a_tx]).unwrap();

    // Pre-block-X state: alpha spendable, beta empty.
    assert_eq!(balance(&engine, "alpha"), 50);
    assert_eq!(balance(&engine, "beta"), 0);

    // Block X: spends alpha's output into beta.
    let x_header = header(a_hash, 1, 1_200);
    let x_hash = Blk::compute_hash(&x_header);
    engine
        .insert_block(x_header, vec![spend_all(x_hash, a_tx_hash, 50, "beta")])
        .unwrap();
    assert_eq!(balance(&engine, "alpha"), 0);
    assert_eq!(balance(&engine, "beta"), 50);

    // A competing block Y, also extending A, with enough work to displace X.
    let y_header = header(a_hash, 50, 1_200);
    let y_hash = Blk::compute_hash(&y_header);
    engine.insert_block(y_header, vec![]).unwrap();

    assert_eq!(engine.get_trunk().unwrap(), y_hash);
    // Reorganizing away from X restores alpha's and beta's pre-X state.
    assert_eq!(balance(&engine, "alpha"), 50);
    assert_eq!(balance(&engine, "beta"), 0);
}

/// P2: the available set always matches the current head's reachable,
/// unspent outputs — never a mix of branches.
#[test]
fn utxo_consistency_tracks_current_head_only() {
    let engine = ChainStorageEngine::open_in_memory(100).unwrap();

    let g_header = header(Hash256::ZERO, 10, 1_000);
    let g_hash = Blk::compute_hash(&g_header);
    engine.insert_block(g_header, vec![]).unwrap();

    let a_header = header(g_hash, 10, 1_100);
    let a_hash = Blk::compute_hash(&a_header);
    engine.insert_block(a_header, vec![coinbase(a_hash, 50, "alpha")]).unwrap();

    // Side branch off genesis that never becomes current: its coinbase to
    // "shadow" must never show up as spendable while A-line is on top.
    let side_header = header(g_hash, 1, 1_100);
    let side_hash = Blk::compute_hash(&side_header);
    engine.insert_block(side_header, vec![coinbase(side_hash, 99, "shadow")]).unwrap();

    assert_eq!(engine.get_trunk().unwrap(), a_hash);
    assert_eq!(balance(&engine, "alpha"), 50);
    assert_eq!(balance(&engine, "shadow"), 0);
}
