//! Transaction types.
//!
//! A [`Tx`] is an ordered list of [`TxIn`]s spending previously-created
//! outputs (except the distinguished coinbase input, which spends nothing)
//! and an ordered list of [`TxOut`]s creating new, potentially spendable
//! coins.

use serde::{Deserialize, Serialize};

use super::Hash256;

/// Maximum number of owner addresses derived from a single output script.
pub const MAX_OWNERS: usize = 3;

/// A single transaction output.
///
/// `available` is `true` iff this output is unspent on the branch
/// currently represented by the engine's UTXO state — it is a cache flag,
/// flipped by the chain mutator on forward/backward apply, not an
/// independent source of truth.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Hash of the transaction this output belongs to.
    pub tx_hash: Hash256,
    /// Index of this output within its parent transaction.
    pub index: u32,
    /// Value in satoshis.
    pub value: u64,
    /// Locking script bytes.
    pub script: Vec<u8>,
    /// Up to three addresses derived from `script`; unused slots are `None`.
    pub owners: [Option<String>; MAX_OWNERS],
    /// Whether this output is currently unspent on the current head.
    pub available: bool,
}

impl TxOut {
    /// Returns `true` if any of this output's owner addresses is present
    /// in `addresses`.
    pub fn owned_by_any(&self, addresses: &[String]) -> bool {
        self.owners
            .iter()
            .flatten()
            .any(|owner| addresses.iter().any(|a| a == owner))
    }

    /// Iterates over the non-empty owner addresses of this output.
    pub fn owner_addresses(&self) -> impl Iterator<Item = &str> {
        self.owners.iter().filter_map(|o| o.as_deref())
    }
}

/// A single transaction input.
///
/// `source_tx` is [`Hash256::ZERO`] for a coinbase input, which has no
/// referent output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    /// Hash of the transaction being spent from. Zero for coinbase.
    pub source_tx: Hash256,
    /// Index of the output being spent within `source_tx`.
    pub source_index: u32,
    /// Sequence number.
    pub sequence: u32,
    /// Unlocking script bytes.
    pub script: Vec<u8>,
}

impl TxIn {
    pub fn is_coinbase(&self) -> bool {
        self.source_tx.is_zero()
    }
}

/// A persisted transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub hash: Hash256,
    pub version: u32,
    pub lock_time: u32,
    /// Hash of the block this transaction belongs to.
    pub block_hash: Hash256,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
}

impl Tx {
    /// Builds a `Tx` from its constituent fields, computing its hash from
    /// the canonical encoding (see `codec::encode_tx_body`), which does not
    /// include the block hash or per-output `available` flags — both are
    /// storage-layer bookkeeping, not part of the transaction's identity.
    pub fn new(
        version: u32,
        lock_time: u32,
        block_hash: Hash256,
        inputs: Vec<TxIn>,
        mut outputs: Vec<TxOut>,
    ) -> Self {
        let hash = crate::codec::compute_tx_hash(version, lock_time, &inputs, &outputs);
        for out in outputs.iter_mut() {
            out.tx_hash = hash;
        }
        Tx {
            hash,
            version,
            lock_time,
            block_hash,
            inputs,
            outputs,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    pub fn output(&self, index: u32) -> Option<&TxOut> {
        self.outputs.get(index as usize)
    }
}
