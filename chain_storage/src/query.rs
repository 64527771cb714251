//! Read-only query surface (component C5).
//!
//! Everything here is a method on [`ChainStorageEngine`] reading through
//! [`crate::store::KeyedStore`] and [`crate::chain_index::ChainIndex`]
//! without ever opening a batch — these operations run concurrently with
//! each other and with writers (modulo the single-writer lock serializing
//! only mutating calls).

use std::collections::{HashMap, HashSet};

use crate::cancel::CancellationToken;
use crate::codec;
use crate::collaborators::RelayPool;
use crate::engine::ChainStorageEngine;
use crate::error::{EngineError, EngineResult};
use crate::store::tags;
use crate::types::{FullBlock, Hash256, KnownPeer, Tx, TxOut};

/// One historical spend: `source_tx`/`source_index` identify the output
/// that was spent, `tx_hash` the transaction that spent it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpentEntry {
    pub tx_hash: Hash256,
    pub source_tx: Hash256,
    pub source_index: u32,
    pub value: u64,
    pub time: u64,
}

/// One historical receipt: output `index` of `tx_hash`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedEntry {
    pub tx_hash: Hash256,
    pub index: u32,
    pub value: u64,
    pub time: u64,
}

/// A single line of an account statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Posting {
    Received(ReceivedEntry),
    Spent(SpentEntry),
}

impl Posting {
    fn time(&self) -> u64 {
        match self {
            Posting::Received(r) => r.time,
            Posting::Spent(s) => s.time,
        }
    }
}

/// Result of [`ChainStorageEngine::get_account_statement`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountStatement {
    pub opening_balance: u64,
    pub postings: Vec<Posting>,
    /// Current trunk tip at the moment the statement was extracted.
    pub head_hash: Hash256,
    pub extract_time: u64,
}

/// Query-level read policy (spec §7): a codec failure decoding a record
/// off disk is not a hard error to a caller who only asked to read it —
/// it collapses to the same "not found" a reader gets for an absent key,
/// logged so the corruption isn't silently swallowed.
fn collapse_codec_error<T>(result: EngineResult<Option<T>>) -> EngineResult<Option<T>> {
    match result {
        Err(EngineError::CodecError(msg)) => {
            tracing::warn!(error = %msg, "codec failure on read collapsed to not-found");
            Ok(None)
        }
        other => other,
    }
}

impl ChainStorageEngine {
    pub fn get_block(&self, hash: &Hash256) -> EngineResult<FullBlock> {
        let blk = collapse_codec_error(self.load_block(None, hash))?.ok_or(EngineError::NotFound)?;
        let mut txs = Vec::with_capacity(blk.tx_hashes.len());
        for tx_hash in &blk.tx_hashes {
            txs.push(collapse_codec_error(self.load_tx(None, tx_hash))?.ok_or_else(|| {
                EngineError::InconsistentStore(format!("missing tx {tx_hash} referenced by block {hash}"))
            })?);
        }
        Ok(FullBlock { blk, txs })
    }

    /// Prefers `relay` (a mempool-style fast-path cache) over the durable
    /// store when present.
    pub fn get_transaction(&self, hash: &Hash256, relay: Option<&dyn RelayPool>) -> EngineResult<Tx> {
        if let Some(relay) = relay {
            if let Some(tx) = relay.get_transaction(hash) {
                return Ok(tx);
            }
        }
        collapse_codec_error(self.load_tx(None, hash))?.ok_or(EngineError::NotFound)
    }

    pub fn get_trunk(&self) -> EngineResult<Hash256> {
        self.index().current_head_hash().ok_or(EngineError::NotFound)
    }

    pub fn get_previous_block_hash(&self, hash: &Hash256) -> EngineResult<Hash256> {
        self.index().previous_block_hash(hash).ok_or(EngineError::NotFound)
    }

    /// Loads a transaction the ATX index points at, returning `Ok(None)`
    /// if the record is undecodable (collapsed per spec §7's read policy,
    /// so one corrupt record doesn't abort the whole scan over it) and
    /// `Err(InconsistentStore)` if the index points at a key that's
    /// simply absent — that's the index itself being wrong, not a
    /// recoverable read failure.
    fn load_related_tx(&self, tx_hash: &Hash256) -> EngineResult<Option<Tx>> {
        match self.load_tx(None, tx_hash) {
            Err(EngineError::CodecError(msg)) => {
                tracing::warn!(error = %msg, %tx_hash, "codec failure on read collapsed to not-found");
                Ok(None)
            }
            Ok(None) => Err(EngineError::InconsistentStore(format!("missing tx {tx_hash} referenced by ATX index"))),
            other => other,
        }
    }

    fn block_create_time(&self, block_hash: &Hash256) -> EngineResult<u64> {
        self.index()
            .block(block_hash)
            .map(|b| b.create_time)
            .ok_or_else(|| EngineError::InconsistentStore(format!("missing block {block_hash} referenced by a persisted tx")))
    }

    /// Hashes of every transaction touching any of `addresses`, found via
    /// the ATX index, deduplicated and sorted for deterministic output.
    fn related_tx_hashes(&self, addresses: &[String], cancel: Option<&CancellationToken>) -> EngineResult<Vec<Hash256>> {
        let mut hashes = HashSet::new();
        for address in addresses {
            for (key, _) in self.store().scan_prefix(&codec::atx_prefix(address))? {
                if let Some(cancel) = cancel {
                    cancel.check()?;
                }
                match codec::decode_atx_key(&key[1..]) {
                    Ok((_, tx_hash)) => {
                        hashes.insert(tx_hash);
                    }
                    Err(msg) => tracing::warn!(error = %msg, "codec failure on read collapsed to not-found"),
                }
            }
        }
        let mut hashes: Vec<Hash256> = hashes.into_iter().collect();
        hashes.sort();
        Ok(hashes)
    }

    /// Every currently-unspent output owned by any of `addresses`.
    pub fn get_unspent_outputs(&self, addresses: &[String], cancel: Option<&CancellationToken>) -> EngineResult<Vec<TxOut>> {
        let mut outputs = Vec::new();
        for tx_hash in self.related_tx_hashes(addresses, cancel)? {
            if let Some(cancel) = cancel {
                cancel.check()?;
            }
            let Some(tx) = self.load_related_tx(&tx_hash)? else { continue };
            for out in tx.outputs {
                if out.available && out.owned_by_any(addresses) {
                    outputs.push(out);
                }
            }
        }
        Ok(outputs)
    }

    /// Every spend, since `from_time`, of an output owned by any of
    /// `addresses`, stamped with the spending transaction's block time.
    pub fn get_spent(
        &self,
        addresses: &[String],
        from_time: u64,
        cancel: Option<&CancellationToken>,
    ) -> EngineResult<Vec<SpentEntry>> {
        let mut spent = Vec::new();
        for tx_hash in self.related_tx_hashes(addresses, cancel)? {
            if let Some(cancel) = cancel {
                cancel.check()?;
            }
            let Some(tx) = self.load_related_tx(&tx_hash)? else { continue };
            let time = self.block_create_time(&tx.block_hash)?;
            if time < from_time {
                continue;
            }
            for input in &tx.inputs {
                if input.is_coinbase() {
                    continue;
                }
                let Some(source_tx) = collapse_codec_error(self.load_tx(None, &input.source_tx))? else {
                    continue;
                };
                let Some(source_out) = source_tx.outputs.get(input.source_index as usize) else {
                    continue;
                };
                if source_out.owned_by_any(addresses) {
                    spent.push(SpentEntry {
                        tx_hash,
                        source_tx: input.source_tx,
                        source_index: input.source_index,
                        value: source_out.value,
                        time,
                    });
                }
            }
        }
        Ok(spent)
    }

    /// Every receipt, since `from_time`, to any of `addresses`.
    pub fn get_received(
        &self,
        addresses: &[String],
        from_time: u64,
        cancel: Option<&CancellationToken>,
    ) -> EngineResult<Vec<ReceivedEntry>> {
        let mut received = Vec::new();
        for tx_hash in self.related_tx_hashes(addresses, cancel)? {
            if let Some(cancel) = cancel {
                cancel.check()?;
            }
            let Some(tx) = self.load_related_tx(&tx_hash)? else { continue };
            let time = self.block_create_time(&tx.block_hash)?;
            if time < from_time {
                continue;
            }
            for out in &tx.outputs {
                if out.owned_by_any(addresses) {
                    received.push(ReceivedEntry {
                        tx_hash,
                        index: out.index,
                        value: out.value,
                        time,
                    });
                }
            }
        }
        Ok(received)
    }

    /// Opening balance is today's UTXOs minus whatever of them was
    /// received inside the window — what's left is what must have already
    /// been there before `from_time`.
    pub fn get_account_statement(
        &self,
        addresses: &[String],
        from_time: u64,
        cancel: Option<&CancellationToken>,
    ) -> EngineResult<AccountStatement> {
        let received = self.get_received(addresses, from_time, cancel)?;
        let spent = self.get_spent(addresses, from_time, cancel)?;

        let mut postings: Vec<Posting> = Vec::with_capacity(received.len() + spent.len());
        postings.extend(received.iter().cloned().map(Posting::Received));
        postings.extend(spent.iter().cloned().map(Posting::Spent));
        postings.sort_by(|a, b| {
            a.time().cmp(&b.time()).then_with(|| match (a, b) {
                (Posting::Received(_), Posting::Spent(_)) => std::cmp::Ordering::Less,
                (Posting::Spent(_), Posting::Received(_)) => std::cmp::Ordering::Greater,
                _ => std::cmp::Ordering::Equal,
            })
        });

        let mut balance: HashMap<(Hash256, u32), u64> = self
            .get_unspent_outputs(addresses, cancel)?
            .into_iter()
            .map(|out| ((out.tx_hash, out.index), out.value))
            .collect();
        for entry in &received {
            balance.remove(&(entry.tx_hash, entry.index));
        }
        let opening_balance = balance.values().sum();

        let head_hash = self.get_trunk()?;
        let extract_time = self.block_create_time(&head_hash)?;

        Ok(AccountStatement {
            opening_balance,
            postings,
            head_hash,
            extract_time,
        })
    }

    pub fn find_peer(&self, address: &str) -> EngineResult<KnownPeer> {
        match self.store().get(&codec::key_peer(address))? {
            Some(bytes) => codec::decode_peer(&bytes).map_err(|msg| {
                tracing::warn!(error = %msg, address, "codec failure on read collapsed to not-found");
                EngineError::NotFound
            }),
            None => Err(EngineError::NotFound),
        }
    }

    /// Peers not currently banned, ascending by `(preference, response_time)`.
    pub fn get_connectable_peers(&self, now: u64) -> EngineResult<Vec<KnownPeer>> {
        let mut peers = Vec::new();
        for (_, value) in self.store().scan_prefix(&[tags::TAG_PEER])? {
            let peer = match codec::decode_peer(&value) {
                Ok(peer) => peer,
                Err(msg) => {
                    tracing::warn!(error = %msg, "codec failure on read collapsed to not-found");
                    continue;
                }
            };
            if !peer.is_banned(now) {
                peers.push(peer);
            }
        }
        peers.sort_by(|a, b| a.preference.cmp(&b.preference).then(a.response_time_ms.cmp(&b.response_time_ms)));
        Ok(peers)
    }
}
