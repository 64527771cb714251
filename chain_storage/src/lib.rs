//! Persistent, reorganization-aware block-chain storage engine.
//!
//! This crate provides the durable core of a Bitcoin-style full node:
//!
//! - a tagged-key embedded keyed store (`store`),
//! - deterministic byte codecs for every entity (`codec`),
//! - an in-memory cache of the block DAG and its competing heads
//!   (`chain_index`),
//! - the chain mutator / UTXO engine that applies blocks, reorganizes
//!   across branch switches, and maintains the address index (`engine`),
//! - and the read-only query surface wallet-style clients use
//!   (`query`).
//!
//! It does not validate proof-of-work, execute scripts, or speak the P2P
//! wire protocol — those are external collaborators. The engine assumes
//! blocks arrive already validated and is responsible for storing,
//! indexing, reorganizing, and querying them.

pub mod cancel;
pub mod chain_index;
pub mod codec;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod query;
pub mod store;
pub mod types;

pub use cancel::CancellationToken;
pub use chain_index::ChainIndex;
pub use collaborators::{EmptyRelayPool, RelayPool};
pub use config::EngineConfig;
pub use engine::{ChainStorageEngine, InsertOutcome};
pub use error::{EngineError, EngineResult};
pub use query::{AccountStatement, Posting, ReceivedEntry, SpentEntry};
pub use store::{Batch, KeyedStore, MemStore, RocksStore};
pub use types::*;
