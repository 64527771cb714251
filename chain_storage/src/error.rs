//! Engine-wide error type.
//!
//! Mirrors the error kinds and policy from the storage engine
//! specification: `NotFound` is a normal read outcome (returned as a
//! value, not propagated as an error, wherever the query surface can avoid
//! it); `CodecError` on read collapses to `NotFound` at the query layer but
//! is fatal on write; `StorageFault` and `InconsistentStore` abort the
//! in-progress batch and poison the engine against further writes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The underlying keyed store failed (I/O, corruption, etc.).
    #[error("storage fault: {0}")]
    StorageFault(String),

    /// The requested hash/address/key was not present.
    #[error("not found")]
    NotFound,

    /// A referential-integrity invariant was violated while applying a
    /// block (e.g. a referenced source transaction is missing).
    #[error("inconsistent store: {0}")]
    InconsistentStore(String),

    /// An entity failed to decode, or decoded successfully to the wrong
    /// length/shape.
    #[error("codec error: {0}")]
    CodecError(String),

    /// A long-running query observed a cancellation request.
    #[error("cancelled")]
    Cancelled,
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<rocksdb::Error> for EngineError {
    fn from(e: rocksdb::Error) -> Self {
        EngineError::StorageFault(e.to_string())
    }
}
