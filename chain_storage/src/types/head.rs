//! Persisted chain-head records.

use serde::{Deserialize, Serialize};

/// A persisted chain head: a 64-bit id, its cumulative chain-work, the
/// height of its tip, and (for heads forked off another head) the id of
/// the head it branched from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    pub id: u64,
    pub chain_work: u128,
    pub height: u64,
    pub previous_head: Option<u64>,
}

impl Head {
    pub fn genesis(id: u64) -> Self {
        Head {
            id,
            chain_work: 0,
            height: 0,
            previous_head: None,
        }
    }
}
