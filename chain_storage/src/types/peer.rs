//! Known-peer records for the peer store.

use serde::{Deserialize, Serialize};

/// A network peer observed by the node, as persisted under the `PEER`
/// discriminant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownPeer {
    /// Network address, e.g. `"203.0.113.4:8333"`.
    pub address: String,
    /// Unix timestamp after which this peer is no longer banned.
    pub ban_until: u64,
    /// Preference score; lower sorts first in `get_connectable_peers`.
    pub preference: i32,
    /// Last observed response time, in milliseconds.
    pub response_time_ms: u32,
}

impl KnownPeer {
    pub fn is_banned(&self, now: u64) -> bool {
        self.ban_until > now
    }
}
