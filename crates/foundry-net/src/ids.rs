//! Identifiers shared by the transport and the replication core.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a peer in the session. Assigned by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u64);

impl PlayerId {
    /// Sentinel for "no player", e.g. the owner of an entity not yet in the graph.
    pub const NONE: Self = Self(u64::MAX);

    /// Returns `false` for [`PlayerId::NONE`].
    pub fn is_some(self) -> bool {
        self != Self::NONE
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_some() {
            write!(f, "player#{}", self.0)
        } else {
            f.write_str("player#none")
        }
    }
}

/// Session-scoped entity identifier. Ephemeral: reassigned on reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkId(pub u64);

impl NetworkId {
    /// Sentinel for an entity that has not been bound by the session authority.
    pub const INVALID: Self = Self(0);

    /// Returns `false` for [`NetworkId::INVALID`].
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net#{}", self.0)
    }
}
