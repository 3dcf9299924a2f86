//! Core identifier types for the sync protocol.

use std::fmt::Display;

use dolerite_types::Checksum;
use serde::{Deserialize, Serialize};

// ============================================================================
// OpNumber
// ============================================================================

/// A monotonic operation number naming a position in the replicated log.
///
/// Checkpoints are identified in part by the op number at which they were
/// taken; a higher op number always names a later checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpNumber(u64);

impl OpNumber {
    /// Operation number zero (before any operation).
    pub const ZERO: OpNumber = OpNumber(0);

    /// Creates an operation number.
    pub fn new(op: u64) -> Self {
        Self(op)
    }

    /// Returns the operation number as a u64.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the next operation number.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true if this is operation number zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Display for OpNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ReplicaId
// ============================================================================

/// Unique identifier for a replica within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(u8);

impl ReplicaId {
    /// Creates a replica ID.
    pub fn new(id: u8) -> Self {
        Self(id)
    }

    /// Returns the replica ID as a u8.
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Returns the replica ID as a table index.
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "replica#{}", self.0)
    }
}

// ============================================================================
// CheckpointId
// ============================================================================

/// The identity of a checkpoint: a 128-bit digest over the checkpointed
/// state.
///
/// Two checkpoints with the same id are byte-identical; the id is what a
/// quorum of peers agrees on before a checkpoint may be installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckpointId(Checksum);

impl CheckpointId {
    /// Creates a checkpoint id from its digest.
    pub fn new(digest: Checksum) -> Self {
        Self(digest)
    }

    /// Returns the underlying digest.
    pub fn as_checksum(&self) -> Checksum {
        self.0
    }
}

impl Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Checksum> for CheckpointId {
    fn from(digest: Checksum) -> Self {
        Self(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_number_ordering() {
        assert!(OpNumber::ZERO < OpNumber::new(1));
        assert_eq!(OpNumber::new(7).next(), OpNumber::new(8));
        assert!(OpNumber::ZERO.is_zero());
        assert!(!OpNumber::new(1).is_zero());
    }

    #[test]
    fn replica_id_display() {
        assert_eq!(ReplicaId::new(3).to_string(), "replica#3");
        assert_eq!(ReplicaId::new(3).as_index(), 3);
    }
}
