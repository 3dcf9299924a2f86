//! Canonical-checkpoint discovery.
//!
//! A replica that has fallen behind must install a checkpoint confirmed by a
//! quorum of its peers. Peers advertise their latest checkpoint in periodic
//! heartbeats; [`TargetQuorum`] tracks the most recent advertisement per
//! peer and answers how many peers currently advertise a given candidate.
//!
//! [`TargetCandidate`] and [`Target`] are structurally identical but
//! nominally distinct: a candidate has not been shown canonical by quorum,
//! and the only bridge between the two types is
//! [`TargetCandidate::promote`]. Code that installs checkpoints takes
//! `Target`, so an unconfirmed candidate can never reach it by accident.

use serde::{Deserialize, Serialize};

use crate::types::{CheckpointId, OpNumber, ReplicaId};

// ============================================================================
// Target
// ============================================================================

/// A canonical checkpoint the replica intends to install.
///
/// Immutable once constructed. Within the sync core, values of this type
/// only arise through [`TargetCandidate::promote`] after a quorum check;
/// the public constructor exists for collaborators reporting back a target
/// identity (superblock-write completions) and for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Digest over the checkpointed state.
    pub checkpoint_id: CheckpointId,

    /// The log position at which the checkpoint was taken.
    pub checkpoint_op: OpNumber,
}

impl Target {
    /// Creates a target from a known-canonical checkpoint identity.
    pub fn new(checkpoint_id: CheckpointId, checkpoint_op: OpNumber) -> Self {
        Self {
            checkpoint_id,
            checkpoint_op,
        }
    }
}

// ============================================================================
// TargetCandidate
// ============================================================================

/// A checkpoint a peer has advertised, not yet confirmed by quorum.
///
/// Structurally identical to [`Target`]; the distinct type is a correctness
/// device, not a data difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCandidate {
    /// Digest over the checkpointed state.
    pub checkpoint_id: CheckpointId,

    /// The log position at which the checkpoint was taken.
    pub checkpoint_op: OpNumber,
}

impl TargetCandidate {
    /// Creates a candidate from a peer advertisement.
    pub fn new(checkpoint_id: CheckpointId, checkpoint_op: OpNumber) -> Self {
        Self {
            checkpoint_id,
            checkpoint_op,
        }
    }

    /// Promotes this candidate to a canonical target.
    ///
    /// The caller must have just observed the candidate crossing the quorum
    /// threshold in a [`TargetQuorum`]; promotion itself performs no check.
    pub fn promote(self) -> Target {
        Target {
            checkpoint_id: self.checkpoint_id,
            checkpoint_op: self.checkpoint_op,
        }
    }
}

// ============================================================================
// TargetQuorum
// ============================================================================

/// Per-replica table of the most recent checkpoint each peer advertised.
///
/// One optional slot per replica index, so each peer contributes at most
/// one vote regardless of how often it advertises. Created empty at process
/// start and kept for the lifetime of the replica.
#[derive(Debug, Clone)]
pub struct TargetQuorum {
    slots: Vec<Option<TargetCandidate>>,
}

impl TargetQuorum {
    /// Creates an empty table with one slot per cluster replica.
    pub fn new(cluster_size: usize) -> Self {
        assert!(cluster_size > 0, "cluster must have at least one replica");
        Self {
            slots: vec![None; cluster_size],
        }
    }

    /// Records a peer's advertisement, replacing its previous one.
    ///
    /// Replacement is monotone in op number: a candidate with a smaller op
    /// than the stored one is rejected as a stale advertisement, and a
    /// candidate equal in both fields is rejected as a duplicate. A
    /// candidate with the same op but a different id overwrites - the peer
    /// has diverged or corrected itself, and the table must reflect its
    /// current claim. Safety comes from the quorum count, not from any
    /// single slot.
    ///
    /// Returns true if the slot was updated.
    pub fn replace(&mut self, replica: ReplicaId, candidate: TargetCandidate) -> bool {
        assert!(
            replica.as_index() < self.slots.len(),
            "{replica} outside candidate table of {} slots",
            self.slots.len()
        );
        let slot = &mut self.slots[replica.as_index()];

        match slot {
            None => {
                *slot = Some(candidate);
                true
            }
            Some(existing) => {
                if candidate.checkpoint_op < existing.checkpoint_op {
                    tracing::debug!(
                        replica = %replica,
                        stored_op = %existing.checkpoint_op,
                        advertised_op = %candidate.checkpoint_op,
                        "stale checkpoint advertisement ignored"
                    );
                    return false;
                }
                if candidate == *existing {
                    return false;
                }
                if candidate.checkpoint_op == existing.checkpoint_op {
                    tracing::warn!(
                        replica = %replica,
                        checkpoint_op = %candidate.checkpoint_op,
                        old_id = %existing.checkpoint_id,
                        new_id = %candidate.checkpoint_id,
                        "peer changed checkpoint id at the same op"
                    );
                }
                *slot = Some(candidate);
                true
            }
        }
    }

    /// Returns how many peers currently advertise exactly this candidate.
    ///
    /// Matching is by `(checkpoint_op, checkpoint_id)`; the caller compares
    /// the count against the cluster quorum threshold to decide promotion.
    pub fn count(&self, candidate: &TargetCandidate) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|stored| {
                let matches = stored.checkpoint_op == candidate.checkpoint_op
                    && stored.checkpoint_id == candidate.checkpoint_id;
                if matches {
                    debug_assert_eq!(*stored, candidate, "matching candidate differs in a field");
                }
                matches
            })
            .count()
    }

    /// Returns the stored candidate for a replica, if any.
    pub fn get(&self, replica: ReplicaId) -> Option<&TargetCandidate> {
        self.slots[replica.as_index()].as_ref()
    }

    /// Returns the highest-op candidate currently confirmed by `quorum`
    /// peers, if any.
    ///
    /// Used when a sync attempt is aborted and the target must be
    /// re-evaluated from the table's current contents.
    pub fn best_with_quorum(&self, quorum: usize) -> Option<TargetCandidate> {
        self.slots
            .iter()
            .flatten()
            .filter(|candidate| self.count(*candidate) >= quorum)
            .max_by_key(|candidate| candidate.checkpoint_op)
            .copied()
    }
}
