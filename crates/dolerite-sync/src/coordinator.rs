//! The sync coordination state machine.
//!
//! [`SyncCoordinator`] is the pure core of a replica's state sync. It runs
//! inside the replica event loop, single-threaded and non-blocking: each
//! public operation is a finite amount of work, and the overall sync
//! process suspends between events by parking in a [`Stage`]. The caller
//! (runtime) is responsible for executing the returned [`SyncAction`]s -
//! cancelling the commit pipeline, quiescing the grid, requesting chunks,
//! writing the superblock - and for feeding completions back in as
//! [`SyncEvent`]s.
//!
//! # Data flow
//!
//! ```text
//! heartbeats ──TargetAdvertised──► TargetQuorum
//!                                      │ (quorum reached)
//!                                      ▼
//!                   requesting_target ──► request_trailers
//!                                      │
//! source ──Chunk──► Trailer × 3 ───────┤ (all done + identity fields)
//!                                      ▼
//!                   updating_superblock ──► not_syncing
//! ```

use bytes::Bytes;
use dolerite_types::Checksum;

use crate::config::ClusterConfig;
use crate::message::{TargetAdvertisement, TrailerChunk, TrailerKind};
use crate::stage::{RequestTrailers, Stage, StageTag};
use crate::target::{Target, TargetQuorum};
use crate::types::{CheckpointId, OpNumber, ReplicaId};

// ============================================================================
// Sync Events
// ============================================================================

/// The commit pipeline's state at the moment sync begins.
///
/// Decides how much cancellation work precedes target discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPipelineStatus {
    /// No commit or grid work outstanding.
    Idle,

    /// Only grid I/O is outstanding.
    GridOnly,

    /// The commit pipeline is in an uninterruptible phase.
    Uninterruptible,
}

/// Events that drive the sync coordinator.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The replica has fallen too far behind and must sync.
    Start {
        /// Observed state of the commit pipeline.
        commit: CommitPipelineStatus,
    },

    /// The commit pipeline acknowledged cancellation.
    CommitCancelled,

    /// Grid I/O has quiesced.
    GridCancelled,

    /// A peer advertised its latest checkpoint (from its heartbeat).
    TargetAdvertised {
        /// The advertising peer.
        from: ReplicaId,
        /// The advertised checkpoint.
        advertisement: TargetAdvertisement,
    },

    /// A trailer chunk arrived from the chosen source.
    Chunk(TrailerChunk),

    /// The superblock writer completed a write.
    ///
    /// Carries the identity of the checkpoint that was written so that
    /// completions for superseded targets can be discarded.
    SuperblockWritten {
        /// Checkpoint id of the completed write.
        checkpoint_id: CheckpointId,
        /// Checkpoint op of the completed write.
        checkpoint_op: OpNumber,
    },

    /// Periodic housekeeping; re-issues outstanding requests.
    Tick,
}

// ============================================================================
// Sync Actions
// ============================================================================

/// Requests the coordinator issues to its collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Abort the commit pipeline once it becomes interruptible.
    CancelCommit,

    /// Quiesce outstanding grid I/O.
    CancelGrid,

    /// Fetch the next chunk of a trailer from the sync source.
    RequestTrailerChunk {
        /// The checkpoint whose trailer is being fetched.
        target: Target,
        /// Which trailer.
        trailer: TrailerKind,
        /// First byte still needed.
        offset: u64,
    },

    /// Write the superblock naming the new checkpoint.
    WriteSuperblock {
        /// The checkpoint being installed.
        target: Target,
        /// Assembled block manifest.
        manifest: Bytes,
        /// Assembled free set.
        free_set: Bytes,
        /// Assembled client sessions.
        client_sessions: Bytes,
        /// Identity of the checkpoint preceding the target.
        previous_checkpoint_id: CheckpointId,
        /// Digest of the prepare the target corresponds to.
        checkpoint_op_checksum: Checksum,
    },
}

/// Output produced by processing one event.
///
/// The caller executes the actions in order; none of them block the
/// coordinator.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncOutput {
    /// Requests to collaborators.
    pub actions: Vec<SyncAction>,
}

impl SyncOutput {
    /// Creates an empty output.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates output with the given actions.
    pub fn with_actions(actions: Vec<SyncAction>) -> Self {
        Self { actions }
    }

    /// Returns true if there is nothing to execute.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Merges another output into this one.
    pub fn merge(&mut self, other: SyncOutput) {
        self.actions.extend(other.actions);
    }
}

// ============================================================================
// Trailer Progress
// ============================================================================

/// Fetch progress of one trailer, for the enclosing replica's logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailerProgress {
    /// Which trailer.
    pub trailer: TrailerKind,

    /// First byte not yet received.
    pub next_offset: u64,

    /// Total size, once the first chunk has latched it.
    pub size: Option<u64>,
}

// ============================================================================
// SyncCoordinator
// ============================================================================

/// The state-sync coordination core of one replica.
///
/// Pure and deterministic: takes ownership of itself, processes one event,
/// and returns the new state plus the actions to execute. No I/O, no
/// clocks, no locking.
#[derive(Debug)]
pub struct SyncCoordinator {
    /// This replica's ID.
    replica_id: ReplicaId,

    /// Cluster configuration.
    config: ClusterConfig,

    /// Current sync lifecycle stage.
    stage: Stage,

    /// Latest checkpoint advertisement per peer.
    ///
    /// Lives for the lifetime of the replica; advertisements accrue in
    /// every stage.
    quorum: TargetQuorum,
}

impl SyncCoordinator {
    /// Creates a coordinator in the steady state.
    pub fn new(replica_id: ReplicaId, config: ClusterConfig) -> Self {
        assert!(
            config.contains(replica_id),
            "replica must be in cluster config"
        );
        let quorum = TargetQuorum::new(config.cluster_size());
        Self {
            replica_id,
            config,
            stage: Stage::NotSyncing,
            quorum,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns this replica's ID.
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// Returns the cluster configuration.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Returns the current stage.
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Returns the checkpoint being installed, if a sync has a target.
    pub fn target(&self) -> Option<&Target> {
        self.stage.target()
    }

    /// Returns true if a sync is in progress.
    pub fn is_syncing(&self) -> bool {
        self.stage.tag() != StageTag::NotSyncing
    }

    /// Returns the candidate table.
    pub fn quorum(&self) -> &TargetQuorum {
        &self.quorum
    }

    /// Returns per-trailer fetch progress while trailers are being
    /// fetched; empty in every other stage.
    pub fn progress(&self) -> Vec<TrailerProgress> {
        match &self.stage {
            Stage::RequestTrailers(payload) => TrailerKind::ALL
                .iter()
                .map(|&kind| {
                    let fetch = payload.fetch(kind);
                    TrailerProgress {
                        trailer: kind,
                        next_offset: fetch.next_offset(),
                        size: fetch.total().map(|total| total.size),
                    }
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    // ========================================================================
    // Event Processing (Main Entry Point)
    // ========================================================================

    /// Processes an event and returns the new state and output.
    ///
    /// This is the main entry point. All stage transitions go through this
    /// method; transitions are observable to external code only between
    /// event callbacks.
    pub fn process(self, event: SyncEvent) -> (Self, SyncOutput) {
        match event {
            SyncEvent::Start { commit } => self.on_start(commit),
            SyncEvent::CommitCancelled => self.on_commit_cancelled(),
            SyncEvent::GridCancelled => self.on_grid_cancelled(),
            SyncEvent::TargetAdvertised {
                from,
                advertisement,
            } => self.on_target_advertised(from, advertisement),
            SyncEvent::Chunk(chunk) => self.on_chunk(chunk),
            SyncEvent::SuperblockWritten {
                checkpoint_id,
                checkpoint_op,
            } => self.on_superblock_written(checkpoint_id, checkpoint_op),
            SyncEvent::Tick => self.on_tick(),
        }
    }

    // ========================================================================
    // Entry & Cancellation
    // ========================================================================

    /// Begins a sync, fanning out on the commit pipeline's state.
    fn on_start(mut self, commit: CommitPipelineStatus) -> (Self, SyncOutput) {
        if self.stage.tag() != StageTag::NotSyncing {
            tracing::warn!(
                replica = %self.replica_id,
                stage = %self.stage.tag(),
                "sync start requested while already syncing"
            );
            return (self, SyncOutput::empty());
        }

        match commit {
            CommitPipelineStatus::Uninterruptible => {
                self = self.advance(Stage::CancellingCommit);
                (self, SyncOutput::with_actions(vec![SyncAction::CancelCommit]))
            }
            CommitPipelineStatus::GridOnly => {
                self = self.advance(Stage::CancellingGrid);
                (self, SyncOutput::with_actions(vec![SyncAction::CancelGrid]))
            }
            CommitPipelineStatus::Idle => {
                self = self.advance(Stage::RequestingTarget);
                (self, SyncOutput::empty())
            }
        }
    }

    /// The commit pipeline has been cancelled; grid cancellation follows.
    fn on_commit_cancelled(mut self) -> (Self, SyncOutput) {
        if self.stage.tag() != StageTag::CancellingCommit {
            tracing::warn!(
                replica = %self.replica_id,
                stage = %self.stage.tag(),
                "commit cancellation completed outside cancelling_commit"
            );
            return (self, SyncOutput::empty());
        }
        self = self.advance(Stage::CancellingGrid);
        (self, SyncOutput::with_actions(vec![SyncAction::CancelGrid]))
    }

    /// Grid I/O has quiesced; start polling peers for a target.
    fn on_grid_cancelled(mut self) -> (Self, SyncOutput) {
        if self.stage.tag() != StageTag::CancellingGrid {
            tracing::warn!(
                replica = %self.replica_id,
                stage = %self.stage.tag(),
                "grid cancellation completed outside cancelling_grid"
            );
            return (self, SyncOutput::empty());
        }
        self = self.advance(Stage::RequestingTarget);
        (self, SyncOutput::empty())
    }

    // ========================================================================
    // Target Discovery
    // ========================================================================

    /// Records a peer's checkpoint advertisement and promotes it if it
    /// crosses the quorum threshold.
    fn on_target_advertised(
        mut self,
        from: ReplicaId,
        advertisement: TargetAdvertisement,
    ) -> (Self, SyncOutput) {
        // Ignore advertisements from outside the cluster (and our own).
        if !self.config.contains(from) {
            tracing::warn!(from = %from, "checkpoint advertisement from unknown replica");
            return (self, SyncOutput::empty());
        }
        if from == self.replica_id {
            return (self, SyncOutput::empty());
        }

        let candidate = advertisement.candidate();
        if !self.quorum.replace(from, candidate) {
            return (self, SyncOutput::empty());
        }

        let votes = self.quorum.count(&candidate);
        tracing::debug!(
            from = %from,
            checkpoint_op = %candidate.checkpoint_op,
            checkpoint_id = %candidate.checkpoint_id,
            votes,
            "recorded checkpoint advertisement"
        );
        if votes < self.config.quorum_size() {
            return (self, SyncOutput::empty());
        }

        match self.stage.tag() {
            StageTag::RequestingTarget => {
                let target = candidate.promote();
                tracing::info!(
                    replica = %self.replica_id,
                    checkpoint_op = %target.checkpoint_op,
                    checkpoint_id = %target.checkpoint_id,
                    votes,
                    "canonical sync target promoted"
                );
                self.begin_trailer_fetch(target)
            }
            StageTag::RequestTrailers | StageTag::UpdatingSuperblock => {
                let current = *self
                    .stage
                    .target()
                    .expect("syncing stages carry a target");
                // Only a strictly newer checkpoint supersedes the one in
                // flight; the old superblock write or chunks are abandoned
                // and ignored on arrival (they carry the old identity).
                if candidate.checkpoint_op <= current.checkpoint_op {
                    return (self, SyncOutput::empty());
                }
                let target = candidate.promote();
                tracing::info!(
                    replica = %self.replica_id,
                    old_op = %current.checkpoint_op,
                    new_op = %target.checkpoint_op,
                    "adopting newer sync target mid-flight"
                );
                self.begin_trailer_fetch(target)
            }
            StageTag::NotSyncing | StageTag::CancellingCommit | StageTag::CancellingGrid => {
                // Advertisement recorded for later; no sync to drive yet.
                (self, SyncOutput::empty())
            }
        }
    }

    /// Enters `request_trailers` with a fresh payload for `target`.
    fn begin_trailer_fetch(mut self, target: Target) -> (Self, SyncOutput) {
        let payload = RequestTrailers::new(target);
        let output = Self::request_chunks(&payload);
        self = self.advance(Stage::RequestTrailers(payload));
        (self, output)
    }

    // ========================================================================
    // Trailer Fetch
    // ========================================================================

    /// Applies one trailer chunk.
    fn on_chunk(mut self, chunk: TrailerChunk) -> (Self, SyncOutput) {
        let Stage::RequestTrailers(payload) = &mut self.stage else {
            tracing::debug!(
                trailer = %chunk.trailer,
                stage = %self.stage.tag(),
                "discarding trailer chunk outside request_trailers"
            );
            return (self, SyncOutput::empty());
        };

        if !chunk.matches_target(&payload.target) {
            tracing::debug!(
                trailer = %chunk.trailer,
                chunk_op = %chunk.checkpoint_op,
                target_op = %payload.target.checkpoint_op,
                "discarding trailer chunk for superseded target"
            );
            return (self, SyncOutput::empty());
        }

        let result = payload.fetch_mut(chunk.trailer).write_chunk(
            chunk.size,
            chunk.checksum,
            &chunk.bytes,
            chunk.chunk_offset,
        );
        if let Err(error) = result {
            tracing::error!(
                replica = %self.replica_id,
                trailer = %chunk.trailer,
                %error,
                "trailer chunk failed authentication; abandoning sync attempt"
            );
            return self.abort_attempt();
        }

        // The two checkpoint-identity fields ride the terminating chunk of
        // their trailer: `previous_checkpoint_id` on the free set,
        // `checkpoint_op_checksum` on the client sessions.
        if payload.fetch(chunk.trailer).done() && chunk.is_terminal() {
            let authentic = match chunk.trailer {
                TrailerKind::FreeSet => latch_field(
                    &mut payload.previous_checkpoint_id,
                    chunk.previous_checkpoint_id,
                ),
                TrailerKind::ClientSessions => latch_field(
                    &mut payload.checkpoint_op_checksum,
                    chunk.checkpoint_op_checksum,
                ),
                TrailerKind::Manifest => true,
            };
            if !authentic {
                tracing::error!(
                    replica = %self.replica_id,
                    trailer = %chunk.trailer,
                    "terminating chunk omitted or contradicted its identity field; abandoning sync attempt"
                );
                return self.abort_attempt();
            }
        }

        if !payload.ready_for_superblock() {
            return (self, SyncOutput::empty());
        }

        // All three trailers assembled and both identity fields present:
        // hand everything to the superblock writer.
        let stage = self.stage;
        let Stage::RequestTrailers(payload) = stage else {
            unreachable!("stage checked above");
        };
        let (superblock, trailers) = payload.finish();
        let action = SyncAction::WriteSuperblock {
            target: superblock.target,
            manifest: trailers.manifest,
            free_set: trailers.free_set,
            client_sessions: trailers.client_sessions,
            previous_checkpoint_id: superblock.previous_checkpoint_id,
            checkpoint_op_checksum: superblock.checkpoint_op_checksum,
        };
        self.stage = Stage::advance_from(
            StageTag::RequestTrailers,
            Stage::UpdatingSuperblock(superblock),
        );
        (self, SyncOutput::with_actions(vec![action]))
    }

    /// Abandons the current fetch after a chunk authentication failure.
    ///
    /// A source is lying or corrupted; the target is re-evaluated against
    /// the candidate table's current contents and the fetch restarts with
    /// fresh trailers (requests will be routed to another source by the
    /// requester).
    fn abort_attempt(self) -> (Self, SyncOutput) {
        debug_assert_eq!(self.stage.tag(), StageTag::RequestTrailers);
        let current = *self
            .stage
            .target()
            .expect("aborting stage carries a target");

        let target = match self.quorum.best_with_quorum(self.config.quorum_size()) {
            Some(candidate) => candidate.promote(),
            None => {
                tracing::warn!(
                    replica = %self.replica_id,
                    checkpoint_op = %current.checkpoint_op,
                    "no quorum-confirmed candidate at abort; retrying current target"
                );
                current
            }
        };
        if target != current {
            tracing::info!(
                replica = %self.replica_id,
                old_op = %current.checkpoint_op,
                new_op = %target.checkpoint_op,
                "sync target re-evaluated after failed attempt"
            );
        }
        self.begin_trailer_fetch(target)
    }

    // ========================================================================
    // Superblock Completion
    // ========================================================================

    /// The superblock writer finished a write.
    fn on_superblock_written(
        mut self,
        checkpoint_id: CheckpointId,
        checkpoint_op: OpNumber,
    ) -> (Self, SyncOutput) {
        let Stage::UpdatingSuperblock(payload) = &self.stage else {
            tracing::debug!(
                stage = %self.stage.tag(),
                checkpoint_op = %checkpoint_op,
                "discarding superblock-write completion outside updating_superblock"
            );
            return (self, SyncOutput::empty());
        };

        if payload.target.checkpoint_id != checkpoint_id
            || payload.target.checkpoint_op != checkpoint_op
        {
            // A write started for an earlier target; its result is dead.
            tracing::debug!(
                completed_op = %checkpoint_op,
                target_op = %payload.target.checkpoint_op,
                "discarding superblock-write completion for superseded target"
            );
            return (self, SyncOutput::empty());
        }

        tracing::info!(
            replica = %self.replica_id,
            checkpoint_op = %checkpoint_op,
            checkpoint_id = %checkpoint_id,
            "checkpoint installed; state sync complete"
        );
        self = self.advance(Stage::NotSyncing);
        (self, SyncOutput::empty())
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    /// Re-issues the outstanding requests for the current stage.
    fn on_tick(self) -> (Self, SyncOutput) {
        let output = match &self.stage {
            Stage::RequestTrailers(payload) => Self::request_chunks(payload),
            _ => SyncOutput::empty(),
        };
        (self, output)
    }

    /// Builds a chunk request for every trailer still being assembled.
    fn request_chunks(payload: &RequestTrailers) -> SyncOutput {
        let actions = TrailerKind::ALL
            .iter()
            .filter(|&&kind| !payload.fetch(kind).done())
            .map(|&kind| SyncAction::RequestTrailerChunk {
                target: payload.target,
                trailer: kind,
                offset: payload.fetch(kind).next_offset(),
            })
            .collect();
        SyncOutput::with_actions(actions)
    }

    /// Guarded stage assignment.
    fn advance(mut self, to: Stage) -> Self {
        let stage = self.stage;
        self.stage = stage.advance(to);
        self
    }
}

/// Latches an identity field delivered on a terminating chunk.
///
/// Returns false when the source omitted the field or contradicted a
/// previously delivered value - both authentication failures.
fn latch_field<T: PartialEq + Copy>(slot: &mut Option<T>, delivered: Option<T>) -> bool {
    match (*slot, delivered) {
        (None, Some(value)) => {
            *slot = Some(value);
            true
        }
        (Some(existing), Some(value)) => existing == value,
        (_, None) => false,
    }
}
