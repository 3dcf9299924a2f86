//! Sync lifecycle stages.
//!
//! The replica's sync activity is governed by a six-state tagged lifecycle
//! with a restricted transition graph:
//!
//! ```text
//! not_syncing          → cancelling_commit | cancelling_grid | requesting_target
//! cancelling_commit    → cancelling_grid
//! cancelling_grid      → requesting_target
//! requesting_target    → requesting_target | request_trailers
//! request_trailers     → request_trailers | updating_superblock
//! updating_superblock  → request_trailers | not_syncing
//! ```
//!
//! Each stage carries exactly the payload that exists in that stage:
//! fields unique to later stages are statically unreachable in earlier
//! ones. All stage writes go through [`Stage::advance`], which fail-stops
//! on an edge outside the graph.

use bytes::Bytes;
use dolerite_types::Checksum;
use serde::{Deserialize, Serialize};

use crate::error::{TrailerError, TrailerResult};
use crate::message::TrailerKind;
use crate::target::Target;
use crate::trailer::{Trailer, TrailerDestination, TrailerTotal};
use crate::types::CheckpointId;

// ============================================================================
// StageTag
// ============================================================================

/// The tag of a [`Stage`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageTag {
    /// Steady state.
    NotSyncing,

    /// Commit pipeline in an uninterruptible phase; waiting to abort it.
    CancellingCommit,

    /// Commit aborted; waiting for grid I/O to quiesce.
    CancellingGrid,

    /// Quiesced; polling peers for a canonical target.
    RequestingTarget,

    /// Fetching the three trailers and the two identity fields.
    RequestTrailers,

    /// Trailers complete; superblock write in flight.
    UpdatingSuperblock,
}

impl StageTag {
    /// Returns a stable lowercase name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            StageTag::NotSyncing => "not_syncing",
            StageTag::CancellingCommit => "cancelling_commit",
            StageTag::CancellingGrid => "cancelling_grid",
            StageTag::RequestingTarget => "requesting_target",
            StageTag::RequestTrailers => "request_trailers",
            StageTag::UpdatingSuperblock => "updating_superblock",
        }
    }
}

impl std::fmt::Display for StageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns true if the transition graph permits `from → to`.
///
/// Total over all tag pairs.
pub fn valid_transition(from: StageTag, to: StageTag) -> bool {
    use StageTag::{
        CancellingCommit, CancellingGrid, NotSyncing, RequestTrailers, RequestingTarget,
        UpdatingSuperblock,
    };
    matches!(
        (from, to),
        (NotSyncing, CancellingCommit)
            | (NotSyncing, CancellingGrid)
            | (NotSyncing, RequestingTarget)
            | (CancellingCommit, CancellingGrid)
            | (CancellingGrid, RequestingTarget)
            | (RequestingTarget, RequestingTarget)
            | (RequestingTarget, RequestTrailers)
            | (RequestTrailers, RequestTrailers)
            | (RequestTrailers, UpdatingSuperblock)
            | (UpdatingSuperblock, RequestTrailers)
            | (UpdatingSuperblock, NotSyncing)
    )
}

// ============================================================================
// TrailerFetch
// ============================================================================

/// One in-progress trailer fetch: the assembler plus the destination
/// buffer it borrows.
///
/// The buffer is owned here (by the stage payload) and grown to the
/// latched trailer size when the first chunk arrives; the [`Trailer`]
/// itself never allocates.
#[derive(Debug, Clone, Default)]
pub struct TrailerFetch {
    trailer: Trailer,
    buffer: Vec<u8>,
}

impl TrailerFetch {
    /// Creates an empty fetch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the trailer has been fully assembled and verified.
    pub fn done(&self) -> bool {
        self.trailer.done()
    }

    /// Returns the first byte offset not yet written.
    pub fn next_offset(&self) -> u64 {
        self.trailer.next_offset()
    }

    /// Returns the latched total, if the first chunk has arrived.
    pub fn total(&self) -> Option<TrailerTotal> {
        self.trailer.total()
    }

    /// Applies one chunk; returns true if this call completed the trailer.
    pub fn write_chunk(
        &mut self,
        size: u64,
        checksum: Checksum,
        bytes: &[u8],
        chunk_offset: u64,
    ) -> TrailerResult<bool> {
        // Validate a declared total against the latch before sizing the
        // buffer from it: a lying size must not drive an allocation.
        let observed = TrailerTotal { size, checksum };
        match self.trailer.total() {
            Some(latched) if latched != observed => {
                return Err(TrailerError::TotalMismatch { latched, observed });
            }
            Some(_) => {}
            None => self.buffer.resize(size as usize, 0),
        }

        let destination = TrailerDestination {
            buffer: &mut self.buffer,
            size,
            checksum,
        };
        let assembled = self.trailer.write_chunk(destination, bytes, chunk_offset)?;
        Ok(assembled.is_some())
    }

    /// Consumes the fetch, returning the assembled trailer bytes.
    ///
    /// # Panics
    ///
    /// Panics if the trailer is not done.
    pub fn into_bytes(self) -> Bytes {
        assert!(self.trailer.done(), "trailer bytes taken before assembly completed");
        Bytes::from(self.buffer)
    }
}

// ============================================================================
// Stage payloads
// ============================================================================

/// Payload of [`Stage::RequestTrailers`].
#[derive(Debug)]
pub struct RequestTrailers {
    /// The canonical checkpoint being installed.
    pub target: Target,

    /// Block manifest fetch.
    pub manifest: TrailerFetch,

    /// Free-set fetch.
    pub free_set: TrailerFetch,

    /// Client-sessions fetch.
    pub client_sessions: TrailerFetch,

    /// Identity of the checkpoint preceding the target; arrives with the
    /// free-set trailer's terminating chunk.
    pub previous_checkpoint_id: Option<CheckpointId>,

    /// Digest of the prepare the target corresponds to; arrives with the
    /// client-sessions trailer's terminating chunk.
    pub checkpoint_op_checksum: Option<Checksum>,
}

impl RequestTrailers {
    /// Creates a fresh payload for a newly promoted target.
    pub fn new(target: Target) -> Self {
        Self {
            target,
            manifest: TrailerFetch::new(),
            free_set: TrailerFetch::new(),
            client_sessions: TrailerFetch::new(),
            previous_checkpoint_id: None,
            checkpoint_op_checksum: None,
        }
    }

    /// Returns the fetch for a trailer kind.
    pub fn fetch(&self, kind: TrailerKind) -> &TrailerFetch {
        match kind {
            TrailerKind::Manifest => &self.manifest,
            TrailerKind::FreeSet => &self.free_set,
            TrailerKind::ClientSessions => &self.client_sessions,
        }
    }

    /// Returns the mutable fetch for a trailer kind.
    pub fn fetch_mut(&mut self, kind: TrailerKind) -> &mut TrailerFetch {
        match kind {
            TrailerKind::Manifest => &mut self.manifest,
            TrailerKind::FreeSet => &mut self.free_set,
            TrailerKind::ClientSessions => &mut self.client_sessions,
        }
    }

    /// Returns true if all three trailers are done.
    pub fn all_done(&self) -> bool {
        self.manifest.done() && self.free_set.done() && self.client_sessions.done()
    }

    /// Returns true if the stage may advance to `updating_superblock`:
    /// all three trailers done and both identity fields present.
    pub fn ready_for_superblock(&self) -> bool {
        debug_assert!(
            self.previous_checkpoint_id.is_none() || self.free_set.done(),
            "previous_checkpoint_id cannot precede free-set completion"
        );
        debug_assert!(
            self.checkpoint_op_checksum.is_none() || self.client_sessions.done(),
            "checkpoint_op_checksum cannot precede client-sessions completion"
        );
        self.all_done()
            && self.previous_checkpoint_id.is_some()
            && self.checkpoint_op_checksum.is_some()
    }

    /// Consumes the payload, producing the `updating_superblock` payload
    /// and the three assembled trailers.
    ///
    /// # Panics
    ///
    /// Panics if the payload is not ready (see
    /// [`ready_for_superblock`](Self::ready_for_superblock)).
    pub fn finish(self) -> (UpdatingSuperblock, AssembledTrailers) {
        assert!(
            self.all_done(),
            "superblock update started before all trailers assembled"
        );
        let previous_checkpoint_id = self
            .previous_checkpoint_id
            .expect("free-set trailer done without previous_checkpoint_id");
        let checkpoint_op_checksum = self
            .checkpoint_op_checksum
            .expect("client-sessions trailer done without checkpoint_op_checksum");

        let payload = UpdatingSuperblock {
            target: self.target,
            previous_checkpoint_id,
            checkpoint_op_checksum,
        };
        let trailers = AssembledTrailers {
            manifest: self.manifest.into_bytes(),
            free_set: self.free_set.into_bytes(),
            client_sessions: self.client_sessions.into_bytes(),
        };
        (payload, trailers)
    }
}

/// The three assembled, digest-verified trailers handed to the superblock
/// writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledTrailers {
    /// Block manifest bytes.
    pub manifest: Bytes,

    /// Free-set bytes.
    pub free_set: Bytes,

    /// Client-sessions bytes.
    pub client_sessions: Bytes,
}

/// Payload of [`Stage::UpdatingSuperblock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatingSuperblock {
    /// The canonical checkpoint being installed.
    pub target: Target,

    /// Identity of the checkpoint preceding the target.
    pub previous_checkpoint_id: CheckpointId,

    /// Digest of the prepare the target corresponds to.
    pub checkpoint_op_checksum: Checksum,
}

// ============================================================================
// Stage
// ============================================================================

/// The replica's sync lifecycle stage, with per-stage payload.
#[derive(Debug)]
pub enum Stage {
    /// Steady state.
    NotSyncing,

    /// Commit pipeline in an uninterruptible phase; waiting to abort it.
    CancellingCommit,

    /// Commit aborted; waiting for grid I/O to quiesce.
    CancellingGrid,

    /// Quiesced; polling peers for a canonical target.
    RequestingTarget,

    /// Fetching the three trailers and the two identity fields.
    RequestTrailers(RequestTrailers),

    /// Trailers complete; superblock write in flight.
    UpdatingSuperblock(UpdatingSuperblock),
}

impl Stage {
    /// Returns the tag of this stage.
    pub fn tag(&self) -> StageTag {
        match self {
            Stage::NotSyncing => StageTag::NotSyncing,
            Stage::CancellingCommit => StageTag::CancellingCommit,
            Stage::CancellingGrid => StageTag::CancellingGrid,
            Stage::RequestingTarget => StageTag::RequestingTarget,
            Stage::RequestTrailers(_) => StageTag::RequestTrailers,
            Stage::UpdatingSuperblock(_) => StageTag::UpdatingSuperblock,
        }
    }

    /// Returns the checkpoint being installed, if a sync has a target.
    ///
    /// This is the only read path external components use to learn which
    /// checkpoint is being installed.
    pub fn target(&self) -> Option<&Target> {
        match self {
            Stage::RequestTrailers(payload) => Some(&payload.target),
            Stage::UpdatingSuperblock(payload) => Some(&payload.target),
            Stage::NotSyncing
            | Stage::CancellingCommit
            | Stage::CancellingGrid
            | Stage::RequestingTarget => None,
        }
    }

    /// Guarded stage assignment.
    ///
    /// # Panics
    ///
    /// Fail-stops on an edge outside the transition graph; attempting one
    /// is a programming error.
    pub fn advance(self, to: Stage) -> Stage {
        Stage::advance_from(self.tag(), to)
    }

    /// Guarded stage assignment when the previous stage's payload has
    /// already been consumed (only its tag remains).
    pub fn advance_from(from: StageTag, to: Stage) -> Stage {
        assert!(
            valid_transition(from, to.tag()),
            "invalid stage transition: {from} -> {}",
            to.tag()
        );
        tracing::info!(from = %from, to = %to.tag(), "sync stage transition");
        to
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use dolerite_crypto::checksum_128;
    use crate::types::OpNumber;

    const TAGS: [StageTag; 6] = [
        StageTag::NotSyncing,
        StageTag::CancellingCommit,
        StageTag::CancellingGrid,
        StageTag::RequestingTarget,
        StageTag::RequestTrailers,
        StageTag::UpdatingSuperblock,
    ];

    fn target() -> Target {
        Target::new(
            CheckpointId::new(Checksum::from_bytes([0xaa; 16])),
            OpNumber::new(10),
        )
    }

    #[test]
    fn transition_closure() {
        use StageTag::{
            CancellingCommit, CancellingGrid, NotSyncing, RequestTrailers, RequestingTarget,
            UpdatingSuperblock,
        };
        let allowed = [
            (NotSyncing, CancellingCommit),
            (NotSyncing, CancellingGrid),
            (NotSyncing, RequestingTarget),
            (CancellingCommit, CancellingGrid),
            (CancellingGrid, RequestingTarget),
            (RequestingTarget, RequestingTarget),
            (RequestingTarget, RequestTrailers),
            (RequestTrailers, RequestTrailers),
            (RequestTrailers, UpdatingSuperblock),
            (UpdatingSuperblock, RequestTrailers),
            (UpdatingSuperblock, NotSyncing),
        ];

        for from in TAGS {
            for to in TAGS {
                assert_eq!(
                    valid_transition(from, to),
                    allowed.contains(&(from, to)),
                    "transition {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn target_visible_only_with_payload() {
        assert!(Stage::NotSyncing.target().is_none());
        assert!(Stage::CancellingCommit.target().is_none());
        assert!(Stage::CancellingGrid.target().is_none());
        assert!(Stage::RequestingTarget.target().is_none());

        let stage = Stage::RequestTrailers(RequestTrailers::new(target()));
        assert_eq!(stage.target(), Some(&target()));

        let stage = Stage::UpdatingSuperblock(UpdatingSuperblock {
            target: target(),
            previous_checkpoint_id: CheckpointId::new(Checksum::from_bytes([0xbb; 16])),
            checkpoint_op_checksum: Checksum::from_bytes([0xcc; 16]),
        });
        assert_eq!(stage.target(), Some(&target()));
    }

    #[test]
    #[should_panic(expected = "invalid stage transition")]
    fn illegal_edge_fail_stops() {
        let _ = Stage::NotSyncing.advance(Stage::UpdatingSuperblock(UpdatingSuperblock {
            target: target(),
            previous_checkpoint_id: CheckpointId::new(Checksum::ZERO),
            checkpoint_op_checksum: Checksum::ZERO,
        }));
    }

    #[test]
    fn trailer_fetch_grows_buffer_and_completes() {
        let content = b"free set bytes".to_vec();
        let checksum = checksum_128(&content);
        let mut fetch = TrailerFetch::new();

        assert!(!fetch
            .write_chunk(content.len() as u64, checksum, &content[..4], 0)
            .expect("prefix accepted"));
        assert_eq!(fetch.next_offset(), 4);

        assert!(fetch
            .write_chunk(content.len() as u64, checksum, &content[4..], 4)
            .expect("remainder accepted"));
        assert!(fetch.done());
        assert_eq!(fetch.into_bytes(), Bytes::from(content));
    }

    #[test]
    fn trailer_fetch_rejects_lying_size_without_allocating() {
        let content = b"manifest".to_vec();
        let checksum = checksum_128(&content);
        let mut fetch = TrailerFetch::new();

        fetch
            .write_chunk(content.len() as u64, checksum, &content[..4], 0)
            .expect("prefix accepted");

        let err = fetch
            .write_chunk(u64::MAX, checksum, &content[4..], 4)
            .unwrap_err();
        assert!(matches!(err, TrailerError::TotalMismatch { .. }));
    }

    #[test]
    fn ready_for_superblock_requires_fields() {
        let mut payload = RequestTrailers::new(target());

        for kind in TrailerKind::ALL {
            let content = kind.name().as_bytes();
            let completed = payload
                .fetch_mut(kind)
                .write_chunk(content.len() as u64, checksum_128(content), content, 0)
                .expect("assembly");
            assert!(completed);
        }
        assert!(payload.all_done());
        assert!(!payload.ready_for_superblock());

        payload.previous_checkpoint_id = Some(CheckpointId::new(Checksum::from_bytes([1; 16])));
        assert!(!payload.ready_for_superblock());

        payload.checkpoint_op_checksum = Some(Checksum::from_bytes([2; 16]));
        assert!(payload.ready_for_superblock());

        let (superblock, trailers) = payload.finish();
        assert_eq!(superblock.target, target());
        assert_eq!(trailers.manifest, Bytes::from_static(b"manifest"));
        assert_eq!(trailers.free_set, Bytes::from_static(b"free_set"));
        assert_eq!(trailers.client_sessions, Bytes::from_static(b"client_sessions"));
    }
}
