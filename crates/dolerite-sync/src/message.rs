//! Sync protocol payloads.
//!
//! This module defines the payload semantics the sync core consumes and
//! produces. On-wire framing, routing, and authentication belong to the
//! transport; the core sees only these records:
//!
//! - [`TargetAdvertisement`] - Peer → All: my latest checkpoint (carried in
//!   periodic heartbeats).
//! - [`TrailerChunk`] - Source → Syncing replica: one bounded slice of a
//!   checkpoint trailer, with the trailer's total size and checksum.
//!
//! A chunk of the free-set trailer additionally carries
//! `previous_checkpoint_id` on its terminating chunk, and a chunk of the
//! client-sessions trailer carries `checkpoint_op_checksum` on its
//! terminating chunk. These two fields ride the trailer protocol because
//! they identify, respectively, the checkpoint preceding the target (the
//! superblock maintains a checkpoint chain) and the log prepare the target
//! corresponds to (replay starts from it).

use bytes::Bytes;
use dolerite_types::Checksum;
use serde::{Deserialize, Serialize};

use crate::target::Target;
use crate::types::{CheckpointId, OpNumber};

/// Maximum payload a message body carries, in bytes.
///
/// Trailer sizes are unbounded; anything larger than this must be fetched
/// as multiple chunks.
pub const CHUNK_SIZE_MAX: usize = 64 * 1024;

// ============================================================================
// TrailerKind
// ============================================================================

/// The three checkpoint trailers fetched during sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrailerKind {
    /// Block manifest of the checkpointed grid.
    Manifest,

    /// Free set of grid block indices.
    FreeSet,

    /// Client session table at the checkpoint.
    ClientSessions,
}

impl TrailerKind {
    /// All trailer kinds, in fetch order.
    pub const ALL: [TrailerKind; 3] = [
        TrailerKind::Manifest,
        TrailerKind::FreeSet,
        TrailerKind::ClientSessions,
    ];

    /// Returns a stable lowercase name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            TrailerKind::Manifest => "manifest",
            TrailerKind::FreeSet => "free_set",
            TrailerKind::ClientSessions => "client_sessions",
        }
    }
}

impl std::fmt::Display for TrailerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// TargetAdvertisement
// ============================================================================

/// Peer → All: the latest checkpoint this peer has installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAdvertisement {
    /// Digest over the advertised checkpoint's state.
    pub checkpoint_id: CheckpointId,

    /// The log position at which the advertised checkpoint was taken.
    pub checkpoint_op: OpNumber,
}

impl TargetAdvertisement {
    /// Creates an advertisement.
    pub fn new(checkpoint_id: CheckpointId, checkpoint_op: OpNumber) -> Self {
        Self {
            checkpoint_id,
            checkpoint_op,
        }
    }

    /// Returns the advertised checkpoint as an unconfirmed candidate.
    pub fn candidate(&self) -> crate::target::TargetCandidate {
        crate::target::TargetCandidate::new(self.checkpoint_id, self.checkpoint_op)
    }
}

// ============================================================================
// TrailerChunk
// ============================================================================

/// Source → Syncing replica: one bounded slice of a checkpoint trailer.
///
/// Every chunk names the target it belongs to and repeats the trailer's
/// total `(size, checksum)`; the receiver latches the total on the first
/// chunk and rejects any later contradiction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailerChunk {
    /// Which trailer this chunk belongs to.
    pub trailer: TrailerKind,

    /// Identity of the checkpoint the trailer belongs to.
    pub checkpoint_id: CheckpointId,

    /// Op number of the checkpoint the trailer belongs to.
    pub checkpoint_op: OpNumber,

    /// Total size of the trailer in bytes.
    pub size: u64,

    /// Digest over the complete trailer.
    pub checksum: Checksum,

    /// Offset of this chunk within the trailer.
    pub chunk_offset: u64,

    /// The chunk payload, at most [`CHUNK_SIZE_MAX`] bytes.
    pub bytes: Bytes,

    /// Identity of the checkpoint preceding the target.
    ///
    /// Present only on the terminating chunk of the free-set trailer.
    pub previous_checkpoint_id: Option<CheckpointId>,

    /// Digest of the log prepare the target checkpoint corresponds to.
    ///
    /// Present only on the terminating chunk of the client-sessions
    /// trailer.
    pub checkpoint_op_checksum: Option<Checksum>,
}

impl TrailerChunk {
    /// Creates a chunk of a trailer belonging to `target`.
    ///
    /// # Panics
    ///
    /// Panics if the payload exceeds [`CHUNK_SIZE_MAX`] or the chunk lies
    /// outside the declared trailer size. Sources construct chunks from
    /// data they hold, so these are programming errors.
    pub fn new(
        trailer: TrailerKind,
        target: Target,
        size: u64,
        checksum: Checksum,
        chunk_offset: u64,
        bytes: Bytes,
    ) -> Self {
        assert!(
            bytes.len() <= CHUNK_SIZE_MAX,
            "chunk of {} bytes exceeds CHUNK_SIZE_MAX ({CHUNK_SIZE_MAX})",
            bytes.len()
        );
        assert!(
            chunk_offset + bytes.len() as u64 <= size,
            "chunk [{chunk_offset}, {chunk_offset}+{}) lies outside trailer of {size} bytes",
            bytes.len()
        );
        Self {
            trailer,
            checkpoint_id: target.checkpoint_id,
            checkpoint_op: target.checkpoint_op,
            size,
            checksum,
            chunk_offset,
            bytes,
            previous_checkpoint_id: None,
            checkpoint_op_checksum: None,
        }
    }

    /// Attaches the previous-checkpoint identity to a terminating free-set
    /// chunk.
    pub fn with_previous_checkpoint_id(mut self, previous: CheckpointId) -> Self {
        assert_eq!(
            self.trailer,
            TrailerKind::FreeSet,
            "previous_checkpoint_id travels on the free-set trailer"
        );
        assert!(self.is_terminal(), "identity fields travel on the terminating chunk");
        self.previous_checkpoint_id = Some(previous);
        self
    }

    /// Attaches the checkpoint-op digest to a terminating client-sessions
    /// chunk.
    pub fn with_checkpoint_op_checksum(mut self, op_checksum: Checksum) -> Self {
        assert_eq!(
            self.trailer,
            TrailerKind::ClientSessions,
            "checkpoint_op_checksum travels on the client-sessions trailer"
        );
        assert!(self.is_terminal(), "identity fields travel on the terminating chunk");
        self.checkpoint_op_checksum = Some(op_checksum);
        self
    }

    /// Returns true if this chunk ends exactly at the trailer size.
    pub fn is_terminal(&self) -> bool {
        self.chunk_offset + self.bytes.len() as u64 == self.size
    }

    /// Returns true if this chunk belongs to the given target.
    pub fn matches_target(&self, target: &Target) -> bool {
        self.checkpoint_id == target.checkpoint_id && self.checkpoint_op == target.checkpoint_op
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target::new(
            CheckpointId::new(Checksum::from_bytes([0xaa; 16])),
            OpNumber::new(10),
        )
    }

    #[test]
    fn terminal_detection() {
        let chunk = TrailerChunk::new(
            TrailerKind::Manifest,
            target(),
            8,
            Checksum::ZERO,
            6,
            Bytes::from_static(&[7, 8]),
        );
        assert!(chunk.is_terminal());

        let chunk = TrailerChunk::new(
            TrailerKind::Manifest,
            target(),
            8,
            Checksum::ZERO,
            0,
            Bytes::from_static(&[1, 2]),
        );
        assert!(!chunk.is_terminal());
    }

    #[test]
    fn target_matching() {
        let chunk = TrailerChunk::new(
            TrailerKind::FreeSet,
            target(),
            4,
            Checksum::ZERO,
            0,
            Bytes::from_static(&[1, 2, 3, 4]),
        );
        assert!(chunk.matches_target(&target()));

        let other = Target::new(
            CheckpointId::new(Checksum::from_bytes([0xbb; 16])),
            OpNumber::new(10),
        );
        assert!(!chunk.matches_target(&other));
    }

    #[test]
    #[should_panic(expected = "lies outside trailer")]
    fn chunk_outside_trailer_rejected() {
        TrailerChunk::new(
            TrailerKind::Manifest,
            target(),
            4,
            Checksum::ZERO,
            3,
            Bytes::from_static(&[1, 2]),
        );
    }

    #[test]
    fn advertisement_to_candidate() {
        let advert = TargetAdvertisement::new(
            CheckpointId::new(Checksum::from_bytes([0xcc; 16])),
            OpNumber::new(42),
        );
        let candidate = advert.candidate();
        assert_eq!(candidate.checkpoint_id, advert.checkpoint_id);
        assert_eq!(candidate.checkpoint_op, advert.checkpoint_op);
    }
}
