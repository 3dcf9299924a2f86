//! Error types for the sync core.

use dolerite_types::Checksum;
use thiserror::Error;

use crate::trailer::TrailerTotal;

/// Trailer chunk authentication failures.
///
/// Every variant means the chunk source is lying or corrupted: the sync
/// attempt that produced it must be abandoned and the target re-evaluated.
/// None of these are retried at the trailer level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrailerError {
    /// The assembled byte sequence does not digest to the latched checksum.
    #[error("assembled trailer digest {actual} does not match expected {expected}")]
    ChecksumMismatch {
        /// The checksum latched from the first chunk.
        expected: Checksum,
        /// The digest actually computed over the assembled bytes.
        actual: Checksum,
    },

    /// A chunk declared a total `(size, checksum)` contradicting the one
    /// latched on the first chunk.
    #[error("chunk declares total {observed:?} but trailer latched {latched:?}")]
    TotalMismatch {
        /// The total latched on the first chunk.
        latched: TrailerTotal,
        /// The contradictory total on this chunk.
        observed: TrailerTotal,
    },

    /// A past chunk is not a byte-identical duplicate of what the buffer
    /// already holds at its range.
    #[error("past chunk at offset {offset} ({len} bytes) disagrees with previously written bytes")]
    DuplicateMismatch {
        /// Offset of the offending chunk.
        offset: u64,
        /// Length of the offending chunk.
        len: usize,
    },

    /// A past chunk extends beyond the write frontier.
    #[error("past chunk at offset {offset} ({len} bytes) extends past the write frontier {next_offset}")]
    PastChunkOverrun {
        /// Offset of the offending chunk.
        offset: u64,
        /// Length of the offending chunk.
        len: usize,
        /// The first byte not yet written.
        next_offset: u64,
    },

    /// An in-order chunk extends beyond the latched trailer size.
    #[error("chunk at offset {offset} ({len} bytes) extends past the trailer size {size}")]
    SizeOverrun {
        /// Offset of the offending chunk.
        offset: u64,
        /// Length of the offending chunk.
        len: usize,
        /// The latched trailer size.
        size: u64,
    },
}

/// Result type for trailer operations.
pub type TrailerResult<T> = std::result::Result<T, TrailerError>;
