//! Chunked authenticated trailer assembly.
//!
//! A checkpoint's trailers exceed the maximum message body, so they are
//! fetched as bounded chunks. [`Trailer`] reconstructs one trailer from
//! chunks that may arrive out of order, duplicated, or stale: it writes
//! strictly in order, tolerates byte-identical duplicates, discards future
//! chunks (the requester re-asks), and releases the assembled bytes exactly
//! once - after the whole sequence digests to the checksum latched from the
//! first chunk.
//!
//! The trailer never allocates. The destination buffer belongs to the
//! caller and is borrowed only for the duration of each
//! [`write_chunk`](Trailer::write_chunk) call.

use dolerite_crypto::checksum_128;
use dolerite_types::Checksum;
use serde::{Deserialize, Serialize};

use crate::error::{TrailerError, TrailerResult};
use crate::message::CHUNK_SIZE_MAX;

// ============================================================================
// TrailerTotal
// ============================================================================

/// The expected extent of a trailer, latched from the first chunk.
///
/// Immutable once latched: every subsequent chunk must present the same
/// pair, and a contradiction is an authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailerTotal {
    /// Total size of the trailer in bytes.
    pub size: u64,

    /// Digest over the complete trailer.
    pub checksum: Checksum,
}

// ============================================================================
// TrailerDestination
// ============================================================================

/// The caller-owned buffer a chunk is written into, together with the
/// trailer total the chunk's message declared.
///
/// The same buffer must back every call for a given trailer; presenting a
/// different buffer once the total is latched is a programming error (the
/// total-equality check catches a different extent, and the duplicate
/// check catches differing contents).
pub struct TrailerDestination<'a> {
    /// Destination for the assembled trailer; capacity must cover `size`.
    pub buffer: &'a mut [u8],

    /// Total trailer size declared by the chunk's message.
    pub size: u64,

    /// Trailer checksum declared by the chunk's message.
    pub checksum: Checksum,
}

// ============================================================================
// Trailer
// ============================================================================

/// A resumable receiver for one oversized authenticated byte sequence.
#[derive(Debug, Clone, Default)]
pub struct Trailer {
    /// The first byte not yet written.
    next_offset: u64,

    /// Set when the assembled buffer has been released; no further writes
    /// are accepted.
    done: bool,

    /// The expected `(size, checksum)`, latched on the first chunk.
    total: Option<TrailerTotal>,
}

impl Trailer {
    /// Creates an empty trailer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the trailer has been fully assembled and verified.
    pub fn done(&self) -> bool {
        self.done
    }

    /// Returns the first byte offset not yet written.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Returns the latched total, if the first chunk has arrived.
    pub fn total(&self) -> Option<TrailerTotal> {
        self.total
    }

    /// Applies one chunk to the destination buffer.
    ///
    /// Returns `Ok(Some(assembled))` exactly once: on the call that writes
    /// the final byte and passes the digest check. Every other successful
    /// call returns `Ok(None)` - including duplicate and future chunks,
    /// which are discarded without effect.
    ///
    /// An `Err` means the chunk source is lying or corrupted; the caller
    /// must abandon the sync attempt that produced the chunk.
    ///
    /// # Panics
    ///
    /// Panics if the chunk exceeds [`CHUNK_SIZE_MAX`] or the destination
    /// buffer cannot hold the declared size. Both are caller bugs, not
    /// source misbehavior.
    pub fn write_chunk<'a>(
        &mut self,
        destination: TrailerDestination<'a>,
        bytes: &[u8],
        chunk_offset: u64,
    ) -> TrailerResult<Option<&'a [u8]>> {
        assert!(
            destination.size as usize <= destination.buffer.len(),
            "destination buffer of {} bytes cannot hold trailer of {} bytes",
            destination.buffer.len(),
            destination.size
        );

        if self.done {
            // Terminal: the assembled value was already released once.
            return Ok(None);
        }

        assert!(
            bytes.len() <= CHUNK_SIZE_MAX,
            "chunk of {} bytes exceeds CHUNK_SIZE_MAX ({CHUNK_SIZE_MAX})",
            bytes.len()
        );

        let observed = TrailerTotal {
            size: destination.size,
            checksum: destination.checksum,
        };
        let total = match self.total {
            None => {
                assert_eq!(self.next_offset, 0, "first chunk arrived after writes");
                self.total = Some(observed);
                observed
            }
            Some(latched) => {
                if latched != observed {
                    return Err(TrailerError::TotalMismatch { latched, observed });
                }
                latched
            }
        };

        let len = bytes.len() as u64;
        let buffer = destination.buffer;

        match chunk_offset.cmp(&self.next_offset) {
            std::cmp::Ordering::Greater => {
                // Future chunk: prerequisites have not arrived yet. The
                // requester re-asks on its own schedule.
                tracing::debug!(
                    chunk_offset,
                    next_offset = self.next_offset,
                    "discarding future trailer chunk"
                );
                Ok(None)
            }
            std::cmp::Ordering::Less => {
                // Past chunk: must be a byte-identical duplicate of what
                // the buffer already holds, entirely below the frontier.
                if chunk_offset + len > self.next_offset {
                    return Err(TrailerError::PastChunkOverrun {
                        offset: chunk_offset,
                        len: bytes.len(),
                        next_offset: self.next_offset,
                    });
                }
                let start = chunk_offset as usize;
                if &buffer[start..start + bytes.len()] != bytes {
                    return Err(TrailerError::DuplicateMismatch {
                        offset: chunk_offset,
                        len: bytes.len(),
                    });
                }
                Ok(None)
            }
            std::cmp::Ordering::Equal => {
                if chunk_offset + len > total.size {
                    return Err(TrailerError::SizeOverrun {
                        offset: chunk_offset,
                        len: bytes.len(),
                        size: total.size,
                    });
                }

                let start = chunk_offset as usize;
                buffer[start..start + bytes.len()].copy_from_slice(bytes);
                self.next_offset += len;
                debug_assert!(self.next_offset <= total.size);

                if self.next_offset < total.size {
                    return Ok(None);
                }

                // Final chunk: authenticate the whole sequence before
                // releasing it.
                let assembled = &buffer[..total.size as usize];
                let actual = checksum_128(assembled);
                if actual != total.checksum {
                    return Err(TrailerError::ChecksumMismatch {
                        expected: total.checksum,
                        actual,
                    });
                }

                self.done = true;
                tracing::debug!(size = total.size, "trailer assembled and verified");
                Ok(Some(assembled))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn destination<'a>(buffer: &'a mut [u8], content: &[u8]) -> TrailerDestination<'a> {
        TrailerDestination {
            buffer,
            size: content.len() as u64,
            checksum: checksum_128(content),
        }
    }

    #[test]
    fn in_order_assembly_one_byte_chunks() {
        let content = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut buffer = [0u8; 8];
        let mut trailer = Trailer::new();

        for offset in 0..7u64 {
            let chunk = [content[offset as usize]];
            let result = trailer
                .write_chunk(destination(&mut buffer, &content), &chunk, offset)
                .expect("in-order chunk accepted");
            assert!(result.is_none(), "no assembly before the final byte");
        }

        let result = trailer
            .write_chunk(destination(&mut buffer, &content), &[content[7]], 7)
            .expect("final chunk accepted");
        assert_eq!(result, Some(&content[..]));
        assert!(trailer.done());
    }

    #[test]
    fn all_at_once_assembly() {
        let content = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut buffer = [0u8; 8];
        let mut trailer = Trailer::new();

        let result = trailer
            .write_chunk(destination(&mut buffer, &content), &content, 0)
            .expect("single chunk accepted");
        assert_eq!(result, Some(&content[..]));
    }

    #[test]
    fn duplicate_prefix_is_idempotent() {
        let content = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut buffer = [0u8; 8];
        let mut trailer = Trailer::new();

        for _ in 0..2 {
            let result = trailer
                .write_chunk(destination(&mut buffer, &content), &content[..2], 0)
                .expect("duplicate prefix accepted");
            assert!(result.is_none());
            assert_eq!(trailer.next_offset(), 2);
        }

        let result = trailer
            .write_chunk(destination(&mut buffer, &content), &content[2..], 2)
            .expect("remainder accepted");
        assert_eq!(result, Some(&content[..]));
    }

    #[test]
    fn future_chunk_discarded_until_prerequisites_arrive() {
        let content = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut buffer = [0u8; 8];
        let mut trailer = Trailer::new();

        // Premature tail: discarded, frontier unchanged.
        let result = trailer
            .write_chunk(destination(&mut buffer, &content), &content[6..], 6)
            .expect("future chunk tolerated");
        assert!(result.is_none());
        assert_eq!(trailer.next_offset(), 0);

        for offset in 0..6u64 {
            let chunk = [content[offset as usize]];
            let result = trailer
                .write_chunk(destination(&mut buffer, &content), &chunk, offset)
                .expect("in-order chunk accepted");
            assert!(result.is_none());
        }

        let result = trailer
            .write_chunk(destination(&mut buffer, &content), &content[6..], 6)
            .expect("tail accepted in order");
        assert_eq!(result, Some(&content[..]));
    }

    #[test]
    fn done_trailer_ignores_further_chunks() {
        let content = [9u8, 9, 9, 9];
        let mut buffer = [0u8; 4];
        let mut trailer = Trailer::new();

        trailer
            .write_chunk(destination(&mut buffer, &content), &content, 0)
            .expect("assembly")
            .expect("terminal");

        // Even a garbage chunk is ignored once done.
        let result = trailer
            .write_chunk(destination(&mut buffer, &content), &[0xff], 0)
            .expect("ignored after done");
        assert!(result.is_none());
    }

    #[test]
    fn empty_trailer_completes_on_empty_chunk() {
        let mut buffer = [0u8; 0];
        let mut trailer = Trailer::new();

        let result = trailer
            .write_chunk(destination(&mut buffer, &[]), &[], 0)
            .expect("empty trailer assembles");
        assert_eq!(result, Some(&[][..]));
        assert!(trailer.done());
    }

    #[test]
    fn contradictory_total_is_rejected() {
        let content = [1u8, 2, 3, 4];
        let mut buffer = [0u8; 4];
        let mut trailer = Trailer::new();

        trailer
            .write_chunk(destination(&mut buffer, &content), &content[..2], 0)
            .expect("first chunk");

        let wrong = TrailerDestination {
            buffer: &mut buffer,
            size: 4,
            checksum: Checksum::from_bytes([0xee; 16]),
        };
        let err = trailer.write_chunk(wrong, &content[2..], 2).unwrap_err();
        assert!(matches!(err, TrailerError::TotalMismatch { .. }));
    }

    #[test]
    fn divergent_duplicate_is_rejected() {
        let content = [1u8, 2, 3, 4];
        let mut buffer = [0u8; 4];
        let mut trailer = Trailer::new();

        trailer
            .write_chunk(destination(&mut buffer, &content), &content[..2], 0)
            .expect("first chunk");

        let err = trailer
            .write_chunk(destination(&mut buffer, &content), &[9, 9], 0)
            .unwrap_err();
        assert!(matches!(err, TrailerError::DuplicateMismatch { .. }));
    }

    #[test]
    fn past_chunk_straddling_frontier_is_rejected() {
        let content = [1u8, 2, 3, 4];
        let mut buffer = [0u8; 4];
        let mut trailer = Trailer::new();

        trailer
            .write_chunk(destination(&mut buffer, &content), &content[..2], 0)
            .expect("first chunk");

        let err = trailer
            .write_chunk(destination(&mut buffer, &content), &content[1..4], 1)
            .unwrap_err();
        assert!(matches!(err, TrailerError::PastChunkOverrun { .. }));
    }

    #[test]
    fn corrupted_content_fails_digest_at_completion() {
        let content = [1u8, 2, 3, 4];
        let mut corrupted = content;
        corrupted[3] = 0xff;

        let mut buffer = [0u8; 4];
        let mut trailer = Trailer::new();

        // The source sends bytes that disagree with the advertised
        // checksum; each chunk is fresh, so only the final digest notices.
        let err = trailer
            .write_chunk(destination(&mut buffer, &content), &corrupted, 0)
            .unwrap_err();
        assert!(matches!(err, TrailerError::ChecksumMismatch { .. }));
        assert!(!trailer.done());
    }

    proptest! {
        /// Property: any in-order chunking yields exactly one terminal
        /// assembly equal to the content, with every prior call empty.
        #[test]
        fn prop_round_trip_any_chunking(
            content in prop::collection::vec(any::<u8>(), 0..512),
            splits in prop::collection::vec(1usize..64, 0..32),
        ) {
            let mut buffer = vec![0u8; content.len()];
            let mut trailer = Trailer::new();
            let checksum = checksum_128(&content);

            let mut offset = 0usize;
            let mut chunks: Vec<(usize, usize)> = Vec::new();
            for split in splits {
                if offset == content.len() {
                    break;
                }
                let len = split.min(content.len() - offset);
                chunks.push((offset, len));
                offset += len;
            }
            chunks.push((offset, content.len() - offset));

            let mut assembled = 0usize;
            for (chunk_offset, len) in chunks {
                let dest = TrailerDestination {
                    buffer: &mut buffer,
                    size: content.len() as u64,
                    checksum,
                };
                let result = trailer
                    .write_chunk(dest, &content[chunk_offset..chunk_offset + len], chunk_offset as u64)
                    .expect("honest in-order chunks never fail");
                if let Some(bytes) = result {
                    prop_assert_eq!(bytes, &content[..]);
                    assembled += 1;
                }
            }

            prop_assert_eq!(assembled, 1);
            prop_assert!(trailer.done());
        }

        /// Property: duplicates and future chunks never move the frontier.
        #[test]
        fn prop_stale_and_future_chunks_are_inert(
            content in prop::collection::vec(any::<u8>(), 8..128),
            prefix in 1usize..8,
            future_offset in 8u64..1024,
        ) {
            let checksum = checksum_128(&content);
            let mut buffer = vec![0u8; content.len()];
            let mut trailer = Trailer::new();

            let dest = TrailerDestination { buffer: &mut buffer, size: content.len() as u64, checksum };
            trailer.write_chunk(dest, &content[..prefix], 0).expect("prefix accepted");
            let frontier = trailer.next_offset();

            // Duplicate of the accepted prefix.
            let dest = TrailerDestination { buffer: &mut buffer, size: content.len() as u64, checksum };
            let result = trailer.write_chunk(dest, &content[..prefix], 0).expect("duplicate tolerated");
            prop_assert!(result.is_none());
            prop_assert_eq!(trailer.next_offset(), frontier);

            // Arbitrary future chunk.
            let future_offset = future_offset.max(frontier + 1);
            let dest = TrailerDestination { buffer: &mut buffer, size: content.len() as u64, checksum };
            let result = trailer.write_chunk(dest, &[0xab], future_offset).expect("future tolerated");
            prop_assert!(result.is_none());
            prop_assert_eq!(trailer.next_offset(), frontier);
        }
    }
}
