//! Digest primitives for Dolerite.
//!
//! All checkpoint and trailer authentication in Dolerite uses a single
//! 128-bit digest: BLAKE3 truncated to [`CHECKSUM_LENGTH`] bytes. BLAKE3's
//! output is uniform, so a 128-bit prefix retains collision resistance at
//! the width the protocol requires.

use dolerite_types::{Checksum, CHECKSUM_LENGTH};

/// Computes the 128-bit digest of a byte sequence.
///
/// The input may be empty; the digest of an empty sequence is well defined
/// and distinct from [`Checksum::ZERO`].
pub fn checksum_128(data: &[u8]) -> Checksum {
    let digest = blake3::hash(data);
    let mut bytes = [0u8; CHECKSUM_LENGTH];
    bytes.copy_from_slice(&digest.as_bytes()[..CHECKSUM_LENGTH]);
    Checksum::from_bytes(bytes)
}
