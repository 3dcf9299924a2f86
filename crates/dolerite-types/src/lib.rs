//! Foundation value types for Dolerite.
//!
//! This crate defines the small, copyable value types shared by every other
//! crate in the workspace. It has no protocol knowledge and no I/O; the only
//! dependency is `serde` for wire and persistence derives.

use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

// ============================================================================
// Checksum - Copy (fixed 16-byte value)
// ============================================================================

/// Length of checksums in bytes (128-bit digest).
pub const CHECKSUM_LENGTH: usize = 16;

/// A 128-bit collision-resistant digest.
///
/// This is a foundation type used across Dolerite for:
/// - Checkpoint identities (digest over checkpointed state)
/// - Trailer authentication (digest over an assembled byte sequence)
/// - Log position anchors (digest of the prepare a checkpoint corresponds to)
///
/// The digest algorithm is determined by the context where the checksum is
/// computed (see `dolerite-crypto`). This type only stores the resulting
/// 16-byte value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Checksum([u8; CHECKSUM_LENGTH]);

impl Checksum {
    /// The zero checksum (all zeros), used as a placeholder before a real
    /// digest has been computed.
    pub const ZERO: Checksum = Checksum([0u8; CHECKSUM_LENGTH]);

    /// Creates a checksum from raw bytes.
    pub fn from_bytes(bytes: [u8; CHECKSUM_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the checksum as a byte array.
    pub fn as_bytes(&self) -> &[u8; CHECKSUM_LENGTH] {
        &self.0
    }

    /// Returns true if this is the zero checksum.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; CHECKSUM_LENGTH]
    }
}

impl Debug for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 bytes in hex for debugging without the full digest
        write!(
            f,
            "Checksum({:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}...)",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5], self.0[6], self.0[7]
        )
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Default for Checksum {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<[u8; CHECKSUM_LENGTH]> for Checksum {
    fn from(bytes: [u8; CHECKSUM_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl From<Checksum> for [u8; CHECKSUM_LENGTH] {
    fn from(checksum: Checksum) -> Self {
        checksum.0
    }
}

impl AsRef<[u8]> for Checksum {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_checksum_is_zero() {
        assert!(Checksum::ZERO.is_zero());
        assert!(Checksum::default().is_zero());
        assert!(!Checksum::from_bytes([1u8; CHECKSUM_LENGTH]).is_zero());
    }

    #[test]
    fn round_trips_through_bytes() {
        let bytes = [0xab; CHECKSUM_LENGTH];
        let checksum = Checksum::from_bytes(bytes);
        assert_eq!(*checksum.as_bytes(), bytes);
        assert_eq!(<[u8; CHECKSUM_LENGTH]>::from(checksum), bytes);
    }

    #[test]
    fn display_is_full_hex() {
        let mut bytes = [0u8; CHECKSUM_LENGTH];
        bytes[0] = 0x0f;
        bytes[15] = 0xf0;
        let rendered = Checksum::from_bytes(bytes).to_string();
        assert_eq!(rendered.len(), CHECKSUM_LENGTH * 2);
        assert!(rendered.starts_with("0f"));
        assert!(rendered.ends_with("f0"));
    }
}
