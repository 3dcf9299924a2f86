#![no_main]

use dolerite_crypto::checksum_128;
use dolerite_sync::trailer::{Trailer, TrailerDestination};
use libfuzzer_sys::fuzz_target;

// Trailer assembly fuzzing target.
//
// Feeds an arbitrary sequence of chunks (honest slices of a fixed content,
// at arbitrary offsets) into a Trailer and checks the assembly invariants:
//
// - The write frontier never moves backwards.
// - At most one call across the whole sequence returns an assembled value,
//   and that value equals the original content.
// - Honest chunks (byte-exact slices of the content) never produce an
//   authentication error.
//
// **Input format:**
// - Byte 0: content length (0-128)
// - Bytes 1..=len: the content itself
// - Remaining bytes, in pairs: (chunk_offset, chunk_len) of each chunk to
//   feed, clamped to the content bounds

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let content_len = (data[0] as usize) % 129;
    if data.len() < 1 + content_len {
        return;
    }
    let content = &data[1..1 + content_len];
    let checksum = checksum_128(content);

    let mut buffer = vec![0u8; content_len];
    let mut trailer = Trailer::new();
    let mut assembled = 0usize;

    let mut rest = &data[1 + content_len..];
    while rest.len() >= 2 {
        let offset = (rest[0] as usize) % (content_len + 1);
        let mut len = (rest[1] as usize).min(content_len - offset);
        rest = &rest[2..];

        let frontier_before = trailer.next_offset();
        // A past chunk must not straddle the frontier; an honest source
        // re-sends only ranges it already sent.
        if (offset as u64) < frontier_before {
            len = len.min((frontier_before - offset as u64) as usize);
        }
        let destination = TrailerDestination {
            buffer: &mut buffer,
            size: content_len as u64,
            checksum,
        };
        let result = trailer
            .write_chunk(destination, &content[offset..offset + len], offset as u64)
            .expect("honest chunks never fail authentication");

        assert!(trailer.next_offset() >= frontier_before);
        if let Some(bytes) = result {
            assert_eq!(bytes, content);
            assembled += 1;
        }
    }

    assert!(assembled <= 1);
    if trailer.done() {
        assert_eq!(trailer.next_offset(), content_len as u64);
    }
});
