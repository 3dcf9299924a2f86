#![no_main]

use dolerite_sync::target::{TargetCandidate, TargetQuorum};
use dolerite_sync::types::{CheckpointId, OpNumber, ReplicaId};
use dolerite_types::Checksum;
use libfuzzer_sys::fuzz_target;

// Candidate table fuzzing target.
//
// Applies an arbitrary sequence of advertisements to a TargetQuorum and
// checks the table invariants:
//
// - Per-slot op numbers never decrease.
// - The count for any stored candidate never exceeds the table size.
// - A rejected replace leaves the slot unchanged.
//
// **Input format:** bytes in triples (replica, op, id_byte).

const CLUSTER_SIZE: usize = 6;

fuzz_target!(|data: &[u8]| {
    let mut quorum = TargetQuorum::new(CLUSTER_SIZE);

    for triple in data.chunks_exact(3) {
        let replica = ReplicaId::new(triple[0] % CLUSTER_SIZE as u8);
        let candidate = TargetCandidate::new(
            CheckpointId::new(Checksum::from_bytes([triple[2]; 16])),
            OpNumber::new(u64::from(triple[1])),
        );

        let before = quorum.get(replica).copied();
        let accepted = quorum.replace(replica, candidate);
        let after = quorum.get(replica).copied();

        if accepted {
            assert_eq!(after, Some(candidate));
        } else {
            assert_eq!(after, before);
        }
        if let (Some(before), Some(after)) = (before, after) {
            assert!(after.checkpoint_op >= before.checkpoint_op);
        }

        let stored = after.expect("slot holds a candidate after replace");
        let votes = quorum.count(&stored);
        assert!(votes >= 1 && votes <= CLUSTER_SIZE);
    }
});
