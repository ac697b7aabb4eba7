#![no_main]

use libfuzzer_sys::fuzz_target;
use md_collab::sync::{BlockReplica, Delta, ReplicatedState};

fuzz_target!(|data: &[u8]| {
    let mut replica = BlockReplica::new(1);
    let delta = Delta::from_bytes(data.to_vec());
    if replica.apply_delta(&delta).is_ok() {
        // Whatever was accepted must project and re-encode.
        let _ = replica.blocks();
        let _ = replica.delta_since(&Default::default());
    }
});
