//! Fuzz target for key lifecycle operations over a failing store
//!
//! Drives prekey generation, rotation, cleaning and session setup through a
//! transactional lock over a store that fails at a fuzzer-chosen rate.
//!
//! # Invariants
//!
//! - Injected store failures are never reported as fatal
//! - The reliable store under the chaos wrapper satisfies every standard
//!   invariant after each operation

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sealwire_core::{
    with_session_lock, ChaoticKeyStore, CoreConfig, KeyError, MemoryKeyStore, ProtocolCore,
};
use sealwire_harness::{fixtures::Peer, InvariantRegistry, KeyStoreSnapshot, SimEnv};

#[derive(Debug, Arbitrary)]
enum Op {
    GenerateOneTime,
    GenerateSigned { set_active: bool },
    CleanSigned,
    Consume { id: u32 },
    OpenSession { device: u8, signed_seed: u8 },
    ArchiveSiblings { device: u8 },
    AdvanceDays { days: u8 },
}

#[derive(Debug, Arbitrary)]
struct Input {
    seed: u64,
    failure_percent: u8,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let inner = MemoryKeyStore::new();
    let env = SimEnv::new(input.seed);
    if ProtocolCore::in_process(inner.clone(), env.clone(), CoreConfig::default())
        .register()
        .is_err()
    {
        return;
    }

    let rate = f64::from(input.failure_percent % 101) / 100.0;
    let store = ChaoticKeyStore::with_seed(inner.clone(), rate, input.seed);
    let core = ProtocolCore::transactional(store, env.clone(), CoreConfig::default());
    let registry = InvariantRegistry::standard();

    for op in input.ops.into_iter().take(64) {
        let result: Result<(), KeyError> = match op {
            Op::GenerateOneTime => core.pre_keys().generate_one_time_pre_keys().map(drop),
            Op::GenerateSigned { set_active } => {
                core.pre_keys().generate_signed_pre_key(set_active).map(drop)
            },
            Op::CleanSigned => core.pre_keys().clean_signed_pre_keys().map(drop),
            Op::Consume { id } => core.pre_keys().mark_pre_key_consumed(id),
            Op::OpenSession { device, signed_seed } => {
                let peer = Peer::new("peer", u32::from(device % 4) + 1, 9);
                with_session_lock(core.lock(), |guard| {
                    let bundle = peer.bundle(signed_seed);
                    core.sessions().process_pre_key_bundle(guard, &peer.address, &bundle)
                })
            },
            Op::ArchiveSiblings { device } => {
                let peer = Peer::new("peer", u32::from(device % 4) + 1, 9);
                with_session_lock(core.lock(), |guard| {
                    core.sessions().archive_sibling_sessions(guard, &peer.address)
                })
            },
            Op::AdvanceDays { days } => {
                env.advance(Duration::from_secs(u64::from(days) * 24 * 60 * 60));
                Ok(())
            },
        };

        if let Err(e) = result {
            assert!(!e.is_fatal(), "injected failure reported as fatal: {e}");
        }

        let snapshot = KeyStoreSnapshot::capture(&inner).expect("reliable store readable");
        if let Err(violations) = registry.check_all(&snapshot) {
            panic!("invariant violation: {violations:?}");
        }
    }
});
