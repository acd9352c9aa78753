//! Tests for one-time and signed prekey lifecycle.
//!
//! These tests verify critical invariants:
//! - One-time prekey ids never collide within the 24-bit wrap period
//! - The counter advances by batch size plus one, modulo 2^24
//! - Cleaning never deletes the active signed prekey and keeps exactly one
//!   superseded key past the archive age

use std::{collections::BTreeSet, time::Duration};

use proptest::prelude::*;
use sealwire_core::{
    CoreConfig, Environment, KeyMaterialStore, MemoryKeyStore, PRE_KEY_BATCH_SIZE, ProtocolCore,
    store::{PRE_KEY_ID_MASK, PreKeyMetadata},
};
use sealwire_harness::{InvariantRegistry, KeyStoreSnapshot, SIM_EPOCH_MILLIS, SimEnv};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn registered_core(seed: u64) -> (ProtocolCore<MemoryKeyStore, SimEnv>, SimEnv) {
    let env = SimEnv::new(seed);
    let core = ProtocolCore::in_process(MemoryKeyStore::new(), env.clone(), CoreConfig::default());
    core.identity().generate_identity_key_pair().expect("identity generation should succeed");
    (core, env)
}

fn seed_counter(core: &ProtocolCore<MemoryKeyStore, SimEnv>, next: u32) {
    core.store()
        .store_pre_key_metadata(&PreKeyMetadata {
            next_pre_key_id: Some(next),
            ..PreKeyMetadata::default()
        })
        .expect("metadata write should succeed");
}

/// INVARIANT: Three batches from `id0` are disjoint, cover 300 ids, and the
/// counter ends at `id0 + 303`.
///
/// Each batch leaves one id unused after it, so the ids span
/// `[id0, id0 + 302)` with gaps at `id0 + 100` and `id0 + 201`.
#[test]
fn three_batches_are_disjoint() {
    let (core, _env) = registered_core(1);
    let id0 = 5_000;
    seed_counter(&core, id0);

    let mut ids = BTreeSet::new();
    for _ in 0..3 {
        let batch =
            core.pre_keys().generate_one_time_pre_keys().expect("generation should succeed");
        for record in batch {
            assert!(ids.insert(record.id), "id {} generated twice", record.id);
        }
    }

    assert_eq!(ids.len(), 300);
    assert_eq!(ids.first(), Some(&id0));
    assert_eq!(ids.last(), Some(&(id0 + 301)));
    assert!(!ids.contains(&(id0 + 100)));
    assert!(!ids.contains(&(id0 + 201)));
    assert_eq!(core.pre_keys().metadata().expect("metadata read").next_pre_key_id, Some(id0 + 303));
    assert_eq!(core.pre_keys().available_pre_keys().expect("count read"), 300);
}

/// INVARIANT: The first batch seeds the counter at random within 24 bits.
#[test]
fn unset_counter_is_seeded_from_environment() {
    let (first, _) = registered_core(9);
    let (second, _) = registered_core(9);

    let a = first.pre_keys().generate_one_time_pre_keys().expect("generation should succeed");
    let b = second.pre_keys().generate_one_time_pre_keys().expect("generation should succeed");

    assert_eq!(a[0].id, b[0].id, "same seed must give same ids");
    assert!(a.iter().all(|record| record.id <= PRE_KEY_ID_MASK));
}

/// INVARIANT: Concurrent generators never hand out the same id.
#[test]
fn concurrent_batches_never_collide() {
    let (core, _env) = registered_core(2);
    seed_counter(&core, PRE_KEY_ID_MASK - 250);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let core = core.clone();
            std::thread::spawn(move || {
                let mut ids = Vec::new();
                for _ in 0..2 {
                    let batch = core
                        .pre_keys()
                        .generate_one_time_pre_keys()
                        .expect("generation should succeed");
                    ids.extend(batch.iter().map(|record| record.id));
                }
                ids
            })
        })
        .collect();

    let mut all = BTreeSet::new();
    for handle in handles {
        for id in handle.join().expect("generator thread panicked") {
            assert!(all.insert(id), "id {id} generated twice");
        }
    }
    assert_eq!(all.len(), 8 * PRE_KEY_BATCH_SIZE as usize);
    assert!(all.iter().all(|id| *id <= PRE_KEY_ID_MASK));
}

/// INVARIANT: Rotating signed prekeys and cleaning keeps the store consistent.
#[test]
fn rotation_and_cleaning_preserve_invariants() {
    let (core, env) = registered_core(3);
    let registry = InvariantRegistry::standard();

    for _ in 0..6 {
        core.pre_keys()
            .generate_signed_pre_key(true)
            .expect("signed prekey generation should succeed");
        env.advance(DAY * 20);
        core.pre_keys().clean_signed_pre_keys().expect("clean should succeed");

        let snapshot = KeyStoreSnapshot::capture(core.store()).expect("snapshot should succeed");
        registry.assert_all(&snapshot, "after signed prekey rotation");
    }

    let remaining = core.store().load_signed_pre_keys().expect("signed prekeys read");
    let active = core.pre_keys().active_signed_pre_key().expect("active read").expect("active set");
    assert!(remaining.iter().any(|record| record.id == active.id));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// INVARIANT: Ids are `(start + i) mod 2^24` and each batch moves the
    /// counter by 101, across the wrap point too.
    #[test]
    fn counter_arithmetic_wraps(start in 0..=PRE_KEY_ID_MASK, batches in 1..4usize) {
        let (core, _env) = registered_core(4);
        seed_counter(&core, start);

        let mut expected_start = start;
        let mut seen = BTreeSet::new();
        for _ in 0..batches {
            let batch =
                core.pre_keys().generate_one_time_pre_keys().expect("generation should succeed");
            for (i, record) in batch.iter().enumerate() {
                prop_assert_eq!(record.id, (expected_start + i as u32) & PRE_KEY_ID_MASK);
                prop_assert!(seen.insert(record.id));
            }
            expected_start = (expected_start + PRE_KEY_BATCH_SIZE + 1) & PRE_KEY_ID_MASK;
            prop_assert_eq!(
                core.pre_keys().metadata().expect("metadata read").next_pre_key_id,
                Some(expected_start)
            );
        }
    }

    /// INVARIANT: Cleaning keeps the active key, every key within the archive
    /// age, and exactly the most recent key past it.
    #[test]
    fn clean_keeps_exactly_one_old_key(ages_in_days in prop::collection::vec(0u64..90, 1..8)) {
        let (core, env) = registered_core(5);
        let now = SIM_EPOCH_MILLIS + 100 * DAY.as_millis() as u64;

        let mut generated = Vec::new();
        for age in &ages_in_days {
            env.set_now_millis(now - age * DAY.as_millis() as u64);
            let record =
                core.pre_keys().generate_signed_pre_key(false).expect("generation should succeed");
            generated.push((record.id, *age));
        }
        env.set_now_millis(now);
        let active =
            core.pre_keys().generate_signed_pre_key(true).expect("generation should succeed");

        core.pre_keys().clean_signed_pre_keys().expect("clean should succeed");

        let remaining: BTreeSet<u32> = core
            .store()
            .load_signed_pre_keys()
            .expect("signed prekeys read")
            .iter()
            .map(|record| record.id)
            .collect();
        prop_assert!(remaining.contains(&active.id));

        for (id, age) in &generated {
            if *age <= 30 {
                prop_assert!(remaining.contains(id), "young key {} deleted", id);
            }
        }

        let old: Vec<&(u32, u64)> = generated.iter().filter(|(_, age)| *age > 30).collect();
        let kept_old: Vec<&&(u32, u64)> =
            old.iter().filter(|(id, _)| remaining.contains(id)).collect();
        prop_assert_eq!(kept_old.len(), usize::from(!old.is_empty()));
        let youngest = old.iter().map(|(_, age)| *age).min();
        if let (Some(kept), Some(youngest)) = (kept_old.first(), youngest) {
            prop_assert_eq!(kept.1, youngest);
        }
        prop_assert_eq!(env.now_millis(), now);
    }
}
