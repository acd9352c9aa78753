//! Tests for the durable Redb key store.
//!
//! These tests verify critical invariants:
//! - Key material survives closing and reopening the database
//! - The transactional lock over Redb commits on success and rolls back on
//!   failure
//! - Address keys keep each account's devices together

use sealwire_core::{
    CoreConfig, DistributionId, KeyError, KeyMaterialStore, ProtocolAddress, ProtocolCore,
    RedbKeyStore, TransactionHost, with_session_lock,
    store::{SenderKeyRecord, SessionRecord},
};
use sealwire_harness::{InvariantRegistry, KeyStoreSnapshot, SimEnv, fixtures::Peer};
use tempfile::tempdir;

/// INVARIANT: Registration keys, sessions and sender keys read back
/// unchanged after the database is reopened.
#[test]
fn key_material_survives_reopen() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("keys.redb");
    let peer = Peer::new("bob", 2, 30);
    let distribution = DistributionId(9);

    let (registration, session) = {
        let store = RedbKeyStore::open(&path).expect("open should succeed");
        let core =
            ProtocolCore::transactional(store.clone(), SimEnv::new(1), CoreConfig::default());
        let registration = core.register().expect("registration should succeed");

        let sender_keys = core.sender_keys(ProtocolAddress::primary("alice"));
        with_session_lock(core.lock(), |guard| {
            core.sessions().process_pre_key_bundle(guard, &peer.address, &peer.bundle(4))?;
            sender_keys.save_our_key(guard, distribution, vec![1, 2, 3])?;
            sender_keys.mark_shared(guard, distribution, &[peer.address.clone()])
        })
        .expect("session setup should succeed");

        let session =
            core.sessions().load_session(&peer.address).expect("read").expect("session stored");
        (registration, session)
    };

    let store = RedbKeyStore::open(&path).expect("reopen should succeed");
    let core = ProtocolCore::transactional(store.clone(), SimEnv::new(2), CoreConfig::default());

    assert_eq!(core.identity().identity_key().expect("identity"), registration.identity_key);
    assert_eq!(
        core.pre_keys().active_signed_pre_key().expect("read"),
        Some(registration.signed_pre_key.clone())
    );
    assert_eq!(
        core.pre_keys().available_pre_keys().expect("count"),
        registration.one_time_pre_keys.len()
    );
    assert_eq!(core.sessions().load_session(&peer.address).expect("read"), Some(session));
    assert!(core.sessions().has_session_for(&peer.address).expect("query"));

    let sender_keys = core.sender_keys(ProtocolAddress::primary("alice"));
    assert!(sender_keys.created_time(distribution).expect("read") > 0);
    assert!(sender_keys.shared_with(distribution).expect("read").contains(&peer.address));

    let snapshot = KeyStoreSnapshot::capture(&store).expect("snapshot");
    InvariantRegistry::standard().assert_all(&snapshot, "after reopen");
}

/// INVARIANT: A failed critical section leaves nothing behind in Redb.
#[test]
fn failed_section_rolls_back_in_redb() {
    let dir = tempdir().expect("tempdir");
    let store = RedbKeyStore::open(dir.path().join("keys.redb")).expect("open should succeed");
    let core = ProtocolCore::transactional(store.clone(), SimEnv::new(3), CoreConfig::default());

    let result = with_session_lock(core.lock(), |_guard| {
        core.identity().generate_identity_key_pair()?;
        core.pre_keys().generate_one_time_pre_keys()?;
        Err::<(), _>(KeyError::MissingIdentity)
    });

    assert!(result.is_err());
    assert!(!store.in_transaction());
    assert!(store.load_identity_key_pair().expect("read").is_none());
    assert_eq!(store.pre_key_count().expect("count"), 0);
    assert_eq!(store.load_pre_key_metadata().expect("read").next_pre_key_id, None);
}

/// INVARIANT: Writes inside an open transaction are visible to the owning
/// thread before commit.
#[test]
fn owner_reads_its_own_writes() {
    let dir = tempdir().expect("tempdir");
    let store = RedbKeyStore::open(dir.path().join("keys.redb")).expect("open should succeed");
    let core = ProtocolCore::transactional(store.clone(), SimEnv::new(4), CoreConfig::default());

    with_session_lock(core.lock(), |_guard| {
        let created = core.pre_keys().generate_signed_pre_key(true)?;
        let active = core.pre_keys().active_signed_pre_key()?;
        assert_eq!(active.map(|record| record.id), Some(created.id));
        Ok::<_, KeyError>(())
    })
    .expect("critical section should succeed");
}

/// INVARIANT: Sub-device enumeration only returns devices of the named
/// account, even when another name shares its prefix.
#[test]
fn sub_devices_do_not_leak_across_names() {
    let dir = tempdir().expect("tempdir");
    let store = RedbKeyStore::open(dir.path().join("keys.redb")).expect("open should succeed");
    let record = SessionRecord::default();

    for (name, device) in [("al", 1), ("al", 3), ("alice", 2), ("b", 1)] {
        store.store_session(&ProtocolAddress::new(name, device), &record).expect("write");
    }

    assert_eq!(store.sub_device_sessions("al").expect("read"), vec![1, 3]);
    assert_eq!(store.sub_device_sessions("alice").expect("read"), vec![2]);
    assert_eq!(store.session_addresses().expect("read").len(), 4);
}

/// INVARIANT: Deleting all sender keys and shared records empties both
/// tables.
#[test]
fn clear_all_sender_state() {
    let dir = tempdir().expect("tempdir");
    let store = RedbKeyStore::open(dir.path().join("keys.redb")).expect("open should succeed");
    let alice = ProtocolAddress::primary("alice");
    let record = SenderKeyRecord { state: vec![7], created_at_millis: 1 };

    for id in 1..=3 {
        store.store_sender_key(&alice, DistributionId(id), &record).expect("write");
        store.mark_shared(DistributionId(id), &[ProtocolAddress::primary("bob")]).expect("write");
    }
    store.delete_all_sender_keys().expect("delete");
    store.delete_all_shared().expect("delete");

    for id in 1..=3 {
        assert!(store.load_sender_key(&alice, DistributionId(id)).expect("read").is_none());
        assert!(store.shared_with(DistributionId(id)).expect("read").is_empty());
    }
}
