#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::ThreadId,
};

use sealwire_crypto::IdentityKeyPair;

use super::{
    KeyMaterialStore, PreKeyMetadata, PreKeyRecord, SenderKeyRecord, SessionRecord,
    SignedPreKeyRecord, StoreError, TransactionHost,
};
use crate::address::{DistributionId, ProtocolAddress};

/// In-memory key store for testing and simulation
///
/// All state is wrapped in Arc<Mutex<>> so clones share one store. Supports
/// snapshot transactions: `begin_transaction` copies every table, and a
/// rolled-back transaction restores the copy. While one thread owns the
/// transaction, other threads' operations wait on a condvar.
///
/// Uses `lock().expect()` which will panic if the mutex is poisoned,
/// acceptable for test code.
#[derive(Clone)]
pub struct MemoryKeyStore {
    inner: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    transaction_ended: Condvar,
}

struct State {
    tables: Tables,
    owner: Option<ThreadId>,
    snapshot: Option<Tables>,
}

#[derive(Clone, Default)]
struct Tables {
    identity: Option<IdentityKeyPair>,
    pre_keys: BTreeMap<u32, PreKeyRecord>,
    signed_pre_keys: BTreeMap<u32, SignedPreKeyRecord>,
    metadata: PreKeyMetadata,
    sessions: BTreeMap<ProtocolAddress, SessionRecord>,
    sender_keys: BTreeMap<(ProtocolAddress, DistributionId), SenderKeyRecord>,
    shared: BTreeMap<DistributionId, BTreeSet<ProtocolAddress>>,
}

impl MemoryKeyStore {
    /// Create a new empty `MemoryKeyStore`
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                state: Mutex::new(State { tables: Tables::default(), owner: None, snapshot: None }),
                transaction_ended: Condvar::new(),
            }),
        }
    }

    #[allow(clippy::expect_used)]
    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().expect("Mutex poisoned")
    }

    /// Run `f` against the tables once no other thread owns a transaction.
    #[allow(clippy::expect_used)]
    fn with_tables<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        let me = std::thread::current().id();
        let mut state = self
            .inner
            .transaction_ended
            .wait_while(self.state(), |state| state.owner.is_some_and(|owner| owner != me))
            .expect("Mutex poisoned");

        f(&mut state.tables)
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyMaterialStore for MemoryKeyStore {
    fn load_identity_key_pair(&self) -> Result<Option<IdentityKeyPair>, StoreError> {
        Ok(self.with_tables(|t| t.identity.clone()))
    }

    fn store_identity_key_pair(&self, key_pair: &IdentityKeyPair) -> Result<(), StoreError> {
        self.with_tables(|t| t.identity = Some(key_pair.clone()));
        Ok(())
    }

    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, StoreError> {
        Ok(self.with_tables(|t| t.pre_keys.get(&id).cloned()))
    }

    fn store_pre_key(&self, record: &PreKeyRecord) -> Result<(), StoreError> {
        self.with_tables(|t| t.pre_keys.insert(record.id, record.clone()));
        Ok(())
    }

    fn remove_pre_key(&self, id: u32) -> Result<(), StoreError> {
        self.with_tables(|t| t.pre_keys.remove(&id));
        Ok(())
    }

    fn pre_key_count(&self) -> Result<usize, StoreError> {
        Ok(self.with_tables(|t| t.pre_keys.len()))
    }

    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, StoreError> {
        Ok(self.with_tables(|t| t.signed_pre_keys.get(&id).cloned()))
    }

    fn load_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>, StoreError> {
        Ok(self.with_tables(|t| t.signed_pre_keys.values().cloned().collect()))
    }

    fn store_signed_pre_key(&self, record: &SignedPreKeyRecord) -> Result<(), StoreError> {
        self.with_tables(|t| t.signed_pre_keys.insert(record.id, record.clone()));
        Ok(())
    }

    fn remove_signed_pre_key(&self, id: u32) -> Result<(), StoreError> {
        self.with_tables(|t| t.signed_pre_keys.remove(&id));
        Ok(())
    }

    fn load_pre_key_metadata(&self) -> Result<PreKeyMetadata, StoreError> {
        Ok(self.with_tables(|t| t.metadata.clone()))
    }

    fn store_pre_key_metadata(&self, metadata: &PreKeyMetadata) -> Result<(), StoreError> {
        self.with_tables(|t| t.metadata = metadata.clone());
        Ok(())
    }

    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.with_tables(|t| t.sessions.get(address).cloned()))
    }

    fn store_session(
        &self,
        address: &ProtocolAddress,
        record: &SessionRecord,
    ) -> Result<(), StoreError> {
        self.with_tables(|t| t.sessions.insert(address.clone(), record.clone()));
        Ok(())
    }

    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>, StoreError> {
        Ok(self.with_tables(|t| {
            t.sessions
                .keys()
                .filter(|address| address.name == name)
                .map(|address| address.device_id)
                .collect()
        }))
    }

    fn session_addresses(&self) -> Result<Vec<ProtocolAddress>, StoreError> {
        Ok(self.with_tables(|t| t.sessions.keys().cloned().collect()))
    }

    fn load_sender_key(
        &self,
        address: &ProtocolAddress,
        distribution_id: DistributionId,
    ) -> Result<Option<SenderKeyRecord>, StoreError> {
        let key = (address.clone(), distribution_id);
        Ok(self.with_tables(|t| t.sender_keys.get(&key).cloned()))
    }

    fn store_sender_key(
        &self,
        address: &ProtocolAddress,
        distribution_id: DistributionId,
        record: &SenderKeyRecord,
    ) -> Result<(), StoreError> {
        let key = (address.clone(), distribution_id);
        self.with_tables(|t| t.sender_keys.insert(key, record.clone()));
        Ok(())
    }

    fn delete_sender_key(
        &self,
        address: &ProtocolAddress,
        distribution_id: DistributionId,
    ) -> Result<(), StoreError> {
        let key = (address.clone(), distribution_id);
        self.with_tables(|t| t.sender_keys.remove(&key));
        Ok(())
    }

    fn delete_all_sender_keys(&self) -> Result<(), StoreError> {
        self.with_tables(|t| t.sender_keys.clear());
        Ok(())
    }

    fn shared_with(
        &self,
        distribution_id: DistributionId,
    ) -> Result<BTreeSet<ProtocolAddress>, StoreError> {
        Ok(self.with_tables(|t| t.shared.get(&distribution_id).cloned().unwrap_or_default()))
    }

    fn mark_shared(
        &self,
        distribution_id: DistributionId,
        addresses: &[ProtocolAddress],
    ) -> Result<(), StoreError> {
        self.with_tables(|t| {
            t.shared.entry(distribution_id).or_default().extend(addresses.iter().cloned());
        });
        Ok(())
    }

    fn delete_shared(&self, distribution_id: DistributionId) -> Result<(), StoreError> {
        self.with_tables(|t| t.shared.remove(&distribution_id));
        Ok(())
    }

    fn delete_all_shared(&self) -> Result<(), StoreError> {
        self.with_tables(|t| t.shared.clear());
        Ok(())
    }
}

impl TransactionHost for MemoryKeyStore {
    fn transaction_owner(&self) -> Option<ThreadId> {
        self.state().owner
    }

    #[allow(clippy::expect_used)]
    fn begin_transaction(&self) -> Result<(), StoreError> {
        let me = std::thread::current().id();
        let state = self.state();
        if state.owner == Some(me) {
            return Err(StoreError::Transaction("transaction already open on this thread".into()));
        }

        let mut state = self
            .inner
            .transaction_ended
            .wait_while(state, |state| state.owner.is_some())
            .expect("Mutex poisoned");

        state.owner = Some(me);
        state.snapshot = Some(state.tables.clone());
        Ok(())
    }

    fn end_transaction(&self, successful: bool) -> Result<(), StoreError> {
        let me = std::thread::current().id();
        let mut state = self.state();
        if state.owner != Some(me) {
            return Err(StoreError::Transaction("no transaction open on this thread".into()));
        }

        if let (false, Some(snapshot)) = (successful, state.snapshot.take()) {
            state.tables = snapshot;
        }
        state.owner = None;
        drop(state);

        self.inner.transaction_ended.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sealwire_crypto::KeyPair;

    use super::*;

    fn pre_key(id: u32) -> PreKeyRecord {
        PreKeyRecord { id, key_pair: KeyPair::from_seed([id as u8; 32]) }
    }

    #[test]
    fn clones_share_state() {
        let store = MemoryKeyStore::new();
        let clone = store.clone();

        store.store_pre_key(&pre_key(5)).unwrap();
        assert_eq!(clone.load_pre_key(5).unwrap(), Some(pre_key(5)));
    }

    #[test]
    fn rollback_restores_snapshot() {
        let store = MemoryKeyStore::new();
        store.store_pre_key(&pre_key(1)).unwrap();

        store.begin_transaction().unwrap();
        store.store_pre_key(&pre_key(2)).unwrap();
        store.remove_pre_key(1).unwrap();
        store.end_transaction(false).unwrap();

        assert_eq!(store.load_pre_key(1).unwrap(), Some(pre_key(1)));
        assert_eq!(store.load_pre_key(2).unwrap(), None);
    }

    #[test]
    fn commit_keeps_writes() {
        let store = MemoryKeyStore::new();

        store.begin_transaction().unwrap();
        assert!(store.in_transaction());
        store.store_pre_key(&pre_key(2)).unwrap();
        store.end_transaction(true).unwrap();

        assert!(!store.in_transaction());
        assert_eq!(store.pre_key_count().unwrap(), 1);
    }

    #[test]
    fn end_without_begin_is_error() {
        let store = MemoryKeyStore::new();
        assert!(matches!(store.end_transaction(true), Err(StoreError::Transaction(_))));
    }

    #[test]
    fn double_begin_is_error() {
        let store = MemoryKeyStore::new();
        store.begin_transaction().unwrap();
        assert!(matches!(store.begin_transaction(), Err(StoreError::Transaction(_))));
        store.end_transaction(true).unwrap();
    }

    #[test]
    fn shared_records_accumulate() {
        let store = MemoryKeyStore::new();
        let id = DistributionId(9);

        store.mark_shared(id, &[ProtocolAddress::new("a", 1)]).unwrap();
        store.mark_shared(id, &[ProtocolAddress::new("b", 1)]).unwrap();
        assert_eq!(store.shared_with(id).unwrap().len(), 2);

        store.delete_shared(id).unwrap();
        assert!(store.shared_with(id).unwrap().is_empty());
    }
}
