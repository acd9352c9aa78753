//! Observable key store state.

use std::collections::BTreeMap;

use sealwire_core::{
    KeyMaterialStore, ProtocolAddress, StoreError,
    store::{PreKeyMetadata, SessionRecord, SignedPreKeyRecord},
};

/// Everything the invariants look at, read in one pass.
#[derive(Debug, Clone, Default)]
pub struct KeyStoreSnapshot {
    /// Prekey counters and active signed prekey
    pub metadata: PreKeyMetadata,
    /// All signed prekeys
    pub signed_pre_keys: Vec<SignedPreKeyRecord>,
    /// Number of one-time prekeys
    pub pre_key_count: usize,
    /// Session record per address
    pub sessions: BTreeMap<ProtocolAddress, SessionRecord>,
}

impl KeyStoreSnapshot {
    /// Snapshot with nothing in it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read `store`.
    ///
    /// Not atomic with respect to concurrent writers; take it while holding
    /// the session lock or after all writers finished.
    pub fn capture<S: KeyMaterialStore>(store: &S) -> Result<Self, StoreError> {
        let mut sessions = BTreeMap::new();
        for address in store.session_addresses()? {
            if let Some(record) = store.load_session(&address)? {
                sessions.insert(address, record);
            }
        }

        Ok(Self {
            metadata: store.load_pre_key_metadata()?,
            signed_pre_keys: store.load_signed_pre_keys()?,
            pre_key_count: store.pre_key_count()?,
            sessions,
        })
    }
}
