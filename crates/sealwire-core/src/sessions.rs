//! Per-device session records
//!
//! Mutating operations do not acquire the session lock themselves. They take
//! a [`SessionLockGuard`] as proof that the caller already holds it, so that
//! several of them (and other locked work) can be composed into one critical
//! section. Read-only queries acquire the lock internally; the lock is
//! reentrant, so calling them from inside a critical section is fine.

use std::sync::Arc;

use sealwire_crypto::{IdentityKey, KEY_SIZE, KeyPair, SIGNATURE_SIZE};

use crate::{
    address::{PRIMARY_DEVICE_ID, ProtocolAddress},
    env::Environment,
    error::KeyError,
    lock::{SessionLock, SessionLockGuard, with_session_lock},
    store::{KeyMaterialStore, SessionRecord, SessionState},
};

/// Prekey bundle a peer device published to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyBundle {
    /// Device the bundle belongs to
    pub device_id: u32,
    /// One-time prekey `(id, public key)`, absent once the server ran out
    pub pre_key: Option<(u32, [u8; KEY_SIZE])>,
    /// Signed prekey id
    pub signed_pre_key_id: u32,
    /// Signed prekey public key
    pub signed_pre_key_public: [u8; KEY_SIZE],
    /// Identity signature over `signed_pre_key_public`
    pub signed_pre_key_signature: [u8; SIGNATURE_SIZE],
    /// Peer identity key
    pub identity_key: IdentityKey,
}

/// Queries and archives session records.
#[derive(Clone)]
pub struct SessionStateManager<S, E> {
    store: S,
    env: E,
    lock: Arc<dyn SessionLock>,
}

impl<S: KeyMaterialStore, E: Environment> SessionStateManager<S, E> {
    /// Create a manager over `store`, guarded by `lock`.
    pub fn new(store: S, env: E, lock: Arc<dyn SessionLock>) -> Self {
        Self { store, env, lock }
    }

    /// Whether there is an open session with the primary device of `peer`.
    pub fn has_session(&self, peer: &str) -> Result<bool, KeyError> {
        self.has_session_for(&ProtocolAddress::new(peer, PRIMARY_DEVICE_ID))
    }

    /// Whether there is an open session with `address`.
    pub fn has_session_for(&self, address: &ProtocolAddress) -> Result<bool, KeyError> {
        with_session_lock(&*self.lock, |_guard| {
            Ok(self.store.load_session(address)?.is_some_and(|record| record.has_current_state()))
        })
    }

    /// Whether the current receiving ratchet key of the session with
    /// `peer.device_id` equals `candidate`.
    ///
    /// False when there is no open session.
    pub fn ratchet_key_matches(
        &self,
        peer: &str,
        device_id: u32,
        candidate: &[u8; KEY_SIZE],
    ) -> Result<bool, KeyError> {
        let address = ProtocolAddress::new(peer, device_id);
        with_session_lock(&*self.lock, |_guard| {
            let matches = self
                .store
                .load_session(&address)?
                .and_then(|record| record.current().map(|s| s.receiving_ratchet_key == *candidate))
                .unwrap_or(false);
            Ok(matches)
        })
    }

    /// Archive the current session with `peer.device_id`.
    ///
    /// No-op when there is no session.
    pub fn archive_session(
        &self,
        guard: &SessionLockGuard<'_>,
        peer: &str,
        device_id: u32,
    ) -> Result<(), KeyError> {
        guard.ensure_held(&*self.lock)?;
        self.archive(&ProtocolAddress::new(peer, device_id))
    }

    /// Archive every session with `address.name` except `address` itself.
    pub fn archive_sibling_sessions(
        &self,
        guard: &SessionLockGuard<'_>,
        address: &ProtocolAddress,
    ) -> Result<(), KeyError> {
        guard.ensure_held(&*self.lock)?;
        for device_id in self.store.sub_device_sessions(&address.name)? {
            if device_id != address.device_id {
                self.archive(&ProtocolAddress::new(address.name.clone(), device_id))?;
            }
        }
        Ok(())
    }

    /// Archive every stored session.
    pub fn archive_all_sessions(&self, guard: &SessionLockGuard<'_>) -> Result<(), KeyError> {
        guard.ensure_held(&*self.lock)?;
        let addresses = self.store.session_addresses()?;
        for address in &addresses {
            self.archive(address)?;
        }
        tracing::info!(count = addresses.len(), "Archived all sessions");
        Ok(())
    }

    /// Open a session with `address` from its published prekey bundle.
    ///
    /// The signed prekey signature is verified against the bundle's identity
    /// key first; a bad signature leaves the store untouched. An existing
    /// session is archived, not discarded.
    pub fn process_pre_key_bundle(
        &self,
        guard: &SessionLockGuard<'_>,
        address: &ProtocolAddress,
        bundle: &PreKeyBundle,
    ) -> Result<(), KeyError> {
        guard.ensure_held(&*self.lock)?;

        if bundle
            .identity_key
            .verify(&bundle.signed_pre_key_public, &bundle.signed_pre_key_signature)
            .is_err()
        {
            tracing::warn!(%address, "Rejected prekey bundle with bad signature");
            return Err(KeyError::UntrustedBundle(address.clone()));
        }

        let base_key = KeyPair::from_seed(self.env.random_seed());
        let state = SessionState {
            remote_identity: bundle.identity_key,
            receiving_ratchet_key: bundle.signed_pre_key_public,
            local_base_key: *base_key.public_key(),
            pre_key_id: bundle.pre_key.map(|(id, _)| id),
            signed_pre_key_id: bundle.signed_pre_key_id,
            created_at_millis: self.env.now_millis(),
            ratchet: Vec::new(),
        };

        let mut record = self.store.load_session(address)?.unwrap_or_default();
        record.promote_state(state);
        self.store.store_session(address, &record)?;

        tracing::debug!(%address, "Opened session from prekey bundle");
        Ok(())
    }

    /// Load the raw session record for `address`.
    pub fn load_session(
        &self,
        address: &ProtocolAddress,
    ) -> Result<Option<SessionRecord>, KeyError> {
        with_session_lock(&*self.lock, |_guard| Ok(self.store.load_session(address)?))
    }

    fn archive(&self, address: &ProtocolAddress) -> Result<(), KeyError> {
        let Some(mut record) = self.store.load_session(address)? else {
            return Ok(());
        };
        if !record.has_current_state() {
            return Ok(());
        }

        record.archive_current_state();
        self.store.store_session(address, &record)?;
        tracing::debug!(%address, "Archived session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sealwire_crypto::IdentityKeyPair;

    use super::*;
    use crate::{
        lock::{LockError, ReentrantSessionLock},
        store::MemoryKeyStore,
        test_env::TestEnv,
    };

    fn manager() -> (SessionStateManager<MemoryKeyStore, TestEnv>, Arc<ReentrantSessionLock>) {
        let lock = Arc::new(ReentrantSessionLock::new());
        let manager =
            SessionStateManager::new(MemoryKeyStore::new(), TestEnv::new(5), lock.clone());
        (manager, lock)
    }

    fn bundle(device_id: u32) -> PreKeyBundle {
        let identity = IdentityKeyPair::from_seed([9; 32]);
        let signed = KeyPair::from_seed([device_id as u8; 32]);
        PreKeyBundle {
            device_id,
            pre_key: Some((7, *KeyPair::from_seed([3; 32]).public_key())),
            signed_pre_key_id: 11,
            signed_pre_key_public: *signed.public_key(),
            signed_pre_key_signature: identity.sign(signed.public_key()).unwrap(),
            identity_key: identity.public_key(),
        }
    }

    fn open(
        manager: &SessionStateManager<MemoryKeyStore, TestEnv>,
        lock: &ReentrantSessionLock,
        address: &ProtocolAddress,
    ) {
        let guard = lock.acquire().unwrap();
        manager.process_pre_key_bundle(&guard, address, &bundle(address.device_id)).unwrap();
    }

    #[test]
    fn bundle_opens_session() {
        let (manager, lock) = manager();
        let bob = ProtocolAddress::primary("bob");
        assert!(!manager.has_session("bob").unwrap());

        open(&manager, &lock, &bob);

        assert!(manager.has_session("bob").unwrap());
        let record = manager.load_session(&bob).unwrap().unwrap();
        let state = record.current().unwrap();
        assert_eq!(state.pre_key_id, Some(7));
        assert_eq!(state.signed_pre_key_id, 11);
        assert_eq!(state.created_at_millis, 5);
    }

    #[test]
    fn bad_bundle_signature_is_rejected() {
        let (manager, lock) = manager();
        let bob = ProtocolAddress::primary("bob");
        let mut bad = bundle(1);
        bad.signed_pre_key_signature[0] ^= 1;

        let guard = lock.acquire().unwrap();
        let err = manager.process_pre_key_bundle(&guard, &bob, &bad).unwrap_err();
        drop(guard);

        assert_eq!(err, KeyError::UntrustedBundle(bob.clone()));
        assert!(!err.is_fatal());
        assert!(manager.load_session(&bob).unwrap().is_none());
    }

    #[test]
    fn ratchet_key_matches_current_state_only() {
        let (manager, lock) = manager();
        let bob = ProtocolAddress::new("bob", 2);
        open(&manager, &lock, &bob);
        let key = *KeyPair::from_seed([2; 32]).public_key();

        assert!(manager.ratchet_key_matches("bob", 2, &key).unwrap());
        assert!(!manager.ratchet_key_matches("bob", 2, &[0; 32]).unwrap());
        assert!(!manager.ratchet_key_matches("bob", 3, &key).unwrap());

        let guard = lock.acquire().unwrap();
        manager.archive_session(&guard, "bob", 2).unwrap();
        drop(guard);
        assert!(!manager.ratchet_key_matches("bob", 2, &key).unwrap());
    }

    #[test]
    fn sibling_archive_spares_given_device() {
        let (manager, lock) = manager();
        for device in 1..=3 {
            open(&manager, &lock, &ProtocolAddress::new("bob", device));
        }
        open(&manager, &lock, &ProtocolAddress::primary("carol"));

        let guard = lock.acquire().unwrap();
        manager.archive_sibling_sessions(&guard, &ProtocolAddress::new("bob", 2)).unwrap();
        drop(guard);

        assert!(!manager.has_session_for(&ProtocolAddress::new("bob", 1)).unwrap());
        assert!(manager.has_session_for(&ProtocolAddress::new("bob", 2)).unwrap());
        assert!(!manager.has_session_for(&ProtocolAddress::new("bob", 3)).unwrap());
        assert!(manager.has_session("carol").unwrap());
    }

    #[test]
    fn archive_all_keeps_previous_states() {
        let (manager, lock) = manager();
        let bob = ProtocolAddress::primary("bob");
        open(&manager, &lock, &bob);

        let guard = lock.acquire().unwrap();
        manager.archive_all_sessions(&guard).unwrap();
        drop(guard);

        let record = manager.load_session(&bob).unwrap().unwrap();
        assert!(!record.has_current_state());
        assert_eq!(record.previous().len(), 1);
    }

    #[test]
    fn released_guard_is_not_accepted() {
        let (manager, lock) = manager();
        let mut guard = lock.acquire().unwrap();
        guard.release().unwrap();

        assert_eq!(
            manager.archive_all_sessions(&guard),
            Err(KeyError::Lock(LockError::NotHeld))
        );
    }

    #[test]
    fn guard_from_another_lock_is_not_accepted() {
        let (_other_manager, other_lock) = manager();
        let (manager, _lock) = manager();
        let guard = other_lock.acquire().unwrap();

        let bob = ProtocolAddress::primary("bob");
        assert_eq!(
            manager.process_pre_key_bundle(&guard, &bob, &bundle(1)),
            Err(KeyError::Lock(LockError::ForeignGuard))
        );
        assert!(!manager.has_session_for(&bob).unwrap());
    }
}
