//! Long-term identity keypair

use std::sync::Arc;

use sealwire_crypto::{IdentityKey, IdentityKeyPair};

use crate::{
    env::Environment,
    error::KeyError,
    lock::{SessionLock, with_session_lock},
    store::KeyMaterialStore,
};

/// Creates the local identity keypair once, at registration.
#[derive(Clone)]
pub struct IdentityKeyManager<S, E> {
    store: S,
    env: E,
    lock: Arc<dyn SessionLock>,
}

impl<S: KeyMaterialStore, E: Environment> IdentityKeyManager<S, E> {
    /// Create a manager over `store`, guarded by `lock`.
    pub fn new(store: S, env: E, lock: Arc<dyn SessionLock>) -> Self {
        Self { store, env, lock }
    }

    /// Generate and persist the identity keypair.
    ///
    /// Identity keys are never rotated here; calling this when one exists is
    /// a [`KeyError::IdentityAlreadyExists`] error rather than a silent
    /// overwrite, which would invalidate every peer's safety number.
    pub fn generate_identity_key_pair(&self) -> Result<IdentityKey, KeyError> {
        with_session_lock(&*self.lock, |_guard| {
            if self.store.load_identity_key_pair()?.is_some() {
                return Err(KeyError::IdentityAlreadyExists);
            }

            let key_pair = IdentityKeyPair::from_seed(self.env.random_seed());
            self.store.store_identity_key_pair(&key_pair)?;

            let public = key_pair.public_key();
            tracing::info!(identity = ?public, "Generated identity key pair");
            Ok(public)
        })
    }

    /// Public identity key of the local account.
    pub fn identity_key(&self) -> Result<IdentityKey, KeyError> {
        with_session_lock(&*self.lock, |_guard| {
            let key_pair = self.store.load_identity_key_pair()?.ok_or(KeyError::MissingIdentity)?;
            Ok(key_pair.public_key())
        })
    }

    /// Whether the identity keypair exists.
    pub fn has_identity(&self) -> Result<bool, KeyError> {
        with_session_lock(&*self.lock, |_guard| Ok(self.store.load_identity_key_pair()?.is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lock::ReentrantSessionLock, store::MemoryKeyStore, test_env::TestEnv};

    fn manager() -> IdentityKeyManager<MemoryKeyStore, TestEnv> {
        IdentityKeyManager::new(
            MemoryKeyStore::new(),
            TestEnv::new(0),
            Arc::new(ReentrantSessionLock::new()),
        )
    }

    #[test]
    fn generated_identity_is_persisted() {
        let manager = manager();
        assert!(!manager.has_identity().unwrap());

        let public = manager.generate_identity_key_pair().unwrap();
        assert_eq!(manager.identity_key().unwrap(), public);
    }

    #[test]
    fn second_generation_is_rejected() {
        let manager = manager();
        let first = manager.generate_identity_key_pair().unwrap();

        assert_eq!(manager.generate_identity_key_pair(), Err(KeyError::IdentityAlreadyExists));
        assert_eq!(manager.identity_key().unwrap(), first);
    }

    #[test]
    fn missing_identity_is_reported() {
        assert_eq!(manager().identity_key(), Err(KeyError::MissingIdentity));
    }
}
