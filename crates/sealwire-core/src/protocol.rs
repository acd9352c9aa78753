//! Composition root owning the session lock

use std::sync::Arc;

use sealwire_crypto::IdentityKey;

use crate::{
    address::ProtocolAddress,
    config::CoreConfig,
    env::Environment,
    error::KeyError,
    identity::IdentityKeyManager,
    lock::{ReentrantSessionLock, SessionLock, TransactionalSessionLock, with_session_lock},
    prekeys::PreKeyManager,
    router::{MessageTransportRouter, RouterServices},
    sealed::SealedSenderAccessResolver,
    sender_keys::SenderKeyManager,
    sessions::SessionStateManager,
    store::{KeyMaterialStore, PreKeyRecord, SignedPreKeyRecord, TransactionHost},
};

/// Key material published to the server at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationKeys {
    /// Public identity key
    pub identity_key: IdentityKey,
    /// Active signed prekey
    pub signed_pre_key: SignedPreKeyRecord,
    /// First batch of one-time prekeys
    pub one_time_pre_keys: Vec<PreKeyRecord>,
}

/// Owns the single session lock and every manager sharing it.
///
/// All managers built from one `ProtocolCore` exclude each other through the
/// same lock; building managers from separate cores over the same store
/// would not.
#[derive(Clone)]
pub struct ProtocolCore<S, E> {
    store: S,
    env: E,
    lock: Arc<dyn SessionLock>,
    config: CoreConfig,
    identity: IdentityKeyManager<S, E>,
    pre_keys: PreKeyManager<S, E>,
    sessions: SessionStateManager<S, E>,
}

impl<S: KeyMaterialStore, E: Environment> ProtocolCore<S, E> {
    /// Core guarded by an in-process reentrant lock.
    pub fn in_process(store: S, env: E, config: CoreConfig) -> Self {
        Self::with_lock(store, env, Arc::new(ReentrantSessionLock::new()), config)
    }

    /// Core whose lock is the store's own write transaction.
    ///
    /// A failed critical section rolls back everything it wrote.
    pub fn transactional(store: S, env: E, config: CoreConfig) -> Self
    where
        S: TransactionHost,
    {
        let lock = Arc::new(TransactionalSessionLock::new(store.clone()));
        Self::with_lock(store, env, lock, config)
    }

    /// Core guarded by `lock`.
    pub fn with_lock(store: S, env: E, lock: Arc<dyn SessionLock>, config: CoreConfig) -> Self {
        let identity = IdentityKeyManager::new(store.clone(), env.clone(), Arc::clone(&lock));
        let pre_keys = PreKeyManager::new(
            store.clone(),
            env.clone(),
            Arc::clone(&lock),
            config.signed_pre_key_archive_age,
        );
        let sessions = SessionStateManager::new(store.clone(), env.clone(), Arc::clone(&lock));

        Self { store, env, lock, config, identity, pre_keys, sessions }
    }

    /// The session lock shared by every manager.
    pub fn lock(&self) -> &dyn SessionLock {
        &*self.lock
    }

    /// Configuration the core was built with.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Underlying key store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Identity key manager.
    pub fn identity(&self) -> &IdentityKeyManager<S, E> {
        &self.identity
    }

    /// Prekey manager.
    pub fn pre_keys(&self) -> &PreKeyManager<S, E> {
        &self.pre_keys
    }

    /// Session state manager.
    pub fn sessions(&self) -> &SessionStateManager<S, E> {
        &self.sessions
    }

    /// Sender key manager for the local device `local_address`.
    pub fn sender_keys(&self, local_address: ProtocolAddress) -> SenderKeyManager<S, E> {
        SenderKeyManager::new(
            self.store.clone(),
            self.env.clone(),
            Arc::clone(&self.lock),
            local_address,
        )
    }

    /// Transport router for the local device `local_address`.
    pub fn router(
        &self,
        local_address: ProtocolAddress,
        resolver: Arc<SealedSenderAccessResolver>,
        services: RouterServices,
    ) -> MessageTransportRouter<S, E> {
        MessageTransportRouter::new(
            self.sender_keys(local_address),
            resolver,
            services,
            self.env.clone(),
            self.config.clone(),
        )
    }

    /// Create the identity key, the first batch of one-time prekeys and an
    /// active signed prekey in one critical section.
    ///
    /// Activating the signed prekey is the last write, so an identity without
    /// an active signed prekey marks a registration that failed partway. The
    /// in-process lock cannot roll that back; a retry reuses the identity and
    /// finishes the registration. Registering again after success is
    /// [`KeyError::IdentityAlreadyExists`].
    pub fn register(&self) -> Result<RegistrationKeys, KeyError> {
        with_session_lock(&*self.lock, |_guard| {
            let identity_key = match self.store.load_identity_key_pair()? {
                Some(existing)
                    if self.store.load_pre_key_metadata()?.active_signed_pre_key_id.is_none() =>
                {
                    tracing::warn!("Resuming interrupted registration");
                    existing.public_key()
                },
                _ => self.identity.generate_identity_key_pair()?,
            };
            let one_time_pre_keys = self.pre_keys.generate_one_time_pre_keys()?;
            let signed_pre_key = self.pre_keys.generate_signed_pre_key(true)?;

            tracing::info!(
                identity = ?identity_key,
                signed_pre_key = signed_pre_key.id,
                one_time_pre_keys = one_time_pre_keys.len(),
                "Registered key material"
            );
            Ok(RegistrationKeys { identity_key, signed_pre_key, one_time_pre_keys })
        })
    }

    /// Archive every session and drop all sender key state before the
    /// account registers again.
    pub fn reset_for_reregistration(&self, local_address: ProtocolAddress) -> Result<(), KeyError> {
        with_session_lock(&*self.lock, |guard| {
            self.sessions.archive_all_sessions(guard)?;
            self.sender_keys(local_address).clear_all_state()?;
            tracing::info!("Reset session state for re-registration");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        prekeys::PRE_KEY_BATCH_SIZE,
        store::{ChaoticKeyStore, MemoryKeyStore},
        test_env::TestEnv,
    };

    #[test]
    fn register_publishes_consistent_material() {
        let core =
            ProtocolCore::in_process(MemoryKeyStore::new(), TestEnv::new(0), CoreConfig::default());
        let keys = core.register().unwrap();

        assert_eq!(core.identity().identity_key().unwrap(), keys.identity_key);
        assert_eq!(keys.one_time_pre_keys.len(), PRE_KEY_BATCH_SIZE as usize);
        assert!(keys
            .identity_key
            .verify(keys.signed_pre_key.key_pair.public_key(), &keys.signed_pre_key.signature)
            .is_ok());
        assert_eq!(core.pre_keys().active_signed_pre_key().unwrap(), Some(keys.signed_pre_key));
    }

    #[test]
    fn failed_transactional_registration_leaves_no_identity() {
        let store = MemoryKeyStore::new();
        let chaotic = ChaoticKeyStore::with_seed(store.clone(), 1.0, 7);
        let core = ProtocolCore::transactional(chaotic, TestEnv::new(0), CoreConfig::default());

        assert!(core.register().is_err());
        assert!(store.load_identity_key_pair().unwrap().is_none());
        assert!(!store.in_transaction());
    }

    #[test]
    fn second_registration_is_rejected() {
        let core =
            ProtocolCore::in_process(MemoryKeyStore::new(), TestEnv::new(0), CoreConfig::default());
        core.register().unwrap();

        assert_eq!(core.register(), Err(KeyError::IdentityAlreadyExists));
    }

    /// INVARIANT: a recoverable store failure during in-process registration
    /// never turns into a permanent failure; retrying completes it.
    #[test]
    fn interrupted_in_process_registration_can_be_retried() {
        let mut interrupted = 0;
        for seed in 0..32 {
            let store = MemoryKeyStore::new();
            let chaotic = ChaoticKeyStore::with_seed(store.clone(), 0.05, seed);
            let flaky = ProtocolCore::in_process(chaotic, TestEnv::new(0), CoreConfig::default());

            let Err(err) = flaky.register() else { continue };
            assert!(!err.is_fatal(), "seed {seed}: injected failure reported fatal: {err}");
            interrupted += 1;
            let leftover = store.load_identity_key_pair().unwrap().map(|pair| pair.public_key());

            let reliable =
                ProtocolCore::in_process(store.clone(), TestEnv::new(0), CoreConfig::default());
            let keys =
                reliable.register().unwrap_or_else(|e| panic!("seed {seed}: retry failed: {e}"));

            if let Some(leftover) = leftover {
                assert_eq!(keys.identity_key, leftover, "seed {seed}: identity replaced");
            }
            let pre_keys = reliable.pre_keys();
            assert_eq!(pre_keys.active_signed_pre_key().unwrap(), Some(keys.signed_pre_key));
            assert!(pre_keys.available_pre_keys().unwrap() >= PRE_KEY_BATCH_SIZE as usize);
        }
        assert!(interrupted > 0, "no seed interrupted registration");
    }

    #[test]
    fn reset_drops_sender_key_state() {
        let core =
            ProtocolCore::in_process(MemoryKeyStore::new(), TestEnv::new(5), CoreConfig::default());
        let local = ProtocolAddress::primary("alice");
        let dist = crate::address::DistributionId(9);
        let sender_keys = core.sender_keys(local.clone());
        {
            let guard = core.lock().acquire().unwrap();
            sender_keys.save_our_key(&guard, dist, vec![7]).unwrap();
        }
        assert_eq!(sender_keys.created_time(dist).unwrap(), 5);

        core.reset_for_reregistration(local).unwrap();

        assert_eq!(sender_keys.created_time(dist).unwrap(), -1);
        assert!(!core.lock().is_likely_held_by_other_thread());
    }
}
