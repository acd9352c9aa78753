//! One-time and signed prekey lifecycle
//!
//! One-time prekeys are generated in batches of [`PRE_KEY_BATCH_SIZE`] with
//! ids taken from a 24-bit wrapping counter. Signed prekeys are generated one
//! at a time, signed by the identity key, and exactly one of them is active.
//! Superseded signed prekeys are kept for a grace period so peers that
//! fetched the old bundle can still complete their handshake.
//!
//! # Locking
//!
//! Every operation runs under the session lock. Id allocation additionally
//! runs under a dedicated generation lock, which is always taken after the
//! session lock so the two never deadlock.

#![allow(clippy::disallowed_types, reason = "Generation lock guards no data")]

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use sealwire_crypto::KeyPair;

use crate::{
    env::Environment,
    error::KeyError,
    lock::{LockError, SessionLock, with_session_lock},
    store::{
        KeyMaterialStore, PRE_KEY_ID_MASK, PreKeyMetadata, PreKeyRecord, SignedPreKeyRecord,
    },
};

/// Number of one-time prekeys generated per batch.
pub const PRE_KEY_BATCH_SIZE: u32 = 100;

/// Serializes prekey id allocation.
///
/// Distinct from the session lock so the two exclusion domains can be audited
/// separately; only prekey counter mutation happens under it.
#[derive(Default)]
struct GenerationLock(Mutex<()>);

impl GenerationLock {
    fn enter(&self) -> Result<MutexGuard<'_, ()>, LockError> {
        self.0.lock().map_err(|_| LockError::Poisoned)
    }
}

/// Generates, activates and retires prekeys.
#[derive(Clone)]
pub struct PreKeyManager<S, E> {
    store: S,
    env: E,
    lock: Arc<dyn SessionLock>,
    generation: Arc<GenerationLock>,
    archive_age: Duration,
}

impl<S: KeyMaterialStore, E: Environment> PreKeyManager<S, E> {
    /// Create a manager over `store`, guarded by `lock`.
    ///
    /// Inactive signed prekeys older than `archive_age` are eligible for
    /// cleaning.
    pub fn new(store: S, env: E, lock: Arc<dyn SessionLock>, archive_age: Duration) -> Self {
        Self { store, env, lock, generation: Arc::new(GenerationLock::default()), archive_age }
    }

    /// Random id in `[0, 2^24)`, used to seed an unset counter.
    fn random_id(&self) -> u32 {
        self.env.random_u32() & PRE_KEY_ID_MASK
    }

    /// Generate and persist a batch of one-time prekeys.
    ///
    /// Ids are `(counter + i) mod 2^24` for `i` in `0..100`; the counter then
    /// advances by 101, leaving one unused id between consecutive batches.
    pub fn generate_one_time_pre_keys(&self) -> Result<Vec<PreKeyRecord>, KeyError> {
        with_session_lock(&*self.lock, |_guard| {
            let _generation = self.generation.enter()?;

            let mut metadata = self.store.load_pre_key_metadata()?;
            let start = metadata.next_pre_key_id.unwrap_or_else(|| self.random_id());

            let mut records = Vec::with_capacity(PRE_KEY_BATCH_SIZE as usize);
            for i in 0..PRE_KEY_BATCH_SIZE {
                let record = PreKeyRecord {
                    id: (start + i) & PRE_KEY_ID_MASK,
                    key_pair: KeyPair::from_seed(self.env.random_seed()),
                };
                self.store.store_pre_key(&record)?;
                records.push(record);
            }

            metadata.next_pre_key_id = Some((start + PRE_KEY_BATCH_SIZE + 1) & PRE_KEY_ID_MASK);
            self.store.store_pre_key_metadata(&metadata)?;

            tracing::debug!(
                first_id = start & PRE_KEY_ID_MASK,
                count = records.len(),
                "Generated one-time prekeys"
            );
            Ok(records)
        })
    }

    /// Generate, sign and persist a signed prekey.
    ///
    /// The record is persisted only after its signature exists. With
    /// `set_active` the new key becomes the published signed prekey.
    pub fn generate_signed_pre_key(
        &self,
        set_active: bool,
    ) -> Result<SignedPreKeyRecord, KeyError> {
        with_session_lock(&*self.lock, |_guard| {
            let _generation = self.generation.enter()?;

            let identity = self.store.load_identity_key_pair()?.ok_or(KeyError::MissingIdentity)?;
            let mut metadata = self.store.load_pre_key_metadata()?;
            let id = metadata.next_signed_pre_key_id.unwrap_or_else(|| self.random_id());

            let key_pair = KeyPair::from_seed(self.env.random_seed());
            let signature = identity.sign(key_pair.public_key())?;
            let record = SignedPreKeyRecord {
                id,
                key_pair,
                signature,
                created_at_millis: self.env.now_millis(),
            };
            self.store.store_signed_pre_key(&record)?;

            metadata.next_signed_pre_key_id = Some((id + 1) & PRE_KEY_ID_MASK);
            if set_active {
                metadata.active_signed_pre_key_id = Some(id);
            }
            self.store.store_pre_key_metadata(&metadata)?;

            tracing::info!(id, set_active, "Generated signed prekey");
            Ok(record)
        })
    }

    /// Delete superseded signed prekeys past the archive age.
    ///
    /// No-op without an active signed prekey. Otherwise every inactive signed
    /// prekey older than the archive age is a candidate; the most recent
    /// candidate is kept as a fallback for peers mid-handshake and the rest
    /// are deleted. Returns the number deleted.
    pub fn clean_signed_pre_keys(&self) -> Result<usize, KeyError> {
        with_session_lock(&*self.lock, |_guard| {
            let Some(active_id) = self.store.load_pre_key_metadata()?.active_signed_pre_key_id
            else {
                tracing::debug!("No active signed prekey, skipping clean");
                return Ok(0);
            };

            let now = self.env.now_millis();
            let threshold = self.archive_age.as_millis() as u64;

            let mut old: Vec<SignedPreKeyRecord> = self
                .store
                .load_signed_pre_keys()?
                .into_iter()
                .filter(|record| record.id != active_id)
                .filter(|record| now.saturating_sub(record.created_at_millis) > threshold)
                .collect();
            old.sort_by(|a, b| b.created_at_millis.cmp(&a.created_at_millis));

            let mut deleted = 0;
            for record in old.iter().skip(1) {
                self.store.remove_signed_pre_key(record.id)?;
                deleted += 1;
            }

            if deleted > 0 {
                tracing::info!(deleted, active_id, "Cleaned old signed prekeys");
            }
            Ok(deleted)
        })
    }

    /// Make an existing signed prekey the active one.
    pub fn set_active_signed_pre_key(&self, id: u32) -> Result<(), KeyError> {
        with_session_lock(&*self.lock, |_guard| {
            if self.store.load_signed_pre_key(id)?.is_none() {
                return Err(KeyError::UnknownSignedPreKey { id });
            }

            let mut metadata = self.store.load_pre_key_metadata()?;
            metadata.active_signed_pre_key_id = Some(id);
            self.store.store_pre_key_metadata(&metadata)?;
            Ok(())
        })
    }

    /// The active signed prekey, if one is set.
    pub fn active_signed_pre_key(&self) -> Result<Option<SignedPreKeyRecord>, KeyError> {
        with_session_lock(&*self.lock, |_guard| {
            match self.store.load_pre_key_metadata()?.active_signed_pre_key_id {
                Some(id) => Ok(self.store.load_signed_pre_key(id)?),
                None => Ok(None),
            }
        })
    }

    /// Remove a one-time prekey after a peer consumed it.
    ///
    /// Removing an id that is already gone is a no-op; peers may retry.
    pub fn mark_pre_key_consumed(&self, id: u32) -> Result<(), KeyError> {
        with_session_lock(&*self.lock, |_guard| {
            self.store.remove_pre_key(id)?;
            tracing::debug!(id, "Consumed one-time prekey");
            Ok(())
        })
    }

    /// Number of one-time prekeys still available to peers.
    pub fn available_pre_keys(&self) -> Result<usize, KeyError> {
        with_session_lock(&*self.lock, |_guard| Ok(self.store.pre_key_count()?))
    }

    /// Prekey counters and active signed prekey id.
    pub fn metadata(&self) -> Result<PreKeyMetadata, KeyError> {
        with_session_lock(&*self.lock, |_guard| Ok(self.store.load_pre_key_metadata()?))
    }
}
