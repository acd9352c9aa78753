//! Our group sender keys
//!
//! Group sends encrypt once with a sender key and distribute that key to each
//! member over their pairwise session. Rotating deletes both our key and the
//! record of who received it; the next group send regenerates and
//! redistributes.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use crate::{
    address::{DistributionId, ProtocolAddress},
    env::Environment,
    error::KeyError,
    lock::{SessionLock, SessionLockGuard, with_session_lock},
    store::{KeyMaterialStore, SenderKeyRecord},
};

/// Rotates and clears the local account's sender keys.
#[derive(Clone)]
pub struct SenderKeyManager<S, E> {
    store: S,
    env: E,
    lock: Arc<dyn SessionLock>,
    local_address: ProtocolAddress,
}

impl<S: KeyMaterialStore, E: Environment> SenderKeyManager<S, E> {
    /// Create a manager for the sender keys of `local_address`.
    pub fn new(
        store: S,
        env: E,
        lock: Arc<dyn SessionLock>,
        local_address: ProtocolAddress,
    ) -> Self {
        Self { store, env, lock, local_address }
    }

    /// Address our sender keys are stored under.
    pub fn local_address(&self) -> &ProtocolAddress {
        &self.local_address
    }

    /// Delete our sender key and its shared record for `distribution_id`.
    pub fn rotate_our_key(&self, distribution_id: DistributionId) -> Result<(), KeyError> {
        with_session_lock(&*self.lock, |_guard| {
            self.store.delete_sender_key(&self.local_address, distribution_id)?;
            self.store.delete_shared(distribution_id)?;
            tracing::info!(distribution = %distribution_id, "Rotated sender key");
            Ok(())
        })
    }

    /// Creation time of our sender key in unix millis, `-1` when absent.
    ///
    /// Takes no session lock; the answer is a point-in-time read.
    pub fn created_time(&self, distribution_id: DistributionId) -> Result<i64, KeyError> {
        let created = self
            .store
            .load_sender_key(&self.local_address, distribution_id)?
            .map_or(-1, |record| i64::try_from(record.created_at_millis).unwrap_or(i64::MAX));
        Ok(created)
    }

    /// Rotate our sender key if it is older than `max_age`.
    ///
    /// Returns whether a rotation happened. A missing key is not rotated;
    /// the next send creates one anyway.
    pub fn rotate_if_older_than(
        &self,
        distribution_id: DistributionId,
        max_age: Duration,
    ) -> Result<bool, KeyError> {
        with_session_lock(&*self.lock, |_guard| {
            let Some(record) = self.store.load_sender_key(&self.local_address, distribution_id)?
            else {
                return Ok(false);
            };

            let age = self.env.now_millis().saturating_sub(record.created_at_millis);
            if u128::from(age) <= max_age.as_millis() {
                return Ok(false);
            }

            self.rotate_our_key(distribution_id)?;
            tracing::debug!(
                distribution = %distribution_id,
                age_millis = age,
                "Sender key expired"
            );
            Ok(true)
        })
    }

    /// Wipe every sender key and shared record.
    ///
    /// Only for full re-registration.
    pub fn clear_all_state(&self) -> Result<(), KeyError> {
        with_session_lock(&*self.lock, |_guard| {
            self.store.delete_all_sender_keys()?;
            self.store.delete_all_shared()?;
            tracing::info!("Cleared all sender key state");
            Ok(())
        })
    }

    /// Persist freshly created sender key state for `distribution_id`.
    pub fn save_our_key(
        &self,
        guard: &SessionLockGuard<'_>,
        distribution_id: DistributionId,
        state: Vec<u8>,
    ) -> Result<(), KeyError> {
        guard.ensure_held(&*self.lock)?;
        let record = SenderKeyRecord { state, created_at_millis: self.env.now_millis() };
        self.store.store_sender_key(&self.local_address, distribution_id, &record)?;
        Ok(())
    }

    /// Record that `addresses` received our sender key.
    pub fn mark_shared(
        &self,
        guard: &SessionLockGuard<'_>,
        distribution_id: DistributionId,
        addresses: &[ProtocolAddress],
    ) -> Result<(), KeyError> {
        guard.ensure_held(&*self.lock)?;
        self.store.mark_shared(distribution_id, addresses)?;
        Ok(())
    }

    /// Peers that already hold our sender key for `distribution_id`.
    pub fn shared_with(
        &self,
        distribution_id: DistributionId,
    ) -> Result<BTreeSet<ProtocolAddress>, KeyError> {
        with_session_lock(&*self.lock, |_guard| Ok(self.store.shared_with(distribution_id)?))
    }
}
