//! Chaotic key store wrapper for fault injection testing
//!
//! Store wrapper that randomly fails operations to test that failures inside
//! a locked critical section never leave key material half-written. Only
//! record operations fail; transaction begin and end are forwarded as-is so
//! rollback itself stays reliable.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
    thread::ThreadId,
};

use sealwire_crypto::IdentityKeyPair;

use super::{
    KeyMaterialStore, PreKeyMetadata, PreKeyRecord, SenderKeyRecord, SessionRecord,
    SignedPreKeyRecord, StoreError, TransactionHost,
};
use crate::address::{DistributionId, ProtocolAddress};

/// Chaotic store wrapper that randomly injects I/O failures
///
/// Delegates to an underlying store but fails operations with probability
/// `failure_rate`. Uses Arc<Mutex<>> for the RNG state, making it Clone and
/// thread-safe.
#[derive(Clone)]
pub struct ChaoticKeyStore<S> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
}

/// Simple deterministic RNG for chaos injection
///
/// Uses linear congruential generator (LCG) for fast, deterministic randomness.
/// This ensures chaos tests are reproducible with the same seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: KeyMaterialStore> ChaoticKeyStore<S> {
    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self { inner, failure_rate, rng: Arc::new(Mutex::new(ChaoticRng::new(seed))) }
    }

    /// Underlying store (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail with probability `failure_rate`.
    fn inject(&self) -> Result<(), StoreError> {
        #[allow(clippy::expect_used)]
        let roll = self.rng.lock().expect("ChaoticRng mutex poisoned").next();
        if roll < self.failure_rate {
            return Err(StoreError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

impl<S: KeyMaterialStore> KeyMaterialStore for ChaoticKeyStore<S> {
    fn load_identity_key_pair(&self) -> Result<Option<IdentityKeyPair>, StoreError> {
        self.inject()?;
        self.inner.load_identity_key_pair()
    }

    fn store_identity_key_pair(&self, key_pair: &IdentityKeyPair) -> Result<(), StoreError> {
        self.inject()?;
        self.inner.store_identity_key_pair(key_pair)
    }

    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, StoreError> {
        self.inject()?;
        self.inner.load_pre_key(id)
    }

    fn store_pre_key(&self, record: &PreKeyRecord) -> Result<(), StoreError> {
        self.inject()?;
        self.inner.store_pre_key(record)
    }

    fn remove_pre_key(&self, id: u32) -> Result<(), StoreError> {
        self.inject()?;
        self.inner.remove_pre_key(id)
    }

    fn pre_key_count(&self) -> Result<usize, StoreError> {
        self.inject()?;
        self.inner.pre_key_count()
    }

    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, StoreError> {
        self.inject()?;
        self.inner.load_signed_pre_key(id)
    }

    fn load_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>, StoreError> {
        self.inject()?;
        self.inner.load_signed_pre_keys()
    }

    fn store_signed_pre_key(&self, record: &SignedPreKeyRecord) -> Result<(), StoreError> {
        self.inject()?;
        self.inner.store_signed_pre_key(record)
    }

    fn remove_signed_pre_key(&self, id: u32) -> Result<(), StoreError> {
        self.inject()?;
        self.inner.remove_signed_pre_key(id)
    }

    fn load_pre_key_metadata(&self) -> Result<PreKeyMetadata, StoreError> {
        self.inject()?;
        self.inner.load_pre_key_metadata()
    }

    fn store_pre_key_metadata(&self, metadata: &PreKeyMetadata) -> Result<(), StoreError> {
        self.inject()?;
        self.inner.store_pre_key_metadata(metadata)
    }

    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, StoreError> {
        self.inject()?;
        self.inner.load_session(address)
    }

    fn store_session(
        &self,
        address: &ProtocolAddress,
        record: &SessionRecord,
    ) -> Result<(), StoreError> {
        self.inject()?;
        self.inner.store_session(address, record)
    }

    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>, StoreError> {
        self.inject()?;
        self.inner.sub_device_sessions(name)
    }

    fn session_addresses(&self) -> Result<Vec<ProtocolAddress>, StoreError> {
        self.inject()?;
        self.inner.session_addresses()
    }

    fn load_sender_key(
        &self,
        address: &ProtocolAddress,
        distribution_id: DistributionId,
    ) -> Result<Option<SenderKeyRecord>, StoreError> {
        self.inject()?;
        self.inner.load_sender_key(address, distribution_id)
    }

    fn store_sender_key(
        &self,
        address: &ProtocolAddress,
        distribution_id: DistributionId,
        record: &SenderKeyRecord,
    ) -> Result<(), StoreError> {
        self.inject()?;
        self.inner.store_sender_key(address, distribution_id, record)
    }

    fn delete_sender_key(
        &self,
        address: &ProtocolAddress,
        distribution_id: DistributionId,
    ) -> Result<(), StoreError> {
        self.inject()?;
        self.inner.delete_sender_key(address, distribution_id)
    }

    fn delete_all_sender_keys(&self) -> Result<(), StoreError> {
        self.inject()?;
        self.inner.delete_all_sender_keys()
    }

    fn shared_with(
        &self,
        distribution_id: DistributionId,
    ) -> Result<BTreeSet<ProtocolAddress>, StoreError> {
        self.inject()?;
        self.inner.shared_with(distribution_id)
    }

    fn mark_shared(
        &self,
        distribution_id: DistributionId,
        addresses: &[ProtocolAddress],
    ) -> Result<(), StoreError> {
        self.inject()?;
        self.inner.mark_shared(distribution_id, addresses)
    }

    fn delete_shared(&self, distribution_id: DistributionId) -> Result<(), StoreError> {
        self.inject()?;
        self.inner.delete_shared(distribution_id)
    }

    fn delete_all_shared(&self) -> Result<(), StoreError> {
        self.inject()?;
        self.inner.delete_all_shared()
    }
}

impl<S: KeyMaterialStore + TransactionHost> TransactionHost for ChaoticKeyStore<S> {
    fn transaction_owner(&self) -> Option<ThreadId> {
        self.inner.transaction_owner()
    }

    fn begin_transaction(&self) -> Result<(), StoreError> {
        self.inner.begin_transaction()
    }

    fn end_transaction(&self, successful: bool) -> Result<(), StoreError> {
        self.inner.end_transaction(successful)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKeyStore;

    #[test]
    fn zero_rate_never_fails() {
        let store = ChaoticKeyStore::with_seed(MemoryKeyStore::new(), 0.0, 1);
        for _ in 0..100 {
            assert!(store.pre_key_count().is_ok());
        }
    }

    #[test]
    fn full_rate_always_fails() {
        let store = ChaoticKeyStore::with_seed(MemoryKeyStore::new(), 1.0, 1);
        assert!(matches!(store.pre_key_count(), Err(StoreError::Io(_))));
    }

    #[test]
    fn transactions_bypass_chaos() {
        let store = ChaoticKeyStore::with_seed(MemoryKeyStore::new(), 1.0, 1);
        store.begin_transaction().unwrap();
        store.end_transaction(false).unwrap();
    }
}
