//! Key material storage abstraction
//!
//! Trait-based abstraction for persisting identity keys, prekeys, sessions and
//! sender keys. The trait is synchronous (no async), matching the synchronous
//! key-management API.
//!
//! Stores are NOT safe for concurrent writers. Every access from the managers
//! in this crate happens under [`crate::SessionLock`].

use std::{collections::BTreeSet, thread::ThreadId};

use sealwire_crypto::IdentityKeyPair;

use crate::address::{DistributionId, ProtocolAddress};

mod chaotic;
mod error;
mod memory;
mod records;
mod redb;

pub use chaotic::ChaoticKeyStore;
pub use error::StoreError;
pub use memory::MemoryKeyStore;
pub use records::{
    MAX_ARCHIVED_STATES, PRE_KEY_ID_MASK, PreKeyMetadata, PreKeyRecord, SenderKeyRecord,
    SessionRecord, SessionState, SignedPreKeyRecord,
};

pub use self::redb::RedbKeyStore;

/// Persistent store of all protocol key material.
///
/// Must be Clone (shared by every manager), Send + Sync, and synchronous.
/// Implementations share internal state via Arc, so clones access the same
/// underlying storage.
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned (a thread panicked while holding a lock).
pub trait KeyMaterialStore: Clone + Send + Sync + 'static {
    /// Local identity keypair, `None` before registration.
    fn load_identity_key_pair(&self) -> Result<Option<IdentityKeyPair>, StoreError>;

    /// Store the local identity keypair, replacing any existing one.
    fn store_identity_key_pair(&self, key_pair: &IdentityKeyPair) -> Result<(), StoreError>;

    /// Load a one-time prekey.
    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, StoreError>;

    /// Store a one-time prekey, overwriting any record with the same id.
    fn store_pre_key(&self, record: &PreKeyRecord) -> Result<(), StoreError>;

    /// Remove a one-time prekey. Removing a missing id is a no-op.
    fn remove_pre_key(&self, id: u32) -> Result<(), StoreError>;

    /// Number of one-time prekeys still available.
    fn pre_key_count(&self) -> Result<usize, StoreError>;

    /// Load a signed prekey.
    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, StoreError>;

    /// All signed prekeys, in id order.
    fn load_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>, StoreError>;

    /// Store a signed prekey, overwriting any record with the same id.
    fn store_signed_pre_key(&self, record: &SignedPreKeyRecord) -> Result<(), StoreError>;

    /// Remove a signed prekey. Removing a missing id is a no-op.
    fn remove_signed_pre_key(&self, id: u32) -> Result<(), StoreError>;

    /// Prekey counters and active signed prekey id.
    fn load_pre_key_metadata(&self) -> Result<PreKeyMetadata, StoreError>;

    /// Replace the prekey counters and active signed prekey id.
    fn store_pre_key_metadata(&self, metadata: &PreKeyMetadata) -> Result<(), StoreError>;

    /// Load the session record for a peer device.
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, StoreError>;

    /// Store the session record for a peer device.
    fn store_session(
        &self,
        address: &ProtocolAddress,
        record: &SessionRecord,
    ) -> Result<(), StoreError>;

    /// Device ids with a stored session record for account `name`, ascending.
    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>, StoreError>;

    /// Every address with a stored session record.
    fn session_addresses(&self) -> Result<Vec<ProtocolAddress>, StoreError>;

    /// Load sender-key state.
    fn load_sender_key(
        &self,
        address: &ProtocolAddress,
        distribution_id: DistributionId,
    ) -> Result<Option<SenderKeyRecord>, StoreError>;

    /// Store sender-key state.
    fn store_sender_key(
        &self,
        address: &ProtocolAddress,
        distribution_id: DistributionId,
        record: &SenderKeyRecord,
    ) -> Result<(), StoreError>;

    /// Delete sender-key state. Deleting missing state is a no-op.
    fn delete_sender_key(
        &self,
        address: &ProtocolAddress,
        distribution_id: DistributionId,
    ) -> Result<(), StoreError>;

    /// Delete every sender-key state.
    fn delete_all_sender_keys(&self) -> Result<(), StoreError>;

    /// Peers that have received our sender key for `distribution_id`.
    fn shared_with(
        &self,
        distribution_id: DistributionId,
    ) -> Result<BTreeSet<ProtocolAddress>, StoreError>;

    /// Record that `addresses` have received our sender key.
    fn mark_shared(
        &self,
        distribution_id: DistributionId,
        addresses: &[ProtocolAddress],
    ) -> Result<(), StoreError>;

    /// Forget who has received our sender key for `distribution_id`.
    fn delete_shared(&self, distribution_id: DistributionId) -> Result<(), StoreError>;

    /// Forget every shared record.
    fn delete_all_shared(&self) -> Result<(), StoreError>;
}

/// A store whose own write transaction can serve as the session lock.
///
/// At most one thread owns the transaction at a time; `begin_transaction`
/// blocks until the slot is free. While a thread owns the transaction, its
/// store operations see its uncommitted writes and other threads' store
/// operations block.
pub trait TransactionHost: Clone + Send + Sync + 'static {
    /// Thread currently owning the open transaction.
    ///
    /// Diagnostic only: the answer may be stale by the time it is read.
    fn transaction_owner(&self) -> Option<ThreadId>;

    /// Whether the calling thread owns the open transaction.
    fn in_transaction(&self) -> bool {
        self.transaction_owner() == Some(std::thread::current().id())
    }

    /// Begin a transaction owned by the calling thread.
    ///
    /// # Invariants
    ///
    /// - Pre: the calling thread does not already own a transaction
    fn begin_transaction(&self) -> Result<(), StoreError>;

    /// End the calling thread's transaction, committing if `successful` and
    /// rolling back otherwise.
    fn end_transaction(&self, successful: bool) -> Result<(), StoreError>;
}
