//! Sealwire Protocol Core
//!
//! Key lifecycle and session management for an end-to-end encrypted
//! messaging client. This crate does not implement the ratchet itself; it
//! orchestrates the key material that a ratchet library consumes and decides
//! how outgoing messages leave the device.
//!
//! # Components
//!
//! ```text
//!                      ┌────────────────────────┐
//!   OutgoingMessage ──►│ MessageTransportRouter │──► JobQueue (external)
//!                      └───┬────────────────┬───┘
//!                          │                │
//!       SealedSenderAccessResolver    SenderKeyManager
//!                                           │
//!   PreKeyManager   IdentityKeyManager   SessionStateManager
//!         │                 │                │
//!         └─────────────────┴─ SessionLock ──┴──► KeyMaterialStore
//! ```
//!
//! [`ProtocolCore`] owns the single [`SessionLock`] and hands it to every
//! manager. Mutating session operations take a [`SessionLockGuard`] as proof
//! that the caller holds the lock, so several of them can be composed inside
//! one critical section.
//!
//! # Concurrency
//!
//! Everything here is synchronous. [`SessionLock::acquire`] blocks, and the
//! router's directory refresh blocks on the network; neither may be called
//! from a UI thread.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod address;
pub mod config;
pub mod env;
mod error;
pub mod identity;
pub mod lock;
pub mod prekeys;
mod protocol;
pub mod recipient;
pub mod router;
pub mod sealed;
pub mod sender_keys;
pub mod sessions;
pub mod store;

#[cfg(test)]
pub(crate) mod test_env;

pub use address::{DistributionId, PRIMARY_DEVICE_ID, ProtocolAddress, RecipientId};
pub use config::CoreConfig;
pub use env::Environment;
pub use error::{KeyError, PolicyError};
pub use identity::IdentityKeyManager;
pub use lock::{
    LockError, ReentrantSessionLock, SessionLock, SessionLockGuard, TransactionalSessionLock,
    with_session_lock,
};
pub use prekeys::{PRE_KEY_BATCH_SIZE, PreKeyManager};
pub use protocol::{ProtocolCore, RegistrationKeys};
pub use recipient::{AccountSnapshot, AccountState, RecipientSnapshot, Registration};
pub use router::{
    BroadcastOutcome, GroupSendPlan, MessageTransportRouter, Route, RouteError, RouterServices,
    SendOutcome,
};
pub use sealed::{
    AccessMode, AccessSummary, CertificateFetchError, ResolvedAccess, SealedSenderAccess,
    SealedSenderAccessResolver, SenderCertificateCache, access_key_for,
};
pub use sender_keys::SenderKeyManager;
pub use sessions::{PreKeyBundle, SessionStateManager};
pub use store::{
    ChaoticKeyStore, KeyMaterialStore, MemoryKeyStore, RedbKeyStore, StoreError, TransactionHost,
};
