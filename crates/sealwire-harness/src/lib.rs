//! Deterministic test harness for sealwire.
//!
//! Provides the pieces integration tests need to drive the protocol core
//! without a network or an OS RNG:
//!
//! - [`SimEnv`]: seeded ChaCha RNG and a manual clock
//! - [`RecordingJobQueue`], [`ScriptedDirectory`],
//!   [`MemoryAttachmentRepository`]: host-application collaborators that
//!   record what the router asked of them
//! - [`fixtures`]: certificate authorities, peers with signed bundles and
//!   recipient snapshots
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties of a [`KeyStoreSnapshot`] that
//! must hold after any sequence of operations. Use
//! [`InvariantRegistry::standard()`] for the common key store invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod collaborators;
pub mod fixtures;
pub mod invariants;
pub mod sim_env;

pub use collaborators::{MemoryAttachmentRepository, RecordingJobQueue, ScriptedDirectory};
pub use invariants::{
    ActiveSignedPreKeyStored, Invariant, InvariantRegistry, InvariantResult, KeyStoreSnapshot,
    PreKeyIdsInRange, SessionArchiveBounded, Violation,
};
pub use sim_env::{SIM_EPOCH_MILLIS, SimEnv};
