//! Sealwire key maintenance CLI.
//!
//! Thin wrapper running one key lifecycle command against a durable
//! [`sealwire_core::RedbKeyStore`], guarded by the store's own transaction.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod commands;
mod error;
pub mod system_env;

pub use commands::{Command, Outcome, execute};
pub use error::CliError;
pub use system_env::SystemEnv;
