//! Error types for key management.
//!
//! Every error is classified by [`KeyError::is_fatal`]. Fatal errors mean
//! local corruption, a broken primitive or a logic bug and must not be
//! retried. Everything else is a statement about the environment (disk,
//! peer data) and the caller decides whether to retry.

use sealwire_crypto::CryptoError;
use thiserror::Error;

use crate::{address::ProtocolAddress, lock::LockError, store::StoreError};

/// Errors from the key lifecycle managers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Key material could not be produced or parsed
    #[error("key format error: {0}")]
    KeyFormat(String),

    /// Operation needs the local identity keypair, which does not exist yet
    #[error("no local identity key pair")]
    MissingIdentity,

    /// Identity keypair generation was requested a second time
    #[error("local identity key pair already exists")]
    IdentityAlreadyExists,

    /// Signed prekey id is not in the store
    #[error("unknown signed prekey {id}")]
    UnknownSignedPreKey {
        /// Requested signed prekey id
        id: u32,
    },

    /// Peer's prekey bundle signature does not verify under its identity key
    #[error("untrusted prekey bundle from {0}")]
    UntrustedBundle(ProtocolAddress),

    /// Key material store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Session lock failed
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl KeyError {
    /// Returns true if this error must not be retried or swallowed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::KeyFormat(_)
            | Self::MissingIdentity
            | Self::IdentityAlreadyExists
            | Self::UnknownSignedPreKey { .. } => true,
            Self::UntrustedBundle(_) => false,
            Self::Store(err) => err.is_fatal(),
            Self::Lock(err) => err.is_fatal(),
        }
    }
}

impl From<CryptoError> for KeyError {
    fn from(err: CryptoError) -> Self {
        Self::KeyFormat(err.to_string())
    }
}

/// Recipient policy violations.
///
/// The access-mode enumeration is closed; a value outside it means the
/// recipient database holds data this build cannot interpret.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Access mode wire value outside 0..=3
    #[error("unknown access mode {0}")]
    UnknownAccessMode(u8),
}

impl PolicyError {
    /// Policy violations are always fatal.
    pub fn is_fatal(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_failure_is_fatal() {
        let err = KeyError::from(CryptoError::SigningFailed("broken".to_string()));
        assert!(matches!(err, KeyError::KeyFormat(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn untrusted_bundle_is_recoverable() {
        assert!(!KeyError::UntrustedBundle(ProtocolAddress::new("bob", 1)).is_fatal());
    }

    #[test]
    fn store_io_is_recoverable() {
        assert!(!KeyError::Store(StoreError::Io("busy".to_string())).is_fatal());
        assert!(KeyError::Store(StoreError::Serialization("eof".to_string())).is_fatal());
    }

    #[test]
    fn unknown_access_mode_is_fatal() {
        assert!(PolicyError::UnknownAccessMode(9).is_fatal());
    }
}
