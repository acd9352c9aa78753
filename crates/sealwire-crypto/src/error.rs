//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from key handling and signing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key bytes do not describe a valid key
    #[error("malformed key: {reason}")]
    KeyFormat {
        /// What was wrong with the key bytes
        reason: String,
    },

    /// The signing primitive refused to produce a signature
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Signature does not verify under the given public key
    #[error("signature verification failed")]
    InvalidSignature,

    /// Encoding or decoding of locally produced data failed
    #[error("codec error: {0}")]
    Codec(String),
}

impl CryptoError {
    /// Returns true if this error indicates local corruption or a broken
    /// primitive rather than bad input from a peer.
    ///
    /// A failed verification is a statement about the peer's data, so it is
    /// the only recoverable variant.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::KeyFormat { .. } | Self::SigningFailed(_) | Self::Codec(_) => true,
            Self::InvalidSignature => false,
        }
    }
}

/// Errors from sender certificate validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
    /// Certificate bytes could not be decoded
    #[error("malformed certificate: {0}")]
    Malformed(String),

    /// Server certificate was not signed by the trust root
    #[error("server certificate {key_id} is not signed by the trust root")]
    UntrustedServer {
        /// Key id of the offending server certificate
        key_id: u32,
    },

    /// Sender certificate was not signed by its server certificate
    #[error("sender certificate signature is invalid")]
    InvalidSenderSignature,

    /// Sender certificate is past its expiry time
    #[error("sender certificate expired at {expires_at_millis}, now {now_millis}")]
    Expired {
        /// Expiry timestamp (unix millis)
        expires_at_millis: u64,
        /// Validation timestamp (unix millis)
        now_millis: u64,
    },
}

impl CertificateError {
    /// Certificate failures are configuration errors and never retried.
    pub fn is_fatal(&self) -> bool {
        true
    }
}

impl From<CryptoError> for CertificateError {
    fn from(err: CryptoError) -> Self {
        Self::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invalid_signature_is_recoverable() {
        assert!(!CryptoError::InvalidSignature.is_fatal());
        assert!(CryptoError::SigningFailed("rng".to_string()).is_fatal());
        assert!(CryptoError::KeyFormat { reason: "short".to_string() }.is_fatal());
        assert!(CryptoError::Codec("eof".to_string()).is_fatal());
    }

    #[test]
    fn error_display() {
        let err = CertificateError::Expired { expires_at_millis: 10, now_millis: 20 };
        assert_eq!(err.to_string(), "sender certificate expired at 10, now 20");
    }
}
