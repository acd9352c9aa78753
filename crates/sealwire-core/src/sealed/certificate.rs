//! Locally cached sender certificate

use std::sync::Arc;

use sealwire_crypto::{IdentityKey, SenderCertificate};
use thiserror::Error;

/// Fetching a fresh sender certificate from the server failed.
///
/// Recoverable: sealed delivery is skipped for the current attempt only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("sender certificate fetch failed: {0}")]
pub struct CertificateFetchError(pub String);

impl CertificateFetchError {
    /// Network failures are never fatal.
    pub fn is_fatal(&self) -> bool {
        false
    }
}

/// Sender certificate validated once at startup.
///
/// A certificate that fails validation disables sealed delivery for the
/// whole process; it is not re-checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderCertificateCache {
    /// Chain verified against the trust root
    Valid(Arc<SenderCertificate>),
    /// No usable certificate; every send is identified
    Disabled,
}

impl SenderCertificateCache {
    /// Decode and validate a cached certificate against `trust_root`.
    pub fn validate(trust_root: &IdentityKey, encoded: &[u8], now_millis: u64) -> Self {
        let certificate = match SenderCertificate::decode(encoded) {
            Ok(certificate) => certificate,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Sender certificate unreadable, sealed delivery disabled"
                );
                return Self::Disabled;
            },
        };

        match certificate.validate(trust_root, now_millis) {
            Ok(()) => {
                tracing::debug!(
                    sender = %certificate.sender,
                    expires_at = certificate.expires_at_millis,
                    "Sender certificate validated"
                );
                Self::Valid(Arc::new(certificate))
            },
            Err(e) => {
                tracing::error!(error = %e, "Sender certificate invalid, sealed delivery disabled");
                Self::Disabled
            },
        }
    }

    /// Validate the result of a certificate fetch.
    ///
    /// A fetch failure degrades to [`SenderCertificateCache::Disabled`] with
    /// a warning rather than an error.
    pub fn from_fetch(
        trust_root: &IdentityKey,
        fetched: Result<Vec<u8>, CertificateFetchError>,
        now_millis: u64,
    ) -> Self {
        match fetched {
            Ok(encoded) => Self::validate(trust_root, &encoded, now_millis),
            Err(e) => {
                tracing::warn!(error = %e, "Sender certificate unavailable, sending identified");
                Self::Disabled
            },
        }
    }

    /// The validated certificate, if any.
    pub fn certificate(&self) -> Option<&Arc<SenderCertificate>> {
        match self {
            Self::Valid(certificate) => Some(certificate),
            Self::Disabled => None,
        }
    }

    /// Whether sealed delivery is possible at all.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

#[cfg(test)]
mod tests {
    use sealwire_crypto::{IdentityKeyPair, ServerCertificate};

    use super::*;

    fn encoded(root: &IdentityKeyPair, expires_at_millis: u64) -> Vec<u8> {
        let server = IdentityKeyPair::from_seed([2; 32]);
        let signer = ServerCertificate::issue(root, 1, server.public_key()).unwrap();
        let identity = IdentityKeyPair::from_seed([3; 32]).public_key();
        SenderCertificate::issue(&server, signer, "alice", 1, expires_at_millis, identity)
            .unwrap()
            .encode()
            .unwrap()
    }

    #[test]
    fn valid_chain_enables_sealed_delivery() {
        let root = IdentityKeyPair::from_seed([1; 32]);
        let cache = SenderCertificateCache::validate(&root.public_key(), &encoded(&root, 100), 50);

        assert!(cache.is_enabled());
        assert_eq!(cache.certificate().map(|c| c.sender.as_str()), Some("alice"));
    }

    #[test]
    fn wrong_trust_root_disables() {
        let root = IdentityKeyPair::from_seed([1; 32]);
        let other = IdentityKeyPair::from_seed([9; 32]).public_key();

        assert_eq!(
            SenderCertificateCache::validate(&other, &encoded(&root, 100), 50),
            SenderCertificateCache::Disabled
        );
    }

    #[test]
    fn expired_or_garbage_disables() {
        let root = IdentityKeyPair::from_seed([1; 32]);

        let expired =
            SenderCertificateCache::validate(&root.public_key(), &encoded(&root, 100), 101);
        assert!(!expired.is_enabled());
        assert!(!SenderCertificateCache::validate(&root.public_key(), b"junk", 0).is_enabled());
    }

    #[test]
    fn fetch_failure_disables() {
        let root = IdentityKeyPair::from_seed([1; 32]).public_key();
        let cache = SenderCertificateCache::from_fetch(
            &root,
            Err(CertificateFetchError("timeout".to_string())),
            0,
        );
        assert!(!cache.is_enabled());
    }
}
