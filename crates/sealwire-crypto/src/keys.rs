//! Identity and prekey key material
//!
//! Identity keys are Ed25519 and only ever sign. Prekeys are X25519 and only
//! ever take part in key agreement. Keeping the two curves in separate types
//! makes it impossible to sign with a prekey or agree with an identity key.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Size of every public and private key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Long-term identity keypair of the local account.
///
/// Created once at registration and never rotated. The private half is
/// zeroized when the keypair is dropped.
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing: SigningKey,
}

impl IdentityKeyPair {
    /// Derive an identity keypair from 32 random bytes.
    pub fn from_seed(seed: [u8; KEY_SIZE]) -> Self {
        Self { signing: SigningKey::from_bytes(&seed) }
    }

    /// Restore an identity keypair from its serialized private key.
    pub fn from_private_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let seed: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::KeyFormat {
            reason: format!("identity private key must be {KEY_SIZE} bytes, got {}", bytes.len()),
        })?;
        Ok(Self::from_seed(seed))
    }

    /// Serialized private key. Callers are responsible for zeroizing the copy.
    pub fn private_bytes(&self) -> [u8; KEY_SIZE] {
        self.signing.to_bytes()
    }

    /// Public half of this keypair.
    pub fn public_key(&self) -> IdentityKey {
        IdentityKey(self.signing.verifying_key().to_bytes())
    }

    /// Sign `message` with the identity private key.
    ///
    /// Signing is deterministic for Ed25519; the only failure mode is a broken
    /// primitive, which is reported as [`CryptoError::SigningFailed`].
    pub fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_SIZE], CryptoError> {
        self.signing
            .try_sign(message)
            .map(|signature| signature.to_bytes())
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Public identity key of a local or remote account.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey([u8; KEY_SIZE]);

impl IdentityKey {
    /// Parse an identity key, rejecting bytes that are not a curve point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::KeyFormat {
            reason: format!("identity key must be {KEY_SIZE} bytes, got {}", bytes.len()),
        })?;
        VerifyingKey::from_bytes(&array)
            .map_err(|e| CryptoError::KeyFormat { reason: e.to_string() })?;
        Ok(Self(array))
    }

    /// Raw public key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Verify an Ed25519 signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let verifying = VerifyingKey::from_bytes(&self.0)
            .map_err(|e| CryptoError::KeyFormat { reason: e.to_string() })?;
        let signature: [u8; SIGNATURE_SIZE] =
            signature.try_into().map_err(|_| CryptoError::InvalidSignature)?;

        verifying
            .verify(message, &Signature::from_bytes(&signature))
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKey(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// X25519 keypair backing a one-time or signed prekey.
///
/// Stored verbatim in the key material store. The private half is zeroized
/// when the value is dropped.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    public: [u8; KEY_SIZE],
    private: [u8; KEY_SIZE],
}

impl KeyPair {
    /// Derive a keypair from 32 random bytes.
    pub fn from_seed(seed: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(seed);
        let public = PublicKey::from(&secret);
        Self { public: public.to_bytes(), private: secret.to_bytes() }
    }

    /// Rebuild a keypair from stored halves, checking that they belong
    /// together.
    pub fn from_parts(
        public: [u8; KEY_SIZE],
        private: [u8; KEY_SIZE],
    ) -> Result<Self, CryptoError> {
        let derived = Self::from_seed(private);
        if derived.public != public {
            return Err(CryptoError::KeyFormat {
                reason: "public key does not match private key".to_string(),
            });
        }
        Ok(derived)
    }

    /// Serialized public key, the exact bytes a signed prekey signature covers.
    pub fn public_key(&self) -> &[u8; KEY_SIZE] {
        &self.public
    }

    /// Serialized private key.
    pub fn private_key(&self) -> &[u8; KEY_SIZE] {
        &self.private
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.private.zeroize();
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair(")?;
        for byte in &self.public[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_signature_verifies() {
        let identity = IdentityKeyPair::from_seed([7u8; 32]);
        let signature = identity.sign(b"prekey").unwrap();

        assert!(identity.public_key().verify(b"prekey", &signature).is_ok());
        assert_eq!(
            identity.public_key().verify(b"other", &signature),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn identity_roundtrips_through_private_bytes() {
        let identity = IdentityKeyPair::from_seed([3u8; 32]);
        let restored = IdentityKeyPair::from_private_bytes(&identity.private_bytes()).unwrap();

        assert_eq!(identity.public_key(), restored.public_key());
    }

    #[test]
    fn short_private_key_is_key_format_error() {
        let result = IdentityKeyPair::from_private_bytes(&[0u8; 31]);
        assert!(matches!(result, Err(CryptoError::KeyFormat { .. })));
    }

    #[test]
    fn truncated_signature_is_rejected() {
        let identity = IdentityKeyPair::from_seed([9u8; 32]);
        let signature = identity.sign(b"msg").unwrap();

        assert_eq!(
            identity.public_key().verify(b"msg", &signature[..63]),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn keypair_is_deterministic_per_seed() {
        let a = KeyPair::from_seed([1u8; 32]);
        let b = KeyPair::from_seed([1u8; 32]);
        let c = KeyPair::from_seed([2u8; 32]);

        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());
    }

    #[test]
    fn mismatched_parts_are_rejected() {
        let a = KeyPair::from_seed([1u8; 32]);
        let c = KeyPair::from_seed([2u8; 32]);

        assert!(KeyPair::from_parts(*a.public_key(), *a.private_key()).is_ok());
        assert!(matches!(
            KeyPair::from_parts(*c.public_key(), *a.private_key()),
            Err(CryptoError::KeyFormat { .. })
        ));
    }

    #[test]
    fn debug_does_not_print_private_key() {
        let pair = KeyPair::from_seed([0xAB; 32]);
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains("abababab"));
    }
}
