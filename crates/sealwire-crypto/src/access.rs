//! Sealed-sender access keys
//!
//! A recipient publishes an access key derived from their profile key. A
//! sender holding the profile key can derive the same access key and present
//! it to the transport without revealing who they are.

use std::fmt;

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

/// Size of an access key in bytes.
pub const ACCESS_KEY_SIZE: usize = 16;

/// Size of a profile key in bytes.
pub const PROFILE_KEY_SIZE: usize = 32;

/// Label used for access key derivation
const ACCESS_KEY_LABEL: &[u8] = b"sealwireAccessKeyV1";

/// Access key accepted by recipients that allow sealed delivery from anyone.
pub const UNRESTRICTED_ACCESS_KEY: AccessKey = AccessKey([0u8; ACCESS_KEY_SIZE]);

/// 16-byte credential presented to the transport for sealed delivery.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessKey([u8; ACCESS_KEY_SIZE]);

impl AccessKey {
    /// Wrap raw access key bytes.
    pub const fn from_bytes(bytes: [u8; ACCESS_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw access key bytes.
    pub fn as_bytes(&self) -> &[u8; ACCESS_KEY_SIZE] {
        &self.0
    }

    /// Whether this is the all-zero unrestricted key.
    pub fn is_unrestricted(&self) -> bool {
        *self == UNRESTRICTED_ACCESS_KEY
    }
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unrestricted() {
            write!(f, "AccessKey(unrestricted)")
        } else {
            write!(f, "AccessKey(..)")
        }
    }
}

/// A recipient's profile key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileKey([u8; PROFILE_KEY_SIZE]);

impl ProfileKey {
    /// Wrap raw profile key bytes.
    pub const fn from_bytes(bytes: [u8; PROFILE_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw profile key bytes.
    pub fn as_bytes(&self) -> &[u8; PROFILE_KEY_SIZE] {
        &self.0
    }
}

impl Drop for ProfileKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProfileKey(..)")
    }
}

/// Derive the access key for a profile key.
///
/// # Security
///
/// - One-way: the profile key cannot be recovered from the access key
/// - Deterministic: the same profile key always yields the same access key
pub fn derive_access_key(profile_key: &ProfileKey) -> AccessKey {
    let hkdf = Hkdf::<Sha256>::new(None, profile_key.as_bytes());

    let mut key = [0u8; ACCESS_KEY_SIZE];
    let Ok(()) = hkdf.expand(ACCESS_KEY_LABEL, &mut key) else {
        unreachable!("16 bytes is a valid HKDF-SHA256 output length");
    };

    AccessKey(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_key_is_sixteen_zero_bytes() {
        assert_eq!(UNRESTRICTED_ACCESS_KEY.as_bytes(), &[0u8; 16]);
        assert!(UNRESTRICTED_ACCESS_KEY.is_unrestricted());
    }

    #[test]
    fn derive_is_deterministic() {
        let profile_key = ProfileKey::from_bytes([42u8; 32]);
        assert_eq!(derive_access_key(&profile_key), derive_access_key(&profile_key));
    }

    #[test]
    fn different_profile_keys_produce_different_access_keys() {
        let a = derive_access_key(&ProfileKey::from_bytes([1u8; 32]));
        let b = derive_access_key(&ProfileKey::from_bytes([2u8; 32]));
        assert_ne!(a, b);
    }

    #[test]
    fn derived_key_is_never_unrestricted() {
        let derived = derive_access_key(&ProfileKey::from_bytes([0u8; 32]));
        assert!(!derived.is_unrestricted());
    }
}
