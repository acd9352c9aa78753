//! Sealwire Cryptographic Primitives
//!
//! Cryptographic building blocks for sealwire key management. Pure functions
//! with deterministic outputs. Callers provide random bytes (seeds) so that
//! key generation is reproducible under a seeded test environment.
//!
//! # Key Hierarchy
//!
//! ```text
//! Identity Key (Ed25519, long-term)
//!        │
//!        ├── signs ──► Signed PreKey (X25519, medium-term, rotated)
//!        │
//!        └── One-time PreKeys (X25519, consumed once, unsigned)
//!
//! Trust Root (Ed25519, hard-coded by the embedding application)
//!        │
//!        └── signs ──► Server Certificate
//!                             │
//!                             └── signs ──► Sender Certificate
//!
//! Profile Key (32 bytes) ── HKDF ──► Access Key (16 bytes)
//! ```
//!
//! # Security
//!
//! - Private key material is zeroized on drop
//! - Signatures are Ed25519 over the exact serialized public key bytes
//! - Access keys are a one-way function of the profile key; the profile key
//!   cannot be recovered from an access key

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod access;
pub mod certificate;
mod error;
pub mod keys;

pub use access::{
    ACCESS_KEY_SIZE, AccessKey, PROFILE_KEY_SIZE, ProfileKey, UNRESTRICTED_ACCESS_KEY,
    derive_access_key,
};
pub use certificate::{SenderCertificate, ServerCertificate};
pub use error::{CertificateError, CryptoError};
pub use keys::{IdentityKey, IdentityKeyPair, KEY_SIZE, KeyPair, SIGNATURE_SIZE};
