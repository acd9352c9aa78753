//! Fuzz target for sender certificate decoding and validation
//!
//! Cached certificates are read back from disk, so decoding must survive
//! truncation and corruption. The cache must turn anything it cannot verify
//! into a disabled state.
//!
//! # Invariants
//!
//! - Decoding arbitrary bytes NEVER panics
//! - Validation of a decoded certificate NEVER panics
//! - Random bytes never validate against the trust root

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealwire_core::SenderCertificateCache;
use sealwire_crypto::{IdentityKeyPair, SenderCertificate};

fuzz_target!(|data: &[u8]| {
    let trust_root = IdentityKeyPair::from_seed([0x42; 32]).public_key();

    if let Ok(certificate) = SenderCertificate::decode(data) {
        assert!(
            certificate.validate(&trust_root, 0).is_err(),
            "forged certificate validated against the trust root"
        );
    }

    let cache = SenderCertificateCache::validate(&trust_root, data, 0);
    assert!(!cache.is_enabled());
});
