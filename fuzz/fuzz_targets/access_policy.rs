//! Fuzz target for sealed-sender access key selection
//!
//! # Invariants
//!
//! - Unknown access mode wire values are rejected, known ones round-trip
//! - Unrestricted mode always yields the all-zero key
//! - Disabled mode never yields a key
//! - A derived key is never the unrestricted key

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sealwire_core::{access_key_for, AccessMode};
use sealwire_crypto::{ProfileKey, UNRESTRICTED_ACCESS_KEY};

#[derive(Debug, Arbitrary)]
struct Input {
    mode: u8,
    profile_key: Option<[u8; 32]>,
    is_for_story: bool,
}

fuzz_target!(|input: Input| {
    let Ok(mode) = AccessMode::try_from(input.mode) else {
        assert!(input.mode > 3);
        return;
    };
    assert_eq!(u8::from(mode), input.mode);

    let profile_key = input.profile_key.map(ProfileKey::from_bytes);
    let key = access_key_for(mode, profile_key.as_ref(), input.is_for_story);

    match mode {
        AccessMode::Unrestricted => assert_eq!(key, Some(UNRESTRICTED_ACCESS_KEY)),
        AccessMode::Disabled => assert!(key.is_none()),
        AccessMode::Enabled | AccessMode::Unknown if profile_key.is_some() => {
            assert!(key.is_some_and(|key| !key.is_unrestricted()));
        },
        AccessMode::Enabled | AccessMode::Unknown => {},
    }
});
