//! Production Environment implementation using the system clock and OS RNG.
//!
//! Behavior is non-deterministic: timestamps come from the wall clock and
//! key material from getrandom.

use sealwire_core::Environment;

/// Production environment using wall-clock time and cryptographic RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. Key generation without functioning
/// randomness would produce predictable identity and prekey material, so
/// there is nothing safe to fall back to.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    #[allow(clippy::expect_used)]
    fn now_millis(&self) -> u64 {
        let elapsed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after Unix epoch (1970-01-01)");
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable");
    }
}
