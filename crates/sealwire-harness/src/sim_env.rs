//! Seeded environment with a manual clock.
//!
//! `SimEnv` makes key generation and age-based decisions reproducible: the
//! same seed yields the same key material and prekey ids, and time only moves
//! when a test advances it.

#![allow(clippy::disallowed_types, reason = "Shared RNG state across clones")]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sealwire_core::Environment;

/// Start of simulated time, 2024-01-01T00:00:00Z in unix millis.
pub const SIM_EPOCH_MILLIS: u64 = 1_704_067_200_000;

/// Deterministic environment.
///
/// Clones share the RNG and the clock, so every manager built from one
/// `SimEnv` observes the same time.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    now_millis: Arc<AtomicU64>,
}

impl SimEnv {
    /// Environment seeded with `seed`, clock at [`SIM_EPOCH_MILLIS`].
    pub fn new(seed: u64) -> Self {
        Self::starting_at(seed, SIM_EPOCH_MILLIS)
    }

    /// Environment seeded with `seed`, clock at `now_millis`.
    pub fn starting_at(seed: u64, now_millis: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            now_millis: Arc::new(AtomicU64::new(now_millis)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.now_millis.fetch_add(millis, Ordering::SeqCst);
        tracing::trace!(millis, "Advanced simulated clock");
    }

    /// Set the clock to `now_millis`, possibly backwards.
    pub fn set_now_millis(&self, now_millis: u64) {
        self.now_millis.store(now_millis, Ordering::SeqCst);
    }
}

impl Environment for SimEnv {
    fn now_millis(&self) -> u64 {
        self.now_millis.load(Ordering::SeqCst)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("Mutex poisoned").fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::new(7);
        let b = SimEnv::new(7);

        assert_eq!(a.random_seed(), b.random_seed());
        assert_eq!(a.random_u32(), b.random_u32());
    }

    #[test]
    fn clones_share_clock() {
        let env = SimEnv::new(0);
        let clone = env.clone();

        env.advance(Duration::from_secs(1));
        assert_eq!(clone.now_millis(), SIM_EPOCH_MILLIS + 1_000);

        clone.set_now_millis(5);
        assert_eq!(env.now_millis(), 5);
    }
}
