//! Deterministic environment for unit tests inside this crate.
//!
//! Integration tests use `sealwire_harness::SimEnv`; unit tests cannot,
//! because the harness links its own copy of this crate.

#![allow(clippy::disallowed_types, reason = "Test-only shared state")]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use crate::env::Environment;

#[derive(Clone)]
pub(crate) struct TestEnv {
    counter: Arc<Mutex<u64>>,
    now: Arc<AtomicU64>,
}

impl TestEnv {
    pub(crate) fn new(now_millis: u64) -> Self {
        Self { counter: Arc::new(Mutex::new(0)), now: Arc::new(AtomicU64::new(now_millis)) }
    }

    pub(crate) fn advance_millis(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Environment for TestEnv {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        let mut counter = self.counter.lock().expect("Mutex poisoned");
        for chunk in buffer.chunks_mut(8) {
            *counter += 1;
            let bytes = counter.wrapping_mul(0x9E37_79B9_7F4A_7C15).to_be_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}
