//! Session lock guarding the key material store
//!
//! The key material store is not safe for concurrent writers, and a ratchet
//! operation must never observe another thread's half-finished mutation. The
//! session lock provides that exclusion while staying reentrant for the
//! owning thread, because cryptographic operations nest (processing a prekey
//! bundle inside a send that already holds the lock).
//!
//! Two interchangeable implementations:
//!
//! - [`ReentrantSessionLock`]: in-process owner-tracking mutex
//! - [`TransactionalSessionLock`]: piggybacks on the store's own write
//!   transaction, so the data layer's transaction boundary is the lock
//!   boundary and an abandoned critical section rolls back
//!
//! # Guards
//!
//! [`SessionLock::acquire`] returns a [`SessionLockGuard`]. The outermost
//! guard on a thread owns the lock; nested guards are no-ops. Dropping a
//! guard releases it, so every exit path (early return, `?`, panic) unlocks.
//! A guard dropped during a panic abandons rather than commits.

use std::{marker::PhantomData, thread::ThreadId};

use thiserror::Error;

use crate::store::StoreError;

mod reentrant;
mod transactional;

pub use reentrant::ReentrantSessionLock;
pub use transactional::TransactionalSessionLock;

/// Errors from acquiring or releasing the session lock.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Internal mutex poisoned by a panicking thread
    #[error("session lock poisoned")]
    Poisoned,

    /// Backing store transaction failed to begin or end
    #[error("session lock transaction failed: {0}")]
    Transaction(StoreError),

    /// A released guard was presented as proof of holding the lock
    #[error("session lock guard is no longer held")]
    NotHeld,

    /// A guard from a different session lock was presented as proof
    #[error("session lock guard belongs to another lock")]
    ForeignGuard,
}

impl LockError {
    /// Returns true if this error indicates a logic bug or corruption.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Poisoned | Self::NotHeld | Self::ForeignGuard => true,
            Self::Transaction(err) => err.is_fatal(),
        }
    }
}

/// Mutual exclusion over the key material store.
///
/// # Invariants
///
/// - At most one thread holds the lock at a time
/// - Acquisition by the holding thread never blocks and returns a no-op guard
/// - A second locker never observes a partially-mutated store
pub trait SessionLock: Send + Sync {
    /// Block until the calling thread holds the lock.
    fn acquire(&self) -> Result<SessionLockGuard<'_>, LockError>;

    /// Whether some other thread appears to hold the lock.
    ///
    /// Diagnostic only. The answer can be stale before it is returned and
    /// must not be used for correctness decisions.
    fn is_likely_held_by_other_thread(&self) -> bool;

    /// Thread that appears to hold the lock. Diagnostic only.
    fn owner_hint(&self) -> Option<ThreadId>;
}

/// Address of the lock instance, used to match guards to their lock.
pub(crate) fn lock_identity(lock: &dyn SessionLock) -> usize {
    std::ptr::from_ref(lock).cast::<()>().addr()
}

/// Release hook implemented by lock backends.
pub(crate) trait Release: Sync {
    /// Give up ownership, committing buffered work if `commit`.
    fn release(&self, commit: bool) -> Result<(), LockError>;
}

/// Proof that the current thread holds the session lock.
///
/// Not `Send`: ownership is tracked per thread, so the guard must be released
/// on the thread that acquired it.
#[must_use = "the session lock is released as soon as the guard is dropped"]
pub struct SessionLockGuard<'a> {
    /// `None` for nested guards, whose release does nothing
    owner: Option<&'a dyn Release>,
    lock_id: usize,
    held: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a> SessionLockGuard<'a> {
    pub(crate) fn outermost(owner: &'a dyn Release, lock_id: usize) -> Self {
        Self { owner: Some(owner), lock_id, held: true, _not_send: PhantomData }
    }

    pub(crate) fn nested(lock_id: usize) -> Self {
        Self { owner: None, lock_id, held: true, _not_send: PhantomData }
    }

    /// Whether this guard owns the lock (as opposed to a reentrant no-op).
    pub fn is_outermost(&self) -> bool {
        self.owner.is_some()
    }

    /// Whether this guard has not been released yet.
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Check that this guard is live proof of holding `lock`.
    ///
    /// Fails with [`LockError::NotHeld`] if the guard was already released and
    /// with [`LockError::ForeignGuard`] if it was acquired from another lock.
    pub fn ensure_held(&self, lock: &dyn SessionLock) -> Result<(), LockError> {
        if !self.held {
            return Err(LockError::NotHeld);
        }
        if self.lock_id != lock_identity(lock) {
            return Err(LockError::ForeignGuard);
        }
        Ok(())
    }

    /// Release the lock, committing the transaction for the outermost guard.
    ///
    /// Idempotent: a second release is a no-op.
    pub fn release(&mut self) -> Result<(), LockError> {
        self.finish(true)
    }

    /// Release the lock without committing.
    ///
    /// The outermost transactional guard rolls its transaction back. The
    /// in-process lock has nothing to roll back and simply unlocks.
    pub fn abandon(&mut self) -> Result<(), LockError> {
        self.finish(false)
    }

    fn finish(&mut self, commit: bool) -> Result<(), LockError> {
        if !self.held {
            return Ok(());
        }
        self.held = false;

        match self.owner {
            Some(owner) => owner.release(commit),
            None => Ok(()),
        }
    }
}

impl Drop for SessionLockGuard<'_> {
    fn drop(&mut self) {
        let commit = !std::thread::panicking();
        if let Err(e) = self.finish(commit) {
            tracing::error!(error = %e, commit, "Failed to release session lock");
        }
    }
}

impl std::fmt::Debug for SessionLockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLockGuard")
            .field("outermost", &self.is_outermost())
            .field("held", &self.held)
            .finish()
    }
}

/// Run `f` while holding the session lock.
///
/// On `Ok` the guard is released and (for the outermost transactional guard)
/// committed. On `Err` the guard is abandoned so a failing critical section
/// never commits partial mutation. Nested calls defer both to the outermost
/// guard.
pub fn with_session_lock<T, E, F>(lock: &dyn SessionLock, f: F) -> Result<T, E>
where
    F: FnOnce(&SessionLockGuard<'_>) -> Result<T, E>,
    E: From<LockError>,
{
    let mut guard = lock.acquire()?;

    match f(&guard) {
        Ok(value) => {
            guard.release()?;
            Ok(value)
        },
        Err(e) => {
            if let Err(abandon) = guard.abandon() {
                tracing::warn!(error = %abandon, "Failed to roll back session lock");
            }
            Err(e)
        },
    }
}
