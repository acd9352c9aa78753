#![allow(clippy::disallowed_types, reason = "Owner slot is only held for bookkeeping")]

use std::{
    sync::{Condvar, Mutex},
    thread::ThreadId,
};

use super::{LockError, Release, SessionLock, SessionLockGuard, lock_identity};

/// In-process reentrant session lock.
///
/// Tracks the owning thread. The std mutex only guards the owner slot and is
/// never held across a critical section; waiting threads park on a condvar
/// until the owner releases.
pub struct ReentrantSessionLock {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl ReentrantSessionLock {
    /// Create an unlocked lock.
    pub fn new() -> Self {
        Self { owner: Mutex::new(None), released: Condvar::new() }
    }
}

impl Default for ReentrantSessionLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLock for ReentrantSessionLock {
    fn acquire(&self) -> Result<SessionLockGuard<'_>, LockError> {
        let me = std::thread::current().id();
        let owner = self.owner.lock().map_err(|_| LockError::Poisoned)?;
        if *owner == Some(me) {
            return Ok(SessionLockGuard::nested(lock_identity(self)));
        }

        let mut owner = self
            .released
            .wait_while(owner, |owner| owner.is_some())
            .map_err(|_| LockError::Poisoned)?;
        *owner = Some(me);

        Ok(SessionLockGuard::outermost(self, lock_identity(self)))
    }

    fn is_likely_held_by_other_thread(&self) -> bool {
        let me = std::thread::current().id();
        self.owner_hint().is_some_and(|owner| owner != me)
    }

    fn owner_hint(&self) -> Option<ThreadId> {
        self.owner.lock().ok().and_then(|owner| *owner)
    }
}

impl Release for ReentrantSessionLock {
    fn release(&self, _commit: bool) -> Result<(), LockError> {
        let mut owner = self.owner.lock().map_err(|_| LockError::Poisoned)?;
        *owner = None;
        drop(owner);

        self.released.notify_one();
        Ok(())
    }
}
