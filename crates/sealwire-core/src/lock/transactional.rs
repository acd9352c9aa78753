use std::thread::ThreadId;

use super::{LockError, Release, SessionLock, SessionLockGuard, lock_identity};
use crate::store::TransactionHost;

/// Session lock backed by the key store's write transaction.
///
/// Holds no state of its own: the store tracks which thread owns the open
/// transaction. Acquiring begins a transaction unless the calling thread
/// already owns one. Releasing the outermost guard commits; abandoning it
/// rolls back.
pub struct TransactionalSessionLock<H> {
    host: H,
}

impl<H: TransactionHost> TransactionalSessionLock<H> {
    /// Lock over `host`'s transactions.
    pub fn new(host: H) -> Self {
        Self { host }
    }
}

impl<H: TransactionHost> SessionLock for TransactionalSessionLock<H> {
    fn acquire(&self) -> Result<SessionLockGuard<'_>, LockError> {
        if self.host.in_transaction() {
            return Ok(SessionLockGuard::nested(lock_identity(self)));
        }

        self.host.begin_transaction().map_err(LockError::Transaction)?;
        Ok(SessionLockGuard::outermost(self, lock_identity(self)))
    }

    fn is_likely_held_by_other_thread(&self) -> bool {
        let me = std::thread::current().id();
        self.host.transaction_owner().is_some_and(|owner| owner != me)
    }

    fn owner_hint(&self) -> Option<ThreadId> {
        self.host.transaction_owner()
    }
}

impl<H: TransactionHost> Release for TransactionalSessionLock<H> {
    fn release(&self, commit: bool) -> Result<(), LockError> {
        self.host.end_transaction(commit).map_err(LockError::Transaction)
    }
}
