//! CLI error types.

use sealwire_core::{KeyError, StoreError};
use thiserror::Error;

/// Errors that end a CLI invocation.
#[derive(Error, Debug)]
pub enum CliError {
    /// Key store could not be opened
    #[error("cannot open key store: {0}")]
    Open(StoreError),

    /// Key lifecycle operation failed
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Command needs a registered account
    #[error("account is not registered; run `register` first")]
    NotRegistered,
}

impl CliError {
    /// Process exit code for this error.
    ///
    /// Fatal key errors (corruption, logic bugs) exit with 2 so scripts can
    /// tell them from retryable failures, which exit with 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Key(err) if err.is_fatal() => 2,
            Self::Open(err) if err.is_fatal() => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_exit_with_one() {
        let err = CliError::Key(KeyError::Store(StoreError::Io("busy".to_string())));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(CliError::NotRegistered.exit_code(), 1);
    }

    #[test]
    fn corruption_exits_with_two() {
        let err = CliError::Key(KeyError::Store(StoreError::Serialization("bad cbor".to_string())));
        assert_eq!(err.exit_code(), 2);
    }
}
