//! Key material store errors

use thiserror::Error;

/// Errors from key material store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Serialization or deserialization failed
    ///
    /// Everything in the store was written by this process, so a codec
    /// failure means local corruption.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Transaction protocol misuse (end without begin, foreign owner)
    #[error("transaction error: {0}")]
    Transaction(String),
}

impl StoreError {
    /// Returns true if the operation may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Returns true if this error indicates local corruption or a logic bug.
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }
}

impl From<ciborium::de::Error<std::io::Error>> for StoreError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for StoreError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        Self::Serialization(err.to_string())
    }
}
