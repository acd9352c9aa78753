use thiserror::Error;

use crate::recipient::{RecipientSnapshot, Registration};

/// Directory lookup failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Network failure talking to the directory
    #[error("directory I/O failed: {0}")]
    Io(String),

    /// Directory refused the lookup for now
    #[error("directory rate limited")]
    RateLimited,
}

impl DirectoryError {
    /// Directory failures always degrade to "not push capable".
    pub fn is_fatal(&self) -> bool {
        false
    }
}

/// Contact discovery service.
pub trait DirectoryService: Send + Sync {
    /// Look up the current registration state of `recipient`.
    ///
    /// Blocks on the network.
    fn refresh(&self, recipient: &RecipientSnapshot) -> Result<Registration, DirectoryError>;
}
