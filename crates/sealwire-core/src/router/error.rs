use thiserror::Error;

use super::{jobs::JobError, message::AttachmentError};
use crate::error::KeyError;

/// Errors from routing an outgoing message.
///
/// Transport degrades (directory failures, missing sealed access) are never
/// errors; they pick another route.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Job system refused a job
    #[error(transparent)]
    Job(#[from] JobError),

    /// Sender key rotation failed
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Attachment table failed
    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    /// Broadcast called without messages
    #[error("media broadcast needs at least one message")]
    EmptyBroadcast,

    /// Broadcast message carries its own attachments
    #[error("broadcast messages must use pre-uploaded attachments only")]
    InlineAttachments,
}

impl RouteError {
    /// Returns true if this error must not be retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Job(err) => err.is_fatal(),
            Self::Key(err) => err.is_fatal(),
            Self::Attachment(err) => err.is_fatal(),
            Self::EmptyBroadcast | Self::InlineAttachments => true,
        }
    }
}
