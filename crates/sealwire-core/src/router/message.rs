//! Outgoing messages and their attachments

use std::{fmt, time::Duration};

use thiserror::Error;

use super::jobs::JobId;
use crate::recipient::RecipientSnapshot;

/// Local message id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local attachment id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttachmentId(pub u64);

/// Kind of outgoing message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Text body only
    Text {
        /// Message only carries key exchange material
        is_key_exchange: bool,
    },
    /// Message with attachments
    Media,
}

/// Message about to leave the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Local message id
    pub id: MessageId,
    /// Recipient snapshot taken when the message was composed
    pub recipient: RecipientSnapshot,
    /// Text or media
    pub kind: MessageKind,
    /// Attachments stored with the message
    pub attachments: Vec<AttachmentId>,
    /// Disappearing-message timer
    pub expires_in: Option<Duration>,
    /// Message announces a timer change rather than carrying content
    pub is_expiration_update: bool,
    /// Message is a story post
    pub is_story: bool,
    /// Caller insists on the legacy transport
    pub force_fallback: bool,
}

impl OutgoingMessage {
    /// Plain text message.
    pub fn text(id: MessageId, recipient: RecipientSnapshot) -> Self {
        Self {
            id,
            recipient,
            kind: MessageKind::Text { is_key_exchange: false },
            attachments: Vec::new(),
            expires_in: None,
            is_expiration_update: false,
            is_story: false,
            force_fallback: false,
        }
    }

    /// Media message carrying `attachments`.
    pub fn media(
        id: MessageId,
        recipient: RecipientSnapshot,
        attachments: Vec<AttachmentId>,
    ) -> Self {
        Self { kind: MessageKind::Media, attachments, ..Self::text(id, recipient) }
    }

    /// Set the disappearing-message timer.
    #[must_use]
    pub fn expiring(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    /// Force the legacy transport.
    #[must_use]
    pub fn with_forced_fallback(mut self) -> Self {
        self.force_fallback = true;
        self
    }

    /// Mark as a story post.
    #[must_use]
    pub fn as_story(mut self) -> Self {
        self.is_story = true;
        self
    }

    /// Mark as a bare key exchange. Only meaningful for text messages.
    #[must_use]
    pub fn as_key_exchange(mut self) -> Self {
        if let MessageKind::Text { is_key_exchange } = &mut self.kind {
            *is_key_exchange = true;
        }
        self
    }

    /// Mark as a timer-change announcement.
    #[must_use]
    pub fn as_expiration_update(mut self) -> Self {
        self.is_expiration_update = true;
        self
    }
}

/// Attachment enqueued for upload before its message was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreUploadResult {
    /// Attachment being uploaded
    pub attachment: AttachmentId,
    /// Compression, upload-spec and upload jobs, in chain order
    pub job_ids: Vec<JobId>,
}

/// Receipt state synthesized for a message delivered to ourselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDeliveryReceipt {
    /// Message delivered
    pub message: MessageId,
    /// Sent timestamp (unix millis)
    pub sent_at: u64,
    /// Delivered timestamp (unix millis)
    pub delivered_at: u64,
    /// Read timestamp (unix millis)
    pub read_at: u64,
    /// Viewed timestamp (unix millis)
    pub viewed_at: u64,
    /// Self messages count as sealed
    pub unidentified: bool,
    /// Disappearing timer start (unix millis), if the message has a timer
    pub expire_started_at: Option<u64>,
}

/// Attachment storage failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachmentError {
    /// No attachment with this id
    #[error("attachment {0:?} not found")]
    NotFound(AttachmentId),

    /// Underlying storage failed
    #[error("attachment storage failed: {0}")]
    Storage(String),
}

impl AttachmentError {
    /// A missing attachment means the caller passed a stale id.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Host application's attachment table.
pub trait AttachmentRepository: Send + Sync {
    /// Attach `attachments` to `message`.
    fn assign(
        &self,
        attachments: &[AttachmentId],
        message: MessageId,
    ) -> Result<(), AttachmentError>;

    /// Create a new attachment row for `message` with the same content as
    /// `source`. The copy never shares the source's id.
    fn copy_for_message(
        &self,
        source: AttachmentId,
        message: MessageId,
    ) -> Result<AttachmentId, AttachmentError>;
}
