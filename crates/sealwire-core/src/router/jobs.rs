//! Work items handed to the external job system
//!
//! The router never performs network I/O. It declares jobs and the
//! dependency edges between them; running them in order is the job system's
//! responsibility.

use std::fmt;

use thiserror::Error;

use super::message::{AttachmentId, MessageId};
use crate::address::DistributionId;

/// Identifier assigned by the job system.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// What a job does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// Transcode an attachment into its upload form
    AttachmentCompression {
        /// Attachment to compress
        attachment: AttachmentId,
    },
    /// Obtain a resumable upload location
    ResumableUploadSpec {
        /// Attachment the location is for
        attachment: AttachmentId,
    },
    /// Upload a compressed attachment
    AttachmentUpload {
        /// Attachment to upload
        attachment: AttachmentId,
    },
    /// Mark an attachment uploaded without transferring it
    AttachmentMarkUploaded {
        /// Message owning the attachment
        message: MessageId,
        /// Attachment to mark
        attachment: AttachmentId,
    },
    /// Copy the upload result of `source` onto each of `targets`
    AttachmentCopy {
        /// Pre-uploaded attachment
        source: AttachmentId,
        /// Per-recipient copies
        targets: Vec<AttachmentId>,
    },
    /// Encrypted send to one recipient
    IndividualSend {
        /// Message to send
        message: MessageId,
        /// Sealed-sender access was resolved for the recipient
        sealed: bool,
    },
    /// Sender-key send to a push group
    GroupSend {
        /// Message to send
        message: MessageId,
        /// Sender-key distribution of the group
        distribution_id: Option<DistributionId>,
    },
    /// Send over the legacy transport
    LegacySend {
        /// Message to send
        message: MessageId,
    },
    /// Start the disappearing-message timer
    ScheduleExpiration {
        /// Message to expire
        message: MessageId,
        /// Timer length
        expires_in_millis: u64,
    },
}

/// A job plus its prerequisites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// What to run
    pub kind: JobKind,
    /// Jobs that must complete first
    pub depends_on: Vec<JobId>,
    /// Jobs sharing a queue key run one at a time, in enqueue order
    pub queue_key: Option<String>,
}

impl JobSpec {
    /// Job with no prerequisites and no queue.
    pub fn new(kind: JobKind) -> Self {
        Self { kind, depends_on: Vec::new(), queue_key: None }
    }

    /// Require `jobs` to complete first.
    #[must_use]
    pub fn after(mut self, jobs: impl IntoIterator<Item = JobId>) -> Self {
        self.depends_on.extend(jobs);
        self
    }

    /// Serialize with other jobs under `key`.
    #[must_use]
    pub fn in_queue(mut self, key: String) -> Self {
        self.queue_key = Some(key);
        self
    }
}

/// The job system refused a job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Job system temporarily unavailable
    #[error("job queue unavailable: {0}")]
    Unavailable(String),

    /// Job was rejected as invalid
    #[error("job rejected: {0}")]
    Rejected(String),
}

impl JobError {
    /// Returns true if retrying the enqueue cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// External job system.
pub trait JobQueue: Send + Sync {
    /// Enqueue `spec`, returning the id assigned to it.
    fn enqueue(&self, spec: JobSpec) -> Result<JobId, JobError>;
}
