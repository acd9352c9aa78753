//! Outgoing message transport selection
//!
//! Every outgoing message takes exactly one of four routes, decided once at
//! send time from the recipient snapshot and the account snapshot:
//!
//! ```text
//! is_local_self_send            -> LocalSelfDelivery
//! is_group_push_send            -> GroupPush
//! !force_fallback && is_push    -> DirectPush
//! otherwise                     -> LegacyFallback
//! ```
//!
//! The router holds no state of its own. It enqueues jobs with dependency
//! edges on the external [`JobQueue`] and only touches the key store to
//! rotate an expired sender key before a group send.
//!
//! Degrades are silent: a failed directory lookup routes to the legacy
//! transport and a missing sealed-sender credential sends identified, each
//! with a single warn or debug line.

use std::sync::Arc;

use crate::{
    address::RecipientId,
    config::CoreConfig,
    env::Environment,
    recipient::{AccountSnapshot, AccountState, RecipientSnapshot, Registration},
    sealed::{ResolvedAccess, SealedSenderAccessResolver},
    sender_keys::SenderKeyManager,
    store::KeyMaterialStore,
};

mod directory;
mod error;
mod jobs;
mod message;

pub use directory::{DirectoryError, DirectoryService};
pub use error::RouteError;
pub use jobs::{JobError, JobId, JobKind, JobQueue, JobSpec};
pub use message::{
    AttachmentError, AttachmentId, AttachmentRepository, LocalDeliveryReceipt, MessageId,
    MessageKind, OutgoingMessage, PreUploadResult,
};

/// Transport chosen for an outgoing message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    /// Message to ourselves on a single-device account; never hits the network
    LocalSelfDelivery,
    /// Sender-key send to a push group
    GroupPush,
    /// Pairwise encrypted push send
    DirectPush,
    /// Legacy transport
    LegacyFallback,
}

/// Result of sending one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// Route taken
    pub route: Route,
    /// Jobs enqueued for this message
    pub jobs: Vec<JobId>,
    /// Synthesized receipt for local self delivery
    pub receipt: Option<LocalDeliveryReceipt>,
}

/// Result of a media broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// One attachment-copy job per pre-uploaded attachment with copies
    pub copy_jobs: Vec<JobId>,
    /// Per-message outcome, in input order
    pub sends: Vec<(MessageId, SendOutcome)>,
}

/// Split of a group's members by transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSendPlan {
    /// Members reached through the group sender key
    pub sender_key_targets: Vec<RecipientId>,
    /// Members reached with per-member legacy sends
    pub legacy_targets: Vec<RecipientId>,
    /// Sealed-sender access resolved for every non-self member
    pub access: ResolvedAccess,
}

/// Collaborators owned by the host application.
#[derive(Clone)]
pub struct RouterServices {
    /// Job system
    pub jobs: Arc<dyn JobQueue>,
    /// Contact discovery
    pub directory: Arc<dyn DirectoryService>,
    /// Attachment table
    pub attachments: Arc<dyn AttachmentRepository>,
    /// Local account state
    pub account: Arc<dyn AccountState>,
}

/// Decides how outgoing messages leave the device.
pub struct MessageTransportRouter<S, E> {
    sender_keys: SenderKeyManager<S, E>,
    resolver: Arc<SealedSenderAccessResolver>,
    services: RouterServices,
    env: E,
    config: CoreConfig,
}

impl<S: KeyMaterialStore, E: Environment> MessageTransportRouter<S, E> {
    /// Create a router.
    pub fn new(
        sender_keys: SenderKeyManager<S, E>,
        resolver: Arc<SealedSenderAccessResolver>,
        services: RouterServices,
        env: E,
        config: CoreConfig,
    ) -> Self {
        Self { sender_keys, resolver, services, env, config }
    }

    /// Route `message` would take if sent now.
    ///
    /// May block on a directory refresh.
    pub fn route(&self, message: &OutgoingMessage) -> Route {
        self.route_for(&self.services.account.account(), message)
    }

    /// Whether `recipient` is ourselves on a push-registered, single-device
    /// account and the caller did not force the legacy transport.
    pub fn is_local_self_send(&self, recipient: &RecipientSnapshot, force_fallback: bool) -> bool {
        Self::local_self(&self.services.account.account(), recipient, force_fallback)
    }

    /// Whether `recipient` is a push (non-legacy) group.
    pub fn is_group_push_send(&self, recipient: &RecipientSnapshot) -> bool {
        recipient.is_group && !recipient.is_legacy_group
    }

    /// Whether `recipient` can be reached over push for a `kind` message.
    ///
    /// Groups never are. An unknown registration state triggers one blocking
    /// directory refresh.
    /// A failed refresh counts as not push capable for this attempt.
    pub fn is_push_send(&self, recipient: &RecipientSnapshot, kind: MessageKind) -> bool {
        self.push_capable(&self.services.account.account(), recipient, kind)
    }

    fn local_self(
        account: &AccountSnapshot,
        recipient: &RecipientSnapshot,
        force_fallback: bool,
    ) -> bool {
        recipient.is_self && !force_fallback && account.registered && !account.multi_device
    }

    fn push_capable(
        &self,
        account: &AccountSnapshot,
        recipient: &RecipientSnapshot,
        kind: MessageKind,
    ) -> bool {
        if !account.registered || recipient.is_group {
            return false;
        }
        if matches!(kind, MessageKind::Text { is_key_exchange: true }) {
            return false;
        }

        match recipient.registration {
            Registration::Registered => true,
            Registration::NotRegistered => false,
            Registration::Unknown => match self.services.directory.refresh(recipient) {
                Ok(registration) => registration == Registration::Registered,
                Err(e) => {
                    tracing::warn!(
                        recipient = %recipient.id,
                        error = %e,
                        "Directory refresh failed, treating recipient as not push capable"
                    );
                    false
                },
            },
        }
    }

    fn route_for(&self, account: &AccountSnapshot, message: &OutgoingMessage) -> Route {
        let recipient = &message.recipient;
        if Self::local_self(account, recipient, message.force_fallback) {
            Route::LocalSelfDelivery
        } else if self.is_group_push_send(recipient) {
            Route::GroupPush
        } else if !message.force_fallback && self.push_capable(account, recipient, message.kind) {
            Route::DirectPush
        } else {
            Route::LegacyFallback
        }
    }

    /// Route `message` and enqueue its jobs.
    ///
    /// Push sends depend on every job in `pre_uploads`, so they cannot run
    /// before the attachments they reference are uploaded.
    pub fn send(
        &self,
        message: &OutgoingMessage,
        pre_uploads: &[PreUploadResult],
    ) -> Result<SendOutcome, RouteError> {
        let route = self.route(message);
        tracing::info!(
            message = %message.id,
            recipient = %message.recipient.id,
            ?route,
            "Routing outgoing message"
        );

        let upload_jobs: Vec<JobId> =
            pre_uploads.iter().flat_map(|upload| upload.job_ids.iter().copied()).collect();

        match route {
            Route::LocalSelfDelivery => self.deliver_locally(message, &message.attachments),
            Route::GroupPush => self.enqueue_group_send(message, &upload_jobs),
            Route::DirectPush => self.enqueue_individual_send(message, &upload_jobs),
            Route::LegacyFallback => {
                let job = self.services.jobs.enqueue(
                    JobSpec::new(JobKind::LegacySend { message: message.id })
                        .in_queue(message.recipient.id.queue_key()),
                )?;
                Ok(SendOutcome { route, jobs: vec![job], receipt: None })
            },
        }
    }

    /// Enqueue the compression, upload-spec and upload chain for an
    /// attachment ahead of its message.
    ///
    /// Returns `None` for local self sends, which never upload.
    pub fn pre_upload_attachment(
        &self,
        attachment: AttachmentId,
        recipient: &RecipientSnapshot,
    ) -> Result<Option<PreUploadResult>, RouteError> {
        if self.is_local_self_send(recipient, false) {
            return Ok(None);
        }

        let jobs = &self.services.jobs;
        let compression =
            jobs.enqueue(JobSpec::new(JobKind::AttachmentCompression { attachment }))?;
        let upload_spec = jobs.enqueue(
            JobSpec::new(JobKind::ResumableUploadSpec { attachment }).after([compression]),
        )?;
        let upload = jobs.enqueue(
            JobSpec::new(JobKind::AttachmentUpload { attachment }).after([upload_spec]),
        )?;

        tracing::debug!(?attachment, recipient = %recipient.id, "Pre-uploading attachment");
        Ok(Some(PreUploadResult { attachment, job_ids: vec![compression, upload_spec, upload] }))
    }

    /// Send one media message to many recipients sharing one upload.
    ///
    /// The first message owns the pre-uploaded attachments; every other
    /// message gets its own copies. One copy job per pre-uploaded attachment
    /// depends on all upload jobs, and every send depends on all upload jobs
    /// plus all copy jobs.
    pub fn send_media_broadcast(
        &self,
        messages: &[OutgoingMessage],
        pre_uploads: &[PreUploadResult],
    ) -> Result<BroadcastOutcome, RouteError> {
        let Some((primary, secondary)) = messages.split_first() else {
            return Err(RouteError::EmptyBroadcast);
        };
        if messages.iter().any(|message| !message.attachments.is_empty()) {
            return Err(RouteError::InlineAttachments);
        }

        let upload_jobs: Vec<JobId> =
            pre_uploads.iter().flat_map(|upload| upload.job_ids.iter().copied()).collect();
        let sources: Vec<AttachmentId> =
            pre_uploads.iter().map(|upload| upload.attachment).collect();

        let repository = &self.services.attachments;
        repository.assign(&sources, primary.id)?;

        let mut copies: Vec<Vec<AttachmentId>> =
            vec![Vec::with_capacity(secondary.len()); sources.len()];
        let mut attachments_by_message = vec![sources.clone()];
        for message in secondary {
            let mut owned = Vec::with_capacity(sources.len());
            for (index, source) in sources.iter().enumerate() {
                let copy = repository.copy_for_message(*source, message.id)?;
                copies[index].push(copy);
                owned.push(copy);
            }
            attachments_by_message.push(owned);
        }

        let mut copy_jobs = Vec::with_capacity(sources.len());
        for (source, targets) in sources.iter().zip(copies) {
            if targets.is_empty() {
                continue;
            }
            let job = self.services.jobs.enqueue(
                JobSpec::new(JobKind::AttachmentCopy { source: *source, targets })
                    .after(upload_jobs.iter().copied()),
            )?;
            copy_jobs.push(job);
        }

        let depends_on: Vec<JobId> = upload_jobs.iter().chain(&copy_jobs).copied().collect();
        let account = self.services.account.account();

        let mut sends = Vec::with_capacity(messages.len());
        for (message, attachments) in messages.iter().zip(&attachments_by_message) {
            let outcome = if Self::local_self(&account, &message.recipient, false) {
                self.deliver_locally(message, attachments)?
            } else if self.is_group_push_send(&message.recipient) {
                self.enqueue_group_send(message, &depends_on)?
            } else {
                self.enqueue_individual_send(message, &depends_on)?
            };
            sends.push((message.id, outcome));
        }

        tracing::info!(
            messages = messages.len(),
            attachments = sources.len(),
            copy_jobs = copy_jobs.len(),
            "Sent media broadcast"
        );
        Ok(BroadcastOutcome { copy_jobs, sends })
    }

    /// Partition a group's members by transport.
    ///
    /// Sender-key targets are registered members with resolvable sealed
    /// access. With fewer than the configured minimum of them, the sender
    /// key is not worth distributing and every member gets a legacy send.
    /// The local account is never a target.
    pub fn plan_group_send(
        &self,
        members: &[RecipientSnapshot],
        is_for_story: bool,
    ) -> GroupSendPlan {
        let candidates: Vec<RecipientSnapshot> =
            members.iter().filter(|member| !member.is_self).cloned().collect();
        let access = self.resolver.resolve_for_many(&candidates, is_for_story);

        let mut sender_key_targets = Vec::new();
        let mut legacy_targets = Vec::new();
        for (member, (id, resolved)) in candidates.iter().zip(access.iter()) {
            if member.registration == Registration::Registered && resolved.is_some() {
                sender_key_targets.push(id);
            } else {
                legacy_targets.push(id);
            }
        }

        if sender_key_targets.len() < self.config.sender_key_min_targets {
            tracing::debug!(
                sender_key_targets = sender_key_targets.len(),
                minimum = self.config.sender_key_min_targets,
                "Too few sender key targets, using legacy sends"
            );
            legacy_targets = candidates.iter().map(|member| member.id).collect();
            sender_key_targets.clear();
        }

        GroupSendPlan { sender_key_targets, legacy_targets, access }
    }

    fn enqueue_group_send(
        &self,
        message: &OutgoingMessage,
        depends_on: &[JobId],
    ) -> Result<SendOutcome, RouteError> {
        let distribution_id = message.recipient.distribution_id;
        if let Some(distribution_id) = distribution_id {
            self.sender_keys.rotate_if_older_than(distribution_id, self.config.sender_key_max_age)?;
        }

        let job = self.services.jobs.enqueue(
            JobSpec::new(JobKind::GroupSend { message: message.id, distribution_id })
                .after(depends_on.iter().copied())
                .in_queue(message.recipient.id.queue_key()),
        )?;
        Ok(SendOutcome { route: Route::GroupPush, jobs: vec![job], receipt: None })
    }

    fn enqueue_individual_send(
        &self,
        message: &OutgoingMessage,
        depends_on: &[JobId],
    ) -> Result<SendOutcome, RouteError> {
        let sealed = self.resolver.resolve_for(&message.recipient, message.is_story).is_some();
        if !sealed {
            tracing::debug!(
                recipient = %message.recipient.id,
                "No sealed sender access, sending identified"
            );
        }

        let job = self.services.jobs.enqueue(
            JobSpec::new(JobKind::IndividualSend { message: message.id, sealed })
                .after(depends_on.iter().copied())
                .in_queue(message.recipient.id.queue_key()),
        )?;
        Ok(SendOutcome { route: Route::DirectPush, jobs: vec![job], receipt: None })
    }

    /// Deliver a message to ourselves without the network.
    ///
    /// Attachments still run through compression so the local copy matches
    /// what an upload would have produced, then are marked uploaded.
    fn deliver_locally(
        &self,
        message: &OutgoingMessage,
        attachments: &[AttachmentId],
    ) -> Result<SendOutcome, RouteError> {
        let jobs = &self.services.jobs;
        let now = self.env.now_millis();

        let mut enqueued = Vec::with_capacity(attachments.len() * 2 + 1);
        for attachment in attachments {
            let compression = jobs.enqueue(JobSpec::new(JobKind::AttachmentCompression {
                attachment: *attachment,
            }))?;
            let mark_uploaded = jobs.enqueue(
                JobSpec::new(JobKind::AttachmentMarkUploaded {
                    message: message.id,
                    attachment: *attachment,
                })
                .after([compression]),
            )?;
            enqueued.extend([compression, mark_uploaded]);
        }

        let timer = message.expires_in.filter(|expires_in| !expires_in.is_zero());
        let expire_started_at = match timer {
            Some(expires_in) if !message.is_expiration_update => {
                let expires_in_millis = u64::try_from(expires_in.as_millis()).unwrap_or(u64::MAX);
                enqueued.push(jobs.enqueue(JobSpec::new(JobKind::ScheduleExpiration {
                    message: message.id,
                    expires_in_millis,
                }))?);
                Some(now)
            },
            _ => None,
        };

        tracing::debug!(
            message = %message.id,
            attachments = attachments.len(),
            "Delivered to self"
        );
        let receipt = LocalDeliveryReceipt {
            message: message.id,
            sent_at: now,
            delivered_at: now,
            read_at: now,
            viewed_at: now,
            unidentified: true,
            expire_started_at,
        };
        Ok(SendOutcome { route: Route::LocalSelfDelivery, jobs: enqueued, receipt: Some(receipt) })
    }
}
