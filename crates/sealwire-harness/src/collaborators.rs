//! In-memory stand-ins for the host application's services.
//!
//! Each one records what the router asked of it so tests can assert on the
//! declared job graph rather than on side effects.

#![allow(clippy::disallowed_types, reason = "Test collaborators share recorded state")]

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use sealwire_core::{
    RecipientId, RecipientSnapshot, Registration,
    router::{
        AttachmentError, AttachmentId, AttachmentRepository, DirectoryError, DirectoryService,
        JobError, JobId, JobKind, JobQueue, JobSpec, MessageId,
    },
};

/// Job queue that assigns sequential ids and records every spec.
#[derive(Clone, Default)]
pub struct RecordingJobQueue {
    jobs: Arc<Mutex<Vec<(JobId, JobSpec)>>>,
    fail_next: Arc<Mutex<Option<JobError>>>,
}

impl RecordingJobQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next enqueue with `error`.
    #[allow(clippy::expect_used)]
    pub fn fail_next(&self, error: JobError) {
        *self.fail_next.lock().expect("Mutex poisoned") = Some(error);
    }

    /// Every enqueued job, in enqueue order.
    #[allow(clippy::expect_used)]
    pub fn jobs(&self) -> Vec<(JobId, JobSpec)> {
        self.jobs.lock().expect("Mutex poisoned").clone()
    }

    /// Spec of the job with `id`.
    pub fn get(&self, id: JobId) -> Option<JobSpec> {
        self.jobs().into_iter().find(|(job, _)| *job == id).map(|(_, spec)| spec)
    }

    /// Jobs whose kind matches `predicate`.
    pub fn matching(&self, predicate: impl Fn(&JobKind) -> bool) -> Vec<(JobId, JobSpec)> {
        self.jobs().into_iter().filter(|(_, spec)| predicate(&spec.kind)).collect()
    }

    /// Number of enqueued jobs.
    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    /// Whether nothing was enqueued.
    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    /// Whether every dependency refers to a job enqueued before it.
    ///
    /// The router must declare prerequisites before dependents; a forward or
    /// dangling edge would leave the job system waiting forever.
    pub fn dependencies_are_acyclic(&self) -> bool {
        let mut seen = BTreeSet::new();
        for (id, spec) in self.jobs() {
            if !spec.depends_on.iter().all(|dep| seen.contains(dep)) {
                return false;
            }
            seen.insert(id);
        }
        true
    }
}

impl JobQueue for RecordingJobQueue {
    #[allow(clippy::expect_used)]
    fn enqueue(&self, spec: JobSpec) -> Result<JobId, JobError> {
        if let Some(error) = self.fail_next.lock().expect("Mutex poisoned").take() {
            return Err(error);
        }

        let mut jobs = self.jobs.lock().expect("Mutex poisoned");
        let id = JobId(jobs.len() as u64 + 1);
        tracing::trace!(%id, kind = ?spec.kind, "Enqueued job");
        jobs.push((id, spec));
        Ok(id)
    }
}

/// Directory answering from a script, counting lookups.
#[derive(Clone, Default)]
pub struct ScriptedDirectory {
    answers: Arc<Mutex<HashMap<RecipientId, Result<Registration, DirectoryError>>>>,
    lookups: Arc<AtomicUsize>,
}

impl ScriptedDirectory {
    /// Directory that knows nobody.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer lookups for `recipient` with `answer`.
    #[allow(clippy::expect_used)]
    pub fn answer(&self, recipient: RecipientId, answer: Result<Registration, DirectoryError>) {
        self.answers.lock().expect("Mutex poisoned").insert(recipient, answer);
    }

    /// Number of refreshes performed.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl DirectoryService for ScriptedDirectory {
    #[allow(clippy::expect_used)]
    fn refresh(&self, recipient: &RecipientSnapshot) -> Result<Registration, DirectoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .expect("Mutex poisoned")
            .get(&recipient.id)
            .cloned()
            .unwrap_or(Ok(Registration::NotRegistered))
    }
}

#[derive(Default)]
struct AttachmentTable {
    next_id: u64,
    /// attachment -> owning message
    owners: BTreeMap<AttachmentId, Option<MessageId>>,
    /// copy -> source
    copied_from: BTreeMap<AttachmentId, AttachmentId>,
}

/// Attachment table held in memory.
#[derive(Clone, Default)]
pub struct MemoryAttachmentRepository {
    table: Arc<Mutex<AttachmentTable>>,
}

impl MemoryAttachmentRepository {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an attachment not yet owned by any message.
    #[allow(clippy::expect_used)]
    pub fn insert(&self) -> AttachmentId {
        let mut table = self.table.lock().expect("Mutex poisoned");
        table.next_id += 1;
        let id = AttachmentId(table.next_id);
        table.owners.insert(id, None);
        id
    }

    /// Message owning `attachment`.
    #[allow(clippy::expect_used)]
    pub fn owner(&self, attachment: AttachmentId) -> Option<MessageId> {
        self.table.lock().expect("Mutex poisoned").owners.get(&attachment).copied().flatten()
    }

    /// Source `attachment` was copied from.
    #[allow(clippy::expect_used)]
    pub fn source_of(&self, attachment: AttachmentId) -> Option<AttachmentId> {
        self.table.lock().expect("Mutex poisoned").copied_from.get(&attachment).copied()
    }
}

impl AttachmentRepository for MemoryAttachmentRepository {
    #[allow(clippy::expect_used)]
    fn assign(
        &self,
        attachments: &[AttachmentId],
        message: MessageId,
    ) -> Result<(), AttachmentError> {
        let mut table = self.table.lock().expect("Mutex poisoned");
        for attachment in attachments {
            let owner =
                table.owners.get_mut(attachment).ok_or(AttachmentError::NotFound(*attachment))?;
            *owner = Some(message);
        }
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn copy_for_message(
        &self,
        source: AttachmentId,
        message: MessageId,
    ) -> Result<AttachmentId, AttachmentError> {
        let mut table = self.table.lock().expect("Mutex poisoned");
        if !table.owners.contains_key(&source) {
            return Err(AttachmentError::NotFound(source));
        }

        table.next_id += 1;
        let copy = AttachmentId(table.next_id);
        table.owners.insert(copy, Some(message));
        table.copied_from.insert(copy, source);
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_assigns_sequential_ids() {
        let queue = RecordingJobQueue::new();
        let first =
            queue.enqueue(JobSpec::new(JobKind::LegacySend { message: MessageId(1) })).unwrap();
        let second = queue
            .enqueue(JobSpec::new(JobKind::LegacySend { message: MessageId(2) }).after([first]))
            .unwrap();

        assert_eq!((first, second), (JobId(1), JobId(2)));
        assert!(queue.dependencies_are_acyclic());
    }

    #[test]
    fn forward_dependency_is_detected() {
        let queue = RecordingJobQueue::new();
        queue
            .enqueue(JobSpec::new(JobKind::LegacySend { message: MessageId(1) }).after([JobId(9)]))
            .unwrap();
        assert!(!queue.dependencies_are_acyclic());
    }

    #[test]
    fn copies_get_fresh_ids() {
        let repository = MemoryAttachmentRepository::new();
        let source = repository.insert();

        let copy = repository.copy_for_message(source, MessageId(4)).unwrap();

        assert_ne!(copy, source);
        assert_eq!(repository.source_of(copy), Some(source));
        assert_eq!(repository.owner(copy), Some(MessageId(4)));
        assert_eq!(
            repository.copy_for_message(AttachmentId(99), MessageId(4)),
            Err(AttachmentError::NotFound(AttachmentId(99)))
        );
    }
}
