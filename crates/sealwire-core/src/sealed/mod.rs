//! Sealed-sender access resolution
//!
//! Sealed delivery hides the sender from the transport. To use it for a
//! recipient we need two things: an access key the recipient accepts (see
//! [`access_key_for`]) and a valid sender certificate for ourselves (see
//! [`SenderCertificateCache`]). Missing either means an identified send.
//!
//! Resolution is a pure function of the recipient snapshot, so batch
//! resolution for group sends fans out over scoped worker threads and
//! re-assembles the results in input order.

use std::{collections::HashMap, sync::Arc};

use sealwire_crypto::{AccessKey, SenderCertificate};

use crate::{address::RecipientId, recipient::RecipientSnapshot};

mod certificate;
mod policy;

pub use certificate::{CertificateFetchError, SenderCertificateCache};
pub use policy::{AccessMode, access_key_for};

/// Below this many recipients, batch resolution stays on the calling thread.
const PARALLEL_THRESHOLD: usize = 32;

/// Credentials for one sealed-sender delivery. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSenderAccess {
    /// Key presented to the transport
    pub access_key: AccessKey,
    /// Our sender certificate
    pub certificate: Arc<SenderCertificate>,
    /// `access_key` is the all-zero unrestricted key
    pub unrestricted: bool,
}

/// Count of sealed vs. identified outcomes of a batch resolution.
///
/// Diagnostics only.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AccessSummary {
    /// Recipients reachable with sealed delivery
    pub sealed: usize,
    /// Recipients that need an identified send
    pub fallback: usize,
}

/// Batch resolution result, in the order recipients were given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedAccess {
    entries: Vec<(RecipientId, Option<SealedSenderAccess>)>,
    /// Position of each recipient's first entry
    index: HashMap<RecipientId, usize>,
}

impl ResolvedAccess {
    fn new(entries: Vec<(RecipientId, Option<SealedSenderAccess>)>) -> Self {
        let mut index = HashMap::with_capacity(entries.len());
        for (position, (id, _)) in entries.iter().enumerate() {
            index.entry(*id).or_insert(position);
        }
        Self { entries, index }
    }

    /// Access for `id`, `None` when unresolved or unavailable.
    pub fn get(&self, id: RecipientId) -> Option<&SealedSenderAccess> {
        let position = *self.index.get(&id)?;
        self.entries.get(position).and_then(|(_, access)| access.as_ref())
    }

    /// Entries in input order.
    pub fn iter(&self) -> impl Iterator<Item = (RecipientId, Option<&SealedSenderAccess>)> {
        self.entries.iter().map(|(id, access)| (*id, access.as_ref()))
    }

    /// Number of entries (equal to the number of recipients resolved).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no recipients were resolved.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sealed vs. fallback counts.
    pub fn summary(&self) -> AccessSummary {
        let sealed = self.entries.iter().filter(|(_, access)| access.is_some()).count();
        AccessSummary { sealed, fallback: self.entries.len() - sealed }
    }
}

/// Resolves per-recipient sealed-sender credentials.
#[derive(Debug, Clone)]
pub struct SealedSenderAccessResolver {
    certificate: SenderCertificateCache,
    parallelism: usize,
}

impl SealedSenderAccessResolver {
    /// Resolver using `certificate`, fanning batches out to at most
    /// `parallelism` threads.
    pub fn new(certificate: SenderCertificateCache, parallelism: usize) -> Self {
        Self { certificate, parallelism: parallelism.max(1) }
    }

    /// Whether a valid sender certificate is cached.
    pub fn is_enabled(&self) -> bool {
        self.certificate.is_enabled()
    }

    /// Sealed-sender credentials for `recipient`, or `None` to send identified.
    pub fn resolve_for(
        &self,
        recipient: &RecipientSnapshot,
        is_for_story: bool,
    ) -> Option<SealedSenderAccess> {
        let certificate = self.certificate.certificate()?;
        let access_key =
            access_key_for(recipient.access_mode, recipient.profile_key.as_ref(), is_for_story)?;

        Some(SealedSenderAccess {
            access_key,
            certificate: Arc::clone(certificate),
            unrestricted: access_key.is_unrestricted(),
        })
    }

    /// Resolve every recipient, preserving input order.
    pub fn resolve_for_many(
        &self,
        recipients: &[RecipientSnapshot],
        is_for_story: bool,
    ) -> ResolvedAccess {
        let resolve = |recipient: &RecipientSnapshot| {
            (recipient.id, self.resolve_for(recipient, is_for_story))
        };

        let entries = if recipients.len() < PARALLEL_THRESHOLD || self.parallelism == 1 {
            recipients.iter().map(resolve).collect()
        } else {
            let chunk_size = recipients.len().div_ceil(self.parallelism);
            std::thread::scope(|scope| {
                let workers: Vec<_> = recipients
                    .chunks(chunk_size)
                    .enumerate()
                    .map(|(index, chunk)| {
                        scope.spawn(move || (index, chunk.iter().map(resolve).collect::<Vec<_>>()))
                    })
                    .collect();

                let mut chunks: Vec<_> = workers
                    .into_iter()
                    .map(|worker| worker.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                    .collect();
                chunks.sort_by_key(|(index, _)| *index);
                chunks.into_iter().flat_map(|(_, entries)| entries).collect()
            })
        };

        let resolved = ResolvedAccess::new(entries);
        let summary = resolved.summary();
        tracing::debug!(
            sealed = summary.sealed,
            fallback = summary.fallback,
            is_for_story,
            "Resolved sealed-sender access"
        );
        resolved
    }
}

#[cfg(test)]
mod tests {
    use sealwire_crypto::{
        IdentityKeyPair, ProfileKey, ServerCertificate, UNRESTRICTED_ACCESS_KEY, derive_access_key,
    };

    use super::*;
    use crate::address::ProtocolAddress;

    fn certificate() -> SenderCertificateCache {
        let root = IdentityKeyPair::from_seed([1; 32]);
        let server = IdentityKeyPair::from_seed([2; 32]);
        let signer = ServerCertificate::issue(&root, 1, server.public_key()).unwrap();
        let identity = IdentityKeyPair::from_seed([3; 32]).public_key();
        let encoded = SenderCertificate::issue(&server, signer, "alice", 1, u64::MAX, identity)
            .unwrap()
            .encode()
            .unwrap();
        SenderCertificateCache::validate(&root.public_key(), &encoded, 0)
    }

    fn recipient(id: u64, mode: AccessMode) -> RecipientSnapshot {
        RecipientSnapshot::individual(RecipientId(id), ProtocolAddress::primary(format!("r{id}")))
            .with_access_mode(mode)
    }

    #[test]
    fn unrestricted_mode_flags_access() {
        let resolver = SealedSenderAccessResolver::new(certificate(), 1);
        let recipient = recipient(1, AccessMode::Unrestricted)
            .with_profile_key(ProfileKey::from_bytes([4; 32]));
        let access = resolver.resolve_for(&recipient, false).unwrap();

        assert_eq!(access.access_key, UNRESTRICTED_ACCESS_KEY);
        assert!(access.unrestricted);
    }

    #[test]
    fn enabled_mode_derives_from_profile_key() {
        let resolver = SealedSenderAccessResolver::new(certificate(), 1);
        let profile = ProfileKey::from_bytes([4; 32]);
        let recipient = recipient(1, AccessMode::Enabled).with_profile_key(profile.clone());
        let access = resolver.resolve_for(&recipient, false).unwrap();

        assert_eq!(access.access_key, derive_access_key(&profile));
        assert!(!access.unrestricted);
    }

    #[test]
    fn disabled_certificate_disables_everyone() {
        let resolver = SealedSenderAccessResolver::new(SenderCertificateCache::Disabled, 1);
        assert!(!resolver.is_enabled());
        assert_eq!(resolver.resolve_for(&recipient(1, AccessMode::Unrestricted), true), None);
    }

    #[test]
    fn batch_preserves_order_and_counts() {
        let resolver = SealedSenderAccessResolver::new(certificate(), 4);
        let recipients: Vec<_> = (0..100)
            .map(|id| {
                let mode =
                    if id % 2 == 0 { AccessMode::Unrestricted } else { AccessMode::Disabled };
                recipient(id, mode)
            })
            .collect();

        let resolved = resolver.resolve_for_many(&recipients, false);

        assert_eq!(resolved.len(), 100);
        let ids: Vec<u64> = resolved.iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, (0..100).collect::<Vec<_>>());
        assert_eq!(resolved.summary(), AccessSummary { sealed: 50, fallback: 50 });
        assert!(resolved.get(RecipientId(2)).is_some());
        assert!(resolved.get(RecipientId(3)).is_none());
    }

    #[test]
    fn lookup_agrees_with_iteration() {
        let resolver = SealedSenderAccessResolver::new(certificate(), 4);
        let mut recipients: Vec<_> = (0..64)
            .map(|id| {
                let mode =
                    if id % 3 == 0 { AccessMode::Disabled } else { AccessMode::Unrestricted };
                recipient(id, mode)
            })
            .collect();
        recipients.push(recipient(1, AccessMode::Disabled));

        let resolved = resolver.resolve_for_many(&recipients, false);

        for (id, access) in resolved.iter().take(64) {
            assert_eq!(resolved.get(id), access);
        }
        assert!(resolved.get(RecipientId(1)).is_some(), "first entry wins for duplicates");
        assert!(resolved.get(RecipientId(999)).is_none());
    }
}
