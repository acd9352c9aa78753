//! Read-only recipient and account snapshots
//!
//! Recipient capability data is owned by the host application. The router
//! and resolver only ever see immutable snapshots of it.

use sealwire_crypto::ProfileKey;

use crate::{
    address::{DistributionId, ProtocolAddress, RecipientId},
    sealed::AccessMode,
};

/// Directory registration state of a recipient.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Registration {
    /// Never checked against the directory
    #[default]
    Unknown,
    /// Reachable over push transport
    Registered,
    /// Only reachable over the legacy transport
    NotRegistered,
}

/// Capability snapshot of one recipient (person or group).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientSnapshot {
    /// Local recipient id
    pub id: RecipientId,
    /// Protocol address of the recipient's primary device
    pub address: ProtocolAddress,
    /// Directory registration state
    pub registration: Registration,
    /// Sealed-sender access mode
    pub access_mode: AccessMode,
    /// Profile key, when known
    pub profile_key: Option<ProfileKey>,
    /// Recipient is a group
    pub is_group: bool,
    /// Group predates push groups and must use the legacy transport
    pub is_legacy_group: bool,
    /// Recipient is the local account
    pub is_self: bool,
    /// Sender-key distribution of a push group
    pub distribution_id: Option<DistributionId>,
}

impl RecipientSnapshot {
    /// Individual recipient with unknown registration and access mode.
    pub fn individual(id: RecipientId, address: ProtocolAddress) -> Self {
        Self {
            id,
            address,
            registration: Registration::Unknown,
            access_mode: AccessMode::Unknown,
            profile_key: None,
            is_group: false,
            is_legacy_group: false,
            is_self: false,
            distribution_id: None,
        }
    }

    /// Push group using sender-key distribution `distribution_id`.
    pub fn group(
        id: RecipientId,
        address: ProtocolAddress,
        distribution_id: DistributionId,
    ) -> Self {
        Self {
            registration: Registration::Registered,
            is_group: true,
            distribution_id: Some(distribution_id),
            ..Self::individual(id, address)
        }
    }

    /// Set the registration state.
    #[must_use]
    pub fn with_registration(mut self, registration: Registration) -> Self {
        self.registration = registration;
        self
    }

    /// Set the access mode.
    #[must_use]
    pub fn with_access_mode(mut self, access_mode: AccessMode) -> Self {
        self.access_mode = access_mode;
        self
    }

    /// Set the profile key.
    #[must_use]
    pub fn with_profile_key(mut self, profile_key: ProfileKey) -> Self {
        self.profile_key = Some(profile_key);
        self
    }

    /// Mark the group as a legacy group.
    #[must_use]
    pub fn legacy(mut self) -> Self {
        self.is_legacy_group = true;
        self
    }

    /// Mark the recipient as the local account.
    #[must_use]
    pub fn local(mut self) -> Self {
        self.is_self = true;
        self
    }
}

/// Snapshot of the local account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    /// Account is registered for push transport
    pub registered: bool,
    /// Account has linked secondary devices
    pub multi_device: bool,
    /// Address of this device
    pub local_address: ProtocolAddress,
}

/// Source of the current account snapshot.
///
/// Read once per routing decision so a registration change takes effect on
/// the next send.
pub trait AccountState: Send + Sync {
    /// Current account snapshot.
    fn account(&self) -> AccountSnapshot;
}

impl AccountState for AccountSnapshot {
    fn account(&self) -> AccountSnapshot {
        self.clone()
    }
}
