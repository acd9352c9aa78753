//! Access mode and the sealed-sender access policy

use sealwire_crypto::{AccessKey, ProfileKey, UNRESTRICTED_ACCESS_KEY, derive_access_key};

use crate::error::PolicyError;

/// Whom a recipient accepts sealed-sender messages from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AccessMode {
    /// Recipient has not published a mode
    #[default]
    Unknown = 0,
    /// Sealed delivery refused
    Disabled = 1,
    /// Sealed delivery from holders of the profile key
    Enabled = 2,
    /// Sealed delivery from anyone
    Unrestricted = 3,
}

impl TryFrom<u8> for AccessMode {
    type Error = PolicyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Disabled),
            2 => Ok(Self::Enabled),
            3 => Ok(Self::Unrestricted),
            other => Err(PolicyError::UnknownAccessMode(other)),
        }
    }
}

impl From<AccessMode> for u8 {
    fn from(mode: AccessMode) -> Self {
        mode as u8
    }
}

/// Access key for a recipient, or `None` when sealed delivery is unavailable.
///
/// Pure function of its inputs. Story sends to a recipient with no published
/// mode and no known profile key use the unrestricted key, since stories are
/// delivered sealed by default.
pub fn access_key_for(
    mode: AccessMode,
    profile_key: Option<&ProfileKey>,
    is_for_story: bool,
) -> Option<AccessKey> {
    match (mode, profile_key) {
        (AccessMode::Unrestricted, _) => Some(UNRESTRICTED_ACCESS_KEY),
        (AccessMode::Disabled, _) | (AccessMode::Enabled, None) => None,
        (AccessMode::Unknown | AccessMode::Enabled, Some(key)) => Some(derive_access_key(key)),
        (AccessMode::Unknown, None) => is_for_story.then_some(UNRESTRICTED_ACCESS_KEY),
    }
}
