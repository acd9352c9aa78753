//! Addressing for peers, devices and group distributions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Device id of an account's primary device.
pub const PRIMARY_DEVICE_ID: u32 = 1;

/// A single device of a peer account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolAddress {
    /// Account identifier
    pub name: String,
    /// Device id within the account
    pub device_id: u32,
}

impl ProtocolAddress {
    /// Address of `device_id` on account `name`.
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        Self { name: name.into(), device_id }
    }

    /// Address of the primary device on account `name`.
    pub fn primary(name: impl Into<String>) -> Self {
        Self::new(name, PRIMARY_DEVICE_ID)
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}

/// Identifier of a group sender-key distribution.
///
/// A new distribution id starts a new group epoch for sender keys; every
/// member must receive the new key before group sends can use it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DistributionId(pub u128);

impl fmt::Display for DistributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Local identifier of a recipient (person or group).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecipientId(pub u64);

impl RecipientId {
    /// Job queue key that serializes all sends to this recipient.
    pub fn queue_key(self) -> String {
        format!("recipient::{}", self.0)
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_display() {
        assert_eq!(ProtocolAddress::new("alice", 3).to_string(), "alice.3");
        assert_eq!(ProtocolAddress::primary("bob").device_id, PRIMARY_DEVICE_ID);
    }

    #[test]
    fn distribution_id_display_is_fixed_width() {
        assert_eq!(DistributionId(0xAB).to_string(), format!("{:0>32}", "ab"));
    }

    #[test]
    fn queue_key_is_per_recipient() {
        assert_ne!(RecipientId(1).queue_key(), RecipientId(2).queue_key());
    }
}
