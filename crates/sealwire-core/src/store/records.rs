//! Persisted key material records

use sealwire_crypto::{IdentityKey, KeyPair, SIGNATURE_SIZE};
use serde::{Deserialize, Serialize};

/// Prekey ids are 24-bit and wrap.
pub const PRE_KEY_ID_MASK: u32 = 0x00FF_FFFF;

/// Maximum number of archived session states kept per device.
pub const MAX_ARCHIVED_STATES: usize = 40;

/// One-time prekey, deleted once a peer has consumed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyRecord {
    /// 24-bit prekey id
    pub id: u32,
    /// X25519 keypair
    pub key_pair: KeyPair,
}

/// Medium-term prekey signed by the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKeyRecord {
    /// 24-bit signed prekey id
    pub id: u32,
    /// X25519 keypair
    pub key_pair: KeyPair,
    /// Identity signature over the serialized public key
    #[serde(with = "serde_bytes")]
    pub signature: [u8; SIGNATURE_SIZE],
    /// Creation time (unix millis)
    pub created_at_millis: u64,
}

/// Prekey id counters and the active signed prekey.
///
/// Counters are `None` until first use; the first generation seeds them
/// randomly so that a reinstall does not reuse ids a peer may still hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyMetadata {
    /// Id of the next one-time prekey
    pub next_pre_key_id: Option<u32>,
    /// Id of the next signed prekey
    pub next_signed_pre_key_id: Option<u32>,
    /// Id of the signed prekey currently published
    pub active_signed_pre_key_id: Option<u32>,
}

/// Ratchet state for one peer device.
///
/// Only the fields this crate inspects are modelled; the ratchet library owns
/// the rest in `ratchet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Identity key the peer presented when the session was created
    pub remote_identity: IdentityKey,
    /// Current receiving ratchet public key
    pub receiving_ratchet_key: [u8; 32],
    /// Our ephemeral base key for this session
    pub local_base_key: [u8; 32],
    /// One-time prekey of the peer used to open the session, if any
    pub pre_key_id: Option<u32>,
    /// Signed prekey of the peer used to open the session
    pub signed_pre_key_id: u32,
    /// Creation time (unix millis)
    pub created_at_millis: u64,
    /// Opaque ratchet state
    #[serde(with = "serde_bytes")]
    pub ratchet: Vec<u8>,
}

/// All session states for one peer device.
///
/// Archiving moves the current state to the front of `previous`; decrypting
/// a message from an archived state is still possible while it is retained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    current: Option<SessionState>,
    previous: Vec<SessionState>,
}

impl SessionRecord {
    /// Record whose current state is `state`.
    pub fn new(state: SessionState) -> Self {
        Self { current: Some(state), previous: Vec::new() }
    }

    /// Current state, if the session is open.
    pub fn current(&self) -> Option<&SessionState> {
        self.current.as_ref()
    }

    /// Archived states, newest first.
    pub fn previous(&self) -> &[SessionState] {
        &self.previous
    }

    /// Whether there is an open session.
    pub fn has_current_state(&self) -> bool {
        self.current.is_some()
    }

    /// Move the current state into the archive. No-op without a current state.
    pub fn archive_current_state(&mut self) {
        if let Some(state) = self.current.take() {
            self.previous.insert(0, state);
            self.previous.truncate(MAX_ARCHIVED_STATES);
        }
    }

    /// Archive the current state and make `state` current.
    pub fn promote_state(&mut self, state: SessionState) {
        self.archive_current_state();
        self.current = Some(state);
    }
}

/// Group sender-key state for one `(address, distribution)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyRecord {
    /// Opaque group ratchet state
    #[serde(with = "serde_bytes")]
    pub state: Vec<u8>,
    /// Creation time (unix millis)
    pub created_at_millis: u64,
}

#[cfg(test)]
mod tests {
    use sealwire_crypto::IdentityKeyPair;

    use super::*;

    fn state(tag: u8) -> SessionState {
        SessionState {
            remote_identity: IdentityKeyPair::from_seed([tag; 32]).public_key(),
            receiving_ratchet_key: [tag; 32],
            local_base_key: [tag; 32],
            pre_key_id: None,
            signed_pre_key_id: 1,
            created_at_millis: u64::from(tag),
            ratchet: Vec::new(),
        }
    }

    #[test]
    fn archive_moves_current_to_front() {
        let mut record = SessionRecord::new(state(1));
        record.promote_state(state(2));
        record.archive_current_state();

        assert!(!record.has_current_state());
        assert_eq!(record.previous()[0].created_at_millis, 2);
        assert_eq!(record.previous()[1].created_at_millis, 1);
    }

    #[test]
    fn archive_without_current_is_noop() {
        let mut record = SessionRecord::default();
        record.archive_current_state();
        assert!(record.previous().is_empty());
    }

    #[test]
    fn archive_is_bounded() {
        let mut record = SessionRecord::default();
        for tag in 0..50u8 {
            record.promote_state(state(tag));
        }
        record.archive_current_state();

        assert_eq!(record.previous().len(), MAX_ARCHIVED_STATES);
        assert_eq!(record.previous()[0].created_at_millis, 49);
    }
}
