//! Standard key store invariants.

use sealwire_core::store::{MAX_ARCHIVED_STATES, PRE_KEY_ID_MASK};

use super::{Invariant, InvariantResult, KeyStoreSnapshot, Violation};

/// The active signed prekey id must refer to a stored signed prekey.
///
/// A dangling active id would publish a bundle whose signed prekey we can no
/// longer use to complete a handshake.
pub struct ActiveSignedPreKeyStored;

impl Invariant for ActiveSignedPreKeyStored {
    fn name(&self) -> &'static str {
        "ActiveSignedPreKeyStored"
    }

    fn check(&self, state: &KeyStoreSnapshot) -> InvariantResult {
        let Some(active) = state.metadata.active_signed_pre_key_id else {
            return Ok(());
        };

        if state.signed_pre_keys.iter().any(|record| record.id == active) {
            Ok(())
        } else {
            Err(Violation {
                invariant: self.name(),
                message: format!("active signed prekey {active} is not stored"),
            })
        }
    }
}

/// Prekey ids and counters stay within 24 bits.
pub struct PreKeyIdsInRange;

impl Invariant for PreKeyIdsInRange {
    fn name(&self) -> &'static str {
        "PreKeyIdsInRange"
    }

    fn check(&self, state: &KeyStoreSnapshot) -> InvariantResult {
        let counters = [
            ("next_pre_key_id", state.metadata.next_pre_key_id),
            ("next_signed_pre_key_id", state.metadata.next_signed_pre_key_id),
        ];
        for (name, value) in counters {
            if let Some(value) = value.filter(|value| *value > PRE_KEY_ID_MASK) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("{name} {value:#x} exceeds 24 bits"),
                });
            }
        }

        if let Some(record) =
            state.signed_pre_keys.iter().find(|record| record.id > PRE_KEY_ID_MASK)
        {
            return Err(Violation {
                invariant: self.name(),
                message: format!("signed prekey id {:#x} exceeds 24 bits", record.id),
            });
        }
        Ok(())
    }
}

/// Archived session states per device never exceed the bound.
pub struct SessionArchiveBounded;

impl Invariant for SessionArchiveBounded {
    fn name(&self) -> &'static str {
        "SessionArchiveBounded"
    }

    fn check(&self, state: &KeyStoreSnapshot) -> InvariantResult {
        for (address, record) in &state.sessions {
            if record.previous().len() > MAX_ARCHIVED_STATES {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{address}: {} archived states, max {MAX_ARCHIVED_STATES}",
                        record.previous().len()
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sealwire_core::store::PreKeyMetadata;

    use super::*;

    #[test]
    fn dangling_active_id_is_violation() {
        let state = KeyStoreSnapshot {
            metadata: PreKeyMetadata {
                active_signed_pre_key_id: Some(3),
                ..PreKeyMetadata::default()
            },
            ..KeyStoreSnapshot::empty()
        };

        let violation = ActiveSignedPreKeyStored.check(&state).unwrap_err();
        assert_eq!(violation.invariant, "ActiveSignedPreKeyStored");
    }

    #[test]
    fn counter_over_24_bits_is_violation() {
        let state = KeyStoreSnapshot {
            metadata: PreKeyMetadata {
                next_pre_key_id: Some(1 << 24),
                ..PreKeyMetadata::default()
            },
            ..KeyStoreSnapshot::empty()
        };

        assert!(PreKeyIdsInRange.check(&state).is_err());
    }
}
