//! Maintenance commands over a key store.
//!
//! Each command is one short-lived operation against the [`ProtocolCore`];
//! the binary opens the store, runs one command and logs its [`Outcome`].

use std::{fmt, time::Duration};

use clap::Subcommand;
use sealwire_core::{
    DistributionId, Environment, KeyError, KeyMaterialStore, ProtocolAddress, ProtocolCore,
    with_session_lock,
};

use crate::error::CliError;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Key maintenance command.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the identity key, an active signed prekey and one-time prekeys
    Register,

    /// Generate a batch of one-time prekeys when fewer than `threshold` remain
    Refill {
        /// Minimum number of one-time prekeys to keep available
        #[arg(long, default_value = "10")]
        threshold: usize,
    },

    /// Generate a new active signed prekey and clean superseded ones
    RotateSigned,

    /// Delete superseded signed prekeys past the archive age
    CleanSigned,

    /// Rotate our sender key for a group distribution
    RotateSenderKey {
        /// Distribution id of the group
        distribution: u128,

        /// Only rotate when the key is older than this many days
        #[arg(long)]
        max_age_days: Option<u64>,
    },

    /// Archive every session and drop all sender key state
    Reset,

    /// Report key inventory
    Status,
}

/// Result of a command, logged by the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Registration material was created
    Registered {
        /// Active signed prekey id
        signed_pre_key: u32,
        /// Number of one-time prekeys generated
        one_time_pre_keys: usize,
    },
    /// One-time prekeys after a refill check
    Refilled {
        /// Prekeys generated by this run (0 when above threshold)
        generated: usize,
        /// Prekeys available now
        available: usize,
    },
    /// Signed prekey rotated
    SignedRotated {
        /// New active signed prekey id
        id: u32,
        /// Superseded keys deleted
        cleaned: usize,
    },
    /// Superseded signed prekeys deleted
    Cleaned {
        /// Keys deleted
        deleted: usize,
    },
    /// Sender key rotation result
    SenderKeyRotated {
        /// Distribution checked
        distribution: DistributionId,
        /// Whether the key was deleted
        rotated: bool,
    },
    /// Sessions archived and sender keys cleared
    Reset,
    /// Key inventory
    Status {
        /// Identity key exists
        registered: bool,
        /// One-time prekeys available
        available_pre_keys: usize,
        /// Active signed prekey id
        active_signed_pre_key: Option<u32>,
        /// Stored session records
        sessions: usize,
    },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered { signed_pre_key, one_time_pre_keys } => write!(
                f,
                "registered with signed prekey {signed_pre_key} \
                 and {one_time_pre_keys} one-time prekeys"
            ),
            Self::Refilled { generated, available } => {
                write!(f, "generated {generated} one-time prekeys, {available} available")
            },
            Self::SignedRotated { id, cleaned } => {
                write!(f, "signed prekey {id} active, {cleaned} superseded keys deleted")
            },
            Self::Cleaned { deleted } => write!(f, "{deleted} superseded signed prekeys deleted"),
            Self::SenderKeyRotated { distribution, rotated: true } => {
                write!(f, "sender key for {distribution} rotated")
            },
            Self::SenderKeyRotated { distribution, rotated: false } => {
                write!(f, "sender key for {distribution} kept")
            },
            Self::Reset => write!(f, "sessions archived, sender keys cleared"),
            Self::Status { registered, available_pre_keys, active_signed_pre_key, sessions } => {
                let active =
                    active_signed_pre_key.map_or_else(|| "none".to_string(), |id| id.to_string());
                write!(
                    f,
                    "registered={registered} one_time_pre_keys={available_pre_keys} \
                     active_signed_pre_key={active} sessions={sessions}"
                )
            },
        }
    }
}

/// Run `command` for the account at `local_address`.
pub fn execute<S: KeyMaterialStore, E: Environment>(
    core: &ProtocolCore<S, E>,
    local_address: &ProtocolAddress,
    command: &Command,
) -> Result<Outcome, CliError> {
    let outcome = match command {
        Command::Register => {
            let keys = core.register()?;
            Outcome::Registered {
                signed_pre_key: keys.signed_pre_key.id,
                one_time_pre_keys: keys.one_time_pre_keys.len(),
            }
        },
        Command::Refill { threshold } => refill(core, *threshold)?,
        Command::RotateSigned => {
            require_identity(core)?;
            let record = core.pre_keys().generate_signed_pre_key(true)?;
            let cleaned = core.pre_keys().clean_signed_pre_keys()?;
            Outcome::SignedRotated { id: record.id, cleaned }
        },
        Command::CleanSigned => {
            Outcome::Cleaned { deleted: core.pre_keys().clean_signed_pre_keys()? }
        },
        Command::RotateSenderKey { distribution, max_age_days } => {
            let distribution = DistributionId(*distribution);
            let sender_keys = core.sender_keys(local_address.clone());
            let rotated = match max_age_days {
                Some(days) => sender_keys.rotate_if_older_than(distribution, DAY * (*days as u32))?,
                None => {
                    sender_keys.rotate_our_key(distribution)?;
                    true
                },
            };
            Outcome::SenderKeyRotated { distribution, rotated }
        },
        Command::Reset => {
            core.reset_for_reregistration(local_address.clone())?;
            Outcome::Reset
        },
        Command::Status => status(core)?,
    };
    Ok(outcome)
}

fn require_identity<S: KeyMaterialStore, E: Environment>(
    core: &ProtocolCore<S, E>,
) -> Result<(), CliError> {
    if core.identity().has_identity()? { Ok(()) } else { Err(CliError::NotRegistered) }
}

fn refill<S: KeyMaterialStore, E: Environment>(
    core: &ProtocolCore<S, E>,
    threshold: usize,
) -> Result<Outcome, CliError> {
    require_identity(core)?;

    let generated = with_session_lock(core.lock(), |_guard| {
        if core.pre_keys().available_pre_keys()? >= threshold {
            return Ok(0);
        }
        Ok::<_, KeyError>(core.pre_keys().generate_one_time_pre_keys()?.len())
    })?;

    if generated == 0 {
        tracing::debug!(threshold, "Enough one-time prekeys, skipping refill");
    }
    Ok(Outcome::Refilled { generated, available: core.pre_keys().available_pre_keys()? })
}

fn status<S: KeyMaterialStore, E: Environment>(
    core: &ProtocolCore<S, E>,
) -> Result<Outcome, CliError> {
    let outcome = with_session_lock(core.lock(), |_guard| {
        Ok::<_, KeyError>(Outcome::Status {
            registered: core.identity().has_identity()?,
            available_pre_keys: core.pre_keys().available_pre_keys()?,
            active_signed_pre_key: core.pre_keys().metadata()?.active_signed_pre_key_id,
            sessions: core.store().session_addresses().map_err(KeyError::from)?.len(),
        })
    })?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use sealwire_core::{CoreConfig, MemoryKeyStore, PRE_KEY_BATCH_SIZE};

    use super::*;
    use crate::system_env::SystemEnv;

    fn core() -> ProtocolCore<MemoryKeyStore, SystemEnv> {
        ProtocolCore::in_process(MemoryKeyStore::new(), SystemEnv::new(), CoreConfig::default())
    }

    fn local() -> ProtocolAddress {
        ProtocolAddress::primary("local")
    }

    #[test]
    fn status_before_registration() {
        let outcome = execute(&core(), &local(), &Command::Status).unwrap();
        assert_eq!(
            outcome,
            Outcome::Status {
                registered: false,
                available_pre_keys: 0,
                active_signed_pre_key: None,
                sessions: 0
            }
        );
    }

    #[test]
    fn register_then_status() {
        let core = core();
        let Outcome::Registered { signed_pre_key, .. } =
            execute(&core, &local(), &Command::Register).unwrap()
        else {
            panic!("expected registration outcome");
        };

        let status = execute(&core, &local(), &Command::Status).unwrap();
        assert_eq!(
            status,
            Outcome::Status {
                registered: true,
                available_pre_keys: PRE_KEY_BATCH_SIZE as usize,
                active_signed_pre_key: Some(signed_pre_key),
                sessions: 0
            }
        );
    }

    #[test]
    fn refill_respects_threshold() {
        let core = core();
        execute(&core, &local(), &Command::Register).unwrap();

        let skipped = execute(&core, &local(), &Command::Refill { threshold: 10 }).unwrap();
        assert_eq!(skipped, Outcome::Refilled { generated: 0, available: 100 });

        let refilled = execute(&core, &local(), &Command::Refill { threshold: 150 }).unwrap();
        assert_eq!(refilled, Outcome::Refilled { generated: 100, available: 200 });
    }

    #[test]
    fn maintenance_needs_registration() {
        let core = core();
        assert!(matches!(
            execute(&core, &local(), &Command::Refill { threshold: 10 }),
            Err(CliError::NotRegistered)
        ));
        assert!(matches!(
            execute(&core, &local(), &Command::RotateSigned),
            Err(CliError::NotRegistered)
        ));
    }

    #[test]
    fn sender_key_rotation_without_age_always_rotates() {
        let command = Command::RotateSenderKey { distribution: 4, max_age_days: None };
        let outcome = execute(&core(), &local(), &command).unwrap();
        assert_eq!(
            outcome,
            Outcome::SenderKeyRotated { distribution: DistributionId(4), rotated: true }
        );

        let aged = Command::RotateSenderKey { distribution: 4, max_age_days: Some(14) };
        let outcome = execute(&core(), &local(), &aged).unwrap();
        assert_eq!(
            outcome,
            Outcome::SenderKeyRotated { distribution: DistributionId(4), rotated: false }
        );
    }
}
