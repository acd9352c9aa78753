//! Configuration for the protocol core

use std::{num::NonZeroUsize, time::Duration};

/// Age after which superseded signed prekeys become eligible for deletion.
pub const SIGNED_PRE_KEY_ARCHIVE_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default age after which our group sender key is rotated before a send.
pub const SENDER_KEY_MAX_AGE: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Tunables for key lifecycle and routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Inactive signed prekeys older than this are cleaned, keeping one
    pub signed_pre_key_archive_age: Duration,

    /// Sender keys older than this are rotated before the next group send
    pub sender_key_max_age: Duration,

    /// Fewer sender-key capable members than this collapses a group send
    /// into per-member legacy sends
    pub sender_key_min_targets: usize,

    /// Worker threads for batch sealed-sender resolution
    pub resolver_parallelism: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            signed_pre_key_archive_age: SIGNED_PRE_KEY_ARCHIVE_AGE,
            sender_key_max_age: SENDER_KEY_MAX_AGE,
            sender_key_min_targets: 2,
            resolver_parallelism: std::thread::available_parallelism()
                .map_or(4, NonZeroUsize::get),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = CoreConfig::default();
        assert_eq!(config.signed_pre_key_archive_age.as_secs(), 2_592_000);
        assert_eq!(config.sender_key_min_targets, 2);
        assert!(config.resolver_parallelism >= 1);
    }
}
