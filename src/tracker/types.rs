// Tracker configuration and error types

use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Flat credit added to the time-on-site total once this many seconds
    /// have passed since the last persisted update (quantized, not exact)
    #[serde(default = "default_activity_credit_secs")]
    pub activity_credit_secs: u64,
    /// When true, logout settles the full session duration on top of the
    /// incremental credits already applied, double-counting that time the
    /// way earlier deployments did
    #[serde(default)]
    pub legacy_logout_accounting: bool,
    /// Attempts per operation when a concurrent write bumps the account
    /// version out from under us
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

fn default_activity_credit_secs() -> u64 {
    30
}

fn default_conflict_retries() -> u32 {
    3
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            activity_credit_secs: default_activity_credit_secs(),
            legacy_logout_accounting: false,
            conflict_retries: default_conflict_retries(),
        }
    }
}

/// Errors surfaced by session lifecycle operations. Activity tracking never
/// returns these; it logs and swallows every failure.
#[derive(Debug)]
pub enum TrackerError {
    /// The account does not exist
    AccountNotFound(Uuid),
    /// Retries exhausted against concurrent writers
    Contention(Uuid),
    /// The storage backend failed
    Storage(StorageError),
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerError::AccountNotFound(id) => write!(f, "Account not found: {}", id),
            TrackerError::Contention(id) => {
                write!(f, "Too many concurrent updates for account {}", id)
            }
            TrackerError::Storage(err) => write!(f, "Storage error: {}", err),
        }
    }
}

impl std::error::Error for TrackerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrackerError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for TrackerError {
    fn from(err: StorageError) -> Self {
        TrackerError::Storage(err)
    }
}
