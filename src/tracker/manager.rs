// Activity tracker for session lifecycle and time-on-site accounting

use super::clock::Clock;
use super::types::{TrackerConfig, TrackerError};
use crate::models::Account;
use crate::storage::{StorageBackend, StorageError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maintains per-account online state, login history and cumulative
/// time-on-site. Invoked from the login/logout handlers and, best-effort,
/// on every authenticated request.
///
/// Every operation is load-mutate-persist against the whole account
/// document; the version check in the store catches concurrent writers and
/// the operation is retried against fresh state.
#[derive(Clone)]
pub struct ActivityTracker {
    store: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
}

impl ActivityTracker {
    /// Create a new activity tracker
    pub fn new(
        store: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Current time from the injected clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn load(&self, account_id: Uuid) -> Result<Account, TrackerError> {
        self.store
            .find_account(account_id)
            .await?
            .ok_or(TrackerError::AccountNotFound(account_id))
    }

    /// Open a session: append an open record to the login history, flip the
    /// account online and stamp the login time. Returns the persisted account.
    pub async fn begin_session(
        &self,
        account_id: Uuid,
        client_address: Option<String>,
        client_agent: Option<String>,
    ) -> Result<Account, TrackerError> {
        for attempt in 0..self.config.conflict_retries {
            let mut account = self.load(account_id).await?;
            let now = self.clock.now();

            account.begin_session(now, client_address.clone(), client_agent.clone());
            account.touch(now);

            match self.store.update_account(account).await {
                Ok(saved) => {
                    info!("Session opened for account {}", account_id);
                    return Ok(saved);
                }
                Err(StorageError::VersionConflict) => {
                    debug!(
                        "Concurrent update while opening session for {} (attempt {})",
                        account_id,
                        attempt + 1
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(TrackerError::Contention(account_id))
    }

    /// Close the open session: settle its duration into the time-on-site
    /// total, stamp the logout time and flip the account offline. With no
    /// open session this is a no-op that persists nothing.
    ///
    /// Returns the account together with the settled session duration in
    /// seconds, or None when there was nothing to close.
    pub async fn end_session(
        &self,
        account_id: Uuid,
    ) -> Result<(Account, Option<u64>), TrackerError> {
        for attempt in 0..self.config.conflict_retries {
            let mut account = self.load(account_id).await?;
            let now = self.clock.now();

            let duration = match account.end_session(now, self.config.legacy_logout_accounting) {
                Some(duration) => duration,
                None => {
                    debug!("Logout for {} with no open session", account_id);
                    return Ok((account, None));
                }
            };
            account.touch(now);

            match self.store.update_account(account).await {
                Ok(saved) => {
                    info!(
                        "Session closed for account {} after {}s",
                        account_id, duration
                    );
                    return Ok((saved, Some(duration)));
                }
                Err(StorageError::VersionConflict) => {
                    debug!(
                        "Concurrent update while closing session for {} (attempt {})",
                        account_id,
                        attempt + 1
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(TrackerError::Contention(account_id))
    }

    /// Record request activity for an account. Stamps the last-activity
    /// time, recovers a missed online transition, and once enough time has
    /// passed since the last persisted update credits a flat
    /// `activity_credit_secs` to the time-on-site total (quantized, not the
    /// exact elapsed amount).
    ///
    /// Best-effort: every failure is logged and swallowed so tracking can
    /// never fail the request that triggered it.
    pub async fn record_activity(&self, account_id: Uuid) {
        for _ in 0..self.config.conflict_retries {
            let mut account = match self.store.find_account(account_id).await {
                Ok(Some(account)) => account,
                Ok(None) => {
                    warn!("Activity ping for unknown account {}", account_id);
                    return;
                }
                Err(err) => {
                    warn!("Activity tracking error for account {}: {}", account_id, err);
                    return;
                }
            };

            let now = self.clock.now();
            account.last_activity = now;

            // A crash or lost write can leave the session start behind while
            // the flag says offline; activity proves the account is back
            if !account.is_online && account.current_session_start.is_some() {
                account.is_online = true;
            }

            if account.is_online && account.current_session_start.is_some() {
                let since_update = (now - account.updated_at).num_seconds();
                if since_update >= self.config.activity_credit_secs as i64 {
                    account.total_time_secs += self.config.activity_credit_secs;
                    account.session_credited_secs += self.config.activity_credit_secs;
                }
            }

            account.touch(now);

            match self.store.update_account(account).await {
                Ok(_) => return,
                Err(StorageError::VersionConflict) => continue,
                Err(err) => {
                    warn!("Activity tracking error for account {}: {}", account_id, err);
                    return;
                }
            }
        }

        warn!(
            "Dropped activity update for account {} after repeated conflicts",
            account_id
        );
    }

    /// Fire-and-forget variant of `record_activity` for use from request
    /// middleware. The returned handle can be awaited in tests.
    pub fn spawn_record_activity(&self, account_id: Uuid) -> tokio::task::JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            tracker.record_activity(account_id).await;
        })
    }
}
