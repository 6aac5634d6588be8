use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tracker::{current_session_elapsed, format_duration};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    User,
    Admin,
}

/// One login-to-logout interval in an account's history.
/// The most recent entry is "open" while it has no logout_time.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionRecord {
    pub login_time: DateTime<Utc>,
    pub logout_time: Option<DateTime<Utc>>,
    pub session_duration_secs: Option<u64>,
    pub client_address: Option<String>,
    pub client_agent: Option<String>,
}

impl SessionRecord {
    pub fn is_open(&self) -> bool {
        self.logout_time.is_none()
    }
}

/// Account document. Persisted as a whole on every write; `version` is the
/// optimistic-concurrency token checked by the storage backend.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: AccountRole,
    pub is_online: bool,
    pub current_session_start: Option<DateTime<Utc>>,
    /// Cumulative seconds credited across all sessions. Only ever increases.
    pub total_time_secs: u64,
    /// Incremental credit already applied to the currently open session.
    /// Reset on login and logout; consumed by the corrected settlement formula.
    pub session_credited_secs: u64,
    pub last_activity: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub last_logout: Option<DateTime<Utc>>,
    pub login_history: Vec<SessionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Account {
    /// Create a new account with a fresh id and no session history
    pub fn new(
        name: String,
        email: String,
        password_hash: String,
        role: AccountRole,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            name,
            password_hash,
            role,
            is_online: false,
            current_session_start: None,
            total_time_secs: 0,
            session_credited_secs: 0,
            last_activity: now,
            last_login: None,
            last_logout: None,
            login_history: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Bump the persisted-update timestamp. Callers do this right before
    /// handing the document to the store; the activity tracker measures
    /// elapsed time against this field.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Append an open session record and flip the account online.
    /// A prior record left open stays open; only the newest one is ever closed.
    pub fn begin_session(
        &mut self,
        now: DateTime<Utc>,
        client_address: Option<String>,
        client_agent: Option<String>,
    ) {
        self.login_history.push(SessionRecord {
            login_time: now,
            logout_time: None,
            session_duration_secs: None,
            client_address,
            client_agent,
        });
        self.last_login = Some(now);
        self.is_online = true;
        self.current_session_start = Some(now);
        self.session_credited_secs = 0;
    }

    /// Close the most recent session record if it is still open. Returns the
    /// settled session duration in seconds, or None when there was nothing to
    /// close (empty history or an already-closed record).
    ///
    /// With `legacy_accounting` the full duration is added to the total even
    /// though part of it was already credited incrementally; otherwise the
    /// already-credited seconds are subtracted first.
    pub fn end_session(&mut self, now: DateTime<Utc>, legacy_accounting: bool) -> Option<u64> {
        let credited = self.session_credited_secs;
        let record = self.login_history.last_mut()?;
        if record.logout_time.is_some() {
            return None;
        }

        let duration = (now - record.login_time).num_seconds().max(0) as u64;
        record.logout_time = Some(now);
        record.session_duration_secs = Some(duration);

        let credit = if legacy_accounting {
            duration
        } else {
            duration.saturating_sub(credited)
        };
        self.total_time_secs += credit;

        self.last_logout = Some(now);
        self.is_online = false;
        self.current_session_start = None;
        self.session_credited_secs = 0;

        Some(duration)
    }

    /// The most recent session record, if it is still open
    pub fn open_session_record(&self) -> Option<&SessionRecord> {
        self.login_history.last().filter(|r| r.is_open())
    }
}

/// JWT claims carried by the bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account ID
    pub sub: String,
    pub email: String,
    pub role: AccountRole,
    /// Expiration time as a unix timestamp
    pub exp: usize,
}

// ---- Request payloads ----

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

// ---- Response views ----

/// Identity summary returned by register/login and profile updates
#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: AccountRole,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            name: account.name.clone(),
            email: account.email.clone(),
            role: account.role,
        }
    }
}

/// Full account snapshot used by the profile endpoint and the admin
/// dashboard: session state, accumulated time with formatted strings, and
/// the complete login history.
#[derive(Debug, Serialize)]
pub struct AccountSnapshot {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: AccountRole,
    /// bcrypt hash, exposed only on admin views; never a recoverable plaintext
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashed_password: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub last_logout: Option<DateTime<Utc>>,
    pub is_online: bool,
    pub total_time_secs: u64,
    pub total_time_formatted: String,
    pub current_session_secs: u64,
    pub current_session_formatted: String,
    pub current_session_start: Option<DateTime<Utc>>,
    pub login_history: Vec<SessionRecord>,
    pub login_count: usize,
}

impl AccountSnapshot {
    pub fn new(account: &Account, now: DateTime<Utc>, include_hash: bool) -> Self {
        let current_session_secs = current_session_elapsed(account, now);
        Self {
            id: account.id,
            name: account.name.clone(),
            email: account.email.clone(),
            role: account.role,
            hashed_password: include_hash.then(|| account.password_hash.clone()),
            created_at: account.created_at,
            updated_at: account.updated_at,
            last_login: account.last_login,
            last_logout: account.last_logout,
            is_online: account.is_online,
            total_time_secs: account.total_time_secs,
            total_time_formatted: format_duration(account.total_time_secs),
            current_session_secs,
            current_session_formatted: format_duration(current_session_secs),
            current_session_start: account.current_session_start,
            login_history: account.login_history.clone(),
            login_count: account.login_history.len(),
        }
    }
}
