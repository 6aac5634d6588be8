// Pure time helpers shared by the tracker and the reporting views

use crate::models::Account;
use chrono::{DateTime, Utc};

/// Seconds elapsed in the account's current session, without mutating state.
/// Returns 0 whenever the account is offline, even if a stale session start
/// is still present on the document.
pub fn current_session_elapsed(account: &Account, now: DateTime<Utc>) -> u64 {
    match account.current_session_start {
        Some(start) if account.is_online => (now - start).num_seconds().max(0) as u64,
        _ => 0,
    }
}

/// Render a duration as "{h}h {m}m {s}s", dropping the hour component when
/// zero and both hour and minute components for sub-minute durations.
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountRole;
    use chrono::Duration;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(60), "1m 0s");
        assert_eq!(format_duration(65), "1m 5s");
        assert_eq!(format_duration(3600), "1h 0m 0s");
        assert_eq!(format_duration(3661), "1h 0m 1s");
        assert_eq!(format_duration(7325), "2h 2m 5s");
    }

    #[test]
    fn test_current_session_elapsed() {
        let t0 = Utc::now();
        let mut account = Account::new(
            "Test".to_string(),
            "t@example.com".to_string(),
            "hash".to_string(),
            AccountRole::User,
            t0,
        );

        // Offline with no session
        assert_eq!(current_session_elapsed(&account, t0), 0);

        account.begin_session(t0, None, None);
        assert_eq!(
            current_session_elapsed(&account, t0 + Duration::seconds(90)),
            90
        );

        // Clock behind the session start floors at zero
        assert_eq!(
            current_session_elapsed(&account, t0 - Duration::seconds(5)),
            0
        );
    }

    #[test]
    fn test_elapsed_zero_when_offline_with_stale_start() {
        let t0 = Utc::now();
        let mut account = Account::new(
            "Test".to_string(),
            "t@example.com".to_string(),
            "hash".to_string(),
            AccountRole::User,
            t0,
        );

        // A missed transition can leave the start set while offline
        account.current_session_start = Some(t0);
        account.is_online = false;

        assert_eq!(
            current_session_elapsed(&account, t0 + Duration::seconds(300)),
            0
        );
    }
}
