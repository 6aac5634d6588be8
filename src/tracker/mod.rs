// Session and activity tracking: online state, login history and
// cumulative time-on-site accounting

pub mod clock;
pub mod manager;
pub mod time;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::ActivityTracker;
pub use time::{current_session_elapsed, format_duration};
pub use types::{TrackerConfig, TrackerError};
