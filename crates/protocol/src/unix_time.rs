//! Second-based Unix time, the clock the protocol runs on.

pub const MINUTE: i64 = 60;
pub const HOUR: i64 = 60 * MINUTE;
pub const DAY: i64 = 24 * HOUR;

/// Current Unix time in seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// `now() + shift_seconds`, for deadlines and cutoffs.
pub fn now_plus(shift_seconds: i64) -> i64 {
    now() + shift_seconds
}
