use chrono::{DateTime, TimeZone, Utc};

/// Source of "now" for everything that compares against lease expiry or decision deadlines.
///
/// Production code uses `SystemClock`. Tests substitute a clock they can move forward by hand so
/// that windows of seconds or hours elapse instantly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Return ISO 8601 date-time string with UTC timezone using millisecond resolution.
///
/// eg.
/// ```
/// "2021-02-12T13:30:41.791Z"
/// ```
pub fn date_time_iso_str(date_time: &DateTime<Utc>) -> String {
    date_time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Number of milliseconds since the unix epoch. This is how timestamps are persisted.
pub fn to_millis(date_time: &DateTime<Utc>) -> i64 {
    date_time.timestamp_millis()
}

pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis(millis)
}

/// Whole seconds from `now` until `deadline`, never negative.
pub fn seconds_until(now: &DateTime<Utc>, deadline: &DateTime<Utc>) -> i64 {
    (*deadline - *now).num_seconds().max(0)
}
