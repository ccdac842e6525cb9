//! Tick clock and local-time calendar mapping.
//!
//! A *tick* is a wall-clock instant in 100 ns units since the Unix epoch.
//! Logs are ordered and range-filtered by tick; the process-local time zone
//! decides which per-day store a tick belongs to and how instants are
//! displayed.

use chrono::{DateTime, Local, NaiveDate, Utc};

/// Ticks per second (one tick is 100 ns).
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks per millisecond.
pub const TICKS_PER_MILLISECOND: i64 = 10_000;

/// Width of one interval-stat bucket: 10 real minutes.
pub const INTERVAL_TICKS: i64 = 10 * 60 * TICKS_PER_SECOND;

/// Returns the current wall-clock instant as a tick.
pub fn now_tick() -> i64 {
    let now = Utc::now();
    now.timestamp() * TICKS_PER_SECOND + i64::from(now.timestamp_subsec_nanos()) / 100
}

/// Converts a tick to a local-time datetime.
pub fn datetime_of(tick: i64) -> DateTime<Local> {
    let secs = tick.div_euclid(TICKS_PER_SECOND);
    let nanos = (tick.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .with_timezone(&Local)
}

/// Converts a local-time datetime to a tick.
pub fn tick_of(datetime: DateTime<Local>) -> i64 {
    datetime.timestamp() * TICKS_PER_SECOND
        + i64::from(datetime.timestamp_subsec_nanos()) / 100
}

/// Returns the local calendar date a tick falls on.
pub fn local_date_of(tick: i64) -> NaiveDate {
    datetime_of(tick).date_naive()
}

/// Floors a tick to the start of its 10-minute interval bucket.
pub fn interval_floor(tick: i64) -> i64 {
    tick - tick.rem_euclid(INTERVAL_TICKS)
}
