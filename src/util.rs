/// Time helpers shared by the collector, the commit path and the scheduler.
///
/// IMPORTANT:
/// - No venue or protocol logic lives here.
/// - Everything except `now_ms` is pure and deterministic.
///

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};

/// Returns the current Unix timestamp in milliseconds.
///
/// Used for:
/// - Staleness comparisons in the snapshot store
/// - Commit file names
/// - Schedule alignment
///
/// A clock before UNIX_EPOCH reads as 0.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

/// ISO-8601 UTC timestamp safe for file names.
///
/// Example:
/// - 1718000000123 -> "2024-06-10T06-13-20-123Z"
pub fn file_stamp(ms: i64) -> String {
    let ts = DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default();
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// Delay from `now_ms` until the next multiple of `interval` since the
/// epoch. A `now_ms` exactly on a boundary waits a full interval.
///
/// Example (hourly):
/// - 10:59:30.000 -> 30s
/// - 11:00:00.000 -> 3600s
pub fn until_next_boundary(now_ms: i64, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis().max(1) as i64;
    let elapsed = now_ms.rem_euclid(interval_ms);
    Duration::from_millis((interval_ms - elapsed) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_stamp_has_no_colons_or_dots() {
        let s = file_stamp(1_718_000_000_123);
        assert_eq!(s, "2024-06-10T06-13-20-123Z");
        assert!(!s.contains(':') && !s.contains('.'));
    }

    #[test]
    fn next_boundary_on_the_hour() {
        let hour = Duration::from_secs(3600);
        let top = 1_717_999_200_000; // 2024-06-10T06:00:00Z
        assert_eq!(until_next_boundary(top - 30_000, hour), Duration::from_secs(30));
        assert_eq!(until_next_boundary(top, hour), hour);
        assert_eq!(until_next_boundary(top + 1, hour), Duration::from_millis(3_599_999));
    }

    #[test]
    fn now_is_after_2024() {
        assert!(now_ms() > 1_700_000_000_000);
    }
}
