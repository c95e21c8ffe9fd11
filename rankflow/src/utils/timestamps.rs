//! UTC timestamp helpers.

use chrono::{DateTime, Utc};

/// Timestamp type recorded in run state.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns the current UTC time as an ISO 8601 string with microseconds,
/// e.g. `2024-05-01T12:00:00.000000+00:00`.
#[must_use]
pub fn iso_timestamp() -> String {
    format_timestamp(&now_utc())
}

/// Formats a timestamp the way checkpoints and events print it.
#[must_use]
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Milliseconds elapsed since `start`, clamped at zero.
#[must_use]
pub fn elapsed_ms(start: &Timestamp) -> u64 {
    let ms = (now_utc() - *start).num_milliseconds();
    u64::try_from(ms).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-05-01T12:30:00.000000+00:00");
    }

    #[test]
    fn test_elapsed_never_negative() {
        let future = now_utc() + chrono::Duration::seconds(60);
        assert_eq!(elapsed_ms(&future), 0);
    }
}
