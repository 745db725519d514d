//! Timestamp helpers.
//!
//! Timestamps are persisted as RFC 3339 text. A fixed millisecond precision
//! with a `Z` suffix keeps lexical order equal to chronological order, which
//! the job claim query relies on.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::errors::{Error, Result};

pub fn to_db_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_db_timestamp() -> String {
    to_db_timestamp(&Utc::now())
}

pub fn from_db_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::unexpected(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Milliseconds from now until `target`, or zero if it already passed.
pub fn millis_until(target: &DateTime<Utc>) -> u64 {
    (*target - Utc::now()).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn db_timestamps_sort_chronologically() {
        let a = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let b = a + Duration::milliseconds(5);
        let c = a + Duration::seconds(10);
        let mut values = vec![to_db_timestamp(&c), to_db_timestamp(&a), to_db_timestamp(&b)];
        values.sort();
        assert_eq!(
            values,
            vec![to_db_timestamp(&a), to_db_timestamp(&b), to_db_timestamp(&c)]
        );
        assert_eq!(to_db_timestamp(&a), "2026-01-01T00:00:00.000Z");
    }

    #[test]
    fn round_trips_through_text() {
        let a = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(from_db_timestamp(&to_db_timestamp(&a)).expect("parse"), a);
        assert!(from_db_timestamp("yesterday").is_err());
    }
}
