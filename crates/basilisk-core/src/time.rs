//! Database timestamp encoding shared by the store and the scheduler.
//!
//! Fixed-width RFC 3339 (millisecond precision, `Z` suffix) so that string
//! comparison in SQL (`run_at <= ?1`, `ORDER BY scheduled_at`) matches
//! chronological order.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

/// Current time truncated to the precision the database keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub fn to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn from_db(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn encoding_sorts_chronologically() {
        let a = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let b = a + Duration::milliseconds(1);
        let c = a + Duration::hours(3);
        let mut encoded = vec![to_db(&c), to_db(&a), to_db(&b)];
        encoded.sort();
        assert_eq!(encoded, vec![to_db(&a), to_db(&b), to_db(&c)]);
    }

    #[test]
    fn round_trips_at_millisecond_precision() {
        let a = Utc.with_ymd_and_hms(2026, 10, 16, 12, 30, 5).unwrap() + Duration::milliseconds(250);
        assert_eq!(from_db(&to_db(&a)).unwrap(), a);
        assert_eq!(to_db(&a), "2026-10-16T12:30:05.250Z");
    }
}
