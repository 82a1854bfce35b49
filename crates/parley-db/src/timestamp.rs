//! Timestamps are stored as RFC 3339 UTC text with a fixed microsecond width,
//! so string comparison in SQL orders them chronologically.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

pub fn now() -> String {
    format(Utc::now())
}

pub fn format(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp. Falls back to SQLite's `datetime('now')` shape.
pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}

pub fn start_of_day(date: NaiveDate) -> String {
    format(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
}

pub fn end_of_day(date: NaiveDate) -> String {
    format(
        date.and_hms_micro_opt(23, 59, 59, 999_999)
            .unwrap_or_default()
            .and_utc(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formatted_timestamps_sort_lexically() {
        let a = format(Utc.with_ymd_and_hms(2024, 1, 9, 23, 0, 0).unwrap());
        let b = format(Utc.with_ymd_and_hms(2024, 1, 10, 1, 0, 0).unwrap());
        assert!(a < b);
        assert_eq!(a, "2024-01-09T23:00:00.000000Z");
    }

    #[test]
    fn parses_sqlite_default_format() {
        let ts = parse("2024-03-01 12:30:00").unwrap();
        assert_eq!(format(ts), "2024-03-01T12:30:00.000000Z");
    }

    #[test]
    fn day_bounds_cover_whole_day() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert_eq!(start_of_day(date), "2024-05-02T00:00:00.000000Z");
        assert_eq!(end_of_day(date), "2024-05-02T23:59:59.999999Z");
    }
}
