//! Timestamp parsing and formatting for stored values.
//!
//! Stored timestamps are `YYYY-MM-DD HH:MM:SS`; parsing also accepts a `T`
//! separator and bare dates (midnight), both of which appear in older stores
//! and in catalog air dates.

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

const TIMESTAMP: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const TIMESTAMP_T: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
const DATE_ONLY: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

#[must_use]
pub fn parse_timestamp(text: &str) -> Option<PrimitiveDateTime> {
    if let Ok(at) = PrimitiveDateTime::parse(text, TIMESTAMP) {
        return Some(at);
    }
    if let Ok(at) = PrimitiveDateTime::parse(text, TIMESTAMP_T) {
        return Some(at);
    }
    Date::parse(text, DATE_ONLY)
        .ok()
        .map(|date| date.with_time(Time::MIDNIGHT))
}

#[must_use]
pub fn format_timestamp(at: PrimitiveDateTime) -> String {
    at.format(TIMESTAMP).unwrap_or_default()
}

#[must_use]
pub fn format_date(date: Date) -> String {
    date.format(DATE_ONLY).unwrap_or_default()
}

/// Current wall-clock time, truncated to whole seconds so round-trips
/// through the stored format compare equal.
#[must_use]
pub fn now() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc().replace_nanosecond(0).unwrap_or_else(|_| OffsetDateTime::now_utc());
    PrimitiveDateTime::new(now.date(), now.time())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_space_and_t_separators() {
        let a = parse_timestamp("2024-01-16 12:30:00").unwrap();
        let b = parse_timestamp("2024-01-16T12:30:00").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parses_bare_dates_as_midnight() {
        let at = parse_timestamp("2024-01-16").unwrap();
        assert_eq!(format_timestamp(at), "2024-01-16 00:00:00");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("not a date").is_none());
        assert!(parse_timestamp("0000-00-00 00:00:00").is_none());
    }
}
