//! Timestamp parsing and calendar-month arithmetic (always UTC).

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, UtcOffset};

use crate::error::{Result, TallyError};

/// Parse an RFC 3339 timestamp, a calendar date (`2024-01-01`), or a
/// calendar month (`2024-01`). Results are converted to UTC.
pub fn parse_timestamp(input: &str) -> Result<OffsetDateTime> {
    let s = input.trim();
    let invalid = || TallyError::InvalidTimestamp {
        input: input.to_string(),
    };

    if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(ts.to_offset(UtcOffset::UTC));
    }
    if let Ok(date) = Date::parse(s, format_description!("[year]-[month]-[day]")) {
        return Ok(date.midnight().assume_utc());
    }
    // "YYYY-MM"
    let (y, m) = s.split_once('-').ok_or_else(invalid)?;
    if y.len() != 4 || m.len() != 2 {
        return Err(invalid());
    }
    let year: i32 = y.parse().map_err(|_| invalid())?;
    let month: u8 = m.parse().map_err(|_| invalid())?;
    let month = Month::try_from(month).map_err(|_| invalid())?;
    let date = Date::from_calendar_date(year, month, 1).map_err(|_| invalid())?;
    Ok(date.midnight().assume_utc())
}

/// Read a timestamp out of a raw JSON value. Strings go through
/// [`parse_timestamp`]; numbers are Unix seconds.
pub fn timestamp_from_value(v: &Value) -> Result<OffsetDateTime> {
    let invalid = || TallyError::InvalidTimestamp {
        input: v.to_string(),
    };
    match v {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => {
            let secs = match n.as_i64() {
                Some(i) => i,
                None => {
                    let f = n.as_f64().filter(|f| f.is_finite()).ok_or_else(invalid)?;
                    if f < i64::MIN as f64 || f > i64::MAX as f64 {
                        return Err(invalid());
                    }
                    f.floor() as i64
                }
            };
            OffsetDateTime::from_unix_timestamp(secs).map_err(|_| invalid())
        }
        _ => Err(invalid()),
    }
}

/// Format as RFC 3339 for display. Falls back to the debug form.
pub fn format_rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| format!("{ts:?}"))
}

/// First instant of the calendar month containing `ts`.
pub fn month_start(ts: OffsetDateTime) -> OffsetDateTime {
    let date = ts.to_offset(UtcOffset::UTC).date();
    let first = date.replace_day(1).unwrap_or(date);
    first.midnight().assume_utc()
}

/// First instant of the month after the one containing `ts`.
/// `None` only past the end of the supported calendar.
pub fn next_month(ts: OffsetDateTime) -> Option<OffsetDateTime> {
    let utc = ts.to_offset(UtcOffset::UTC);
    let (year, month) = match utc.month() {
        Month::December => (utc.year() + 1, Month::January),
        m => (utc.year(), m.next()),
    };
    Date::from_calendar_date(year, month, 1)
        .ok()
        .map(|d| d.midnight().assume_utc())
}

/// `(year, month)` of `ts` in UTC.
pub fn month_key(ts: OffsetDateTime) -> (i32, Month) {
    let utc = ts.to_offset(UtcOffset::UTC);
    (utc.year(), utc.month())
}

/// Every month start whose month overlaps `[start, end]`, ascending.
/// Empty when `start > end`.
pub fn months_between(start: OffsetDateTime, end: OffsetDateTime) -> Vec<OffsetDateTime> {
    let mut out = Vec::new();
    if start > end {
        return out;
    }
    let last = month_start(end);
    let mut cur = month_start(start);
    while cur <= last {
        out.push(cur);
        match next_month(cur) {
            Some(next) => cur = next,
            None => break,
        }
    }
    out
}

/// `"2024-01"` style label.
pub fn month_label(ts: OffsetDateTime) -> String {
    let (year, month) = month_key(ts);
    format!("{year:04}-{:02}", month as u8)
}
