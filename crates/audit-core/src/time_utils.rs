use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use tracing::debug;

// ── Log date parsing ──────────────────────────────────────────────────────────

/// Naive date-time layouts accepted for the `START` date token.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Date-only layouts accepted for the `START` date token.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Parse the date token captured from a `START` line.
///
/// Accepts date-only values, naive date-times and RFC 3339 values. An offset
/// (or trailing `Z`) is discarded while the wall-clock time is kept, so the
/// result is always time-zone-naive.
///
/// Returns `None` for empty or unrecognised tokens.
pub fn parse_log_date(token: &str) -> Option<NaiveDateTime> {
    let s = token.trim();
    if s.is_empty() {
        return None;
    }

    // Replace trailing 'Z' with '+00:00' for RFC 3339 compatibility.
    let normalised = match s.strip_suffix('Z') {
        Some(stripped) => format!("{}+00:00", stripped),
        None => s.to_string(),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalised) {
        return Some(dt.naive_local());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive);
        }
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    debug!("could not parse log date \"{}\"", s);
    None
}

// ── Month helpers ─────────────────────────────────────────────────────────────

/// Calendar month key in `"%Y-%m"` form.
pub fn month_key(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m").to_string()
}

/// Every month key from `first` to `last` inclusive, in ascending order.
///
/// Returns an empty vector when `first` is after `last`.
pub fn month_range(first: &NaiveDateTime, last: &NaiveDateTime) -> Vec<String> {
    let mut keys = Vec::new();
    let (mut year, mut month) = (first.year(), first.month());
    let end = (last.year(), last.month());

    while (year, month) <= end {
        keys.push(format!("{:04}-{:02}", year, month));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }

    keys
}

// ── Tests ──────────────────────────────────────────────────────────────────────
