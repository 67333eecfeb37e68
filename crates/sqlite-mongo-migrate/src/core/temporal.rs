//! Temporal normalization.
//!
//! SQLite stores timestamps as text. The normalizer recognizes the ISO-8601
//! forms the source data uses and turns them into BSON datetimes; anything it
//! does not recognize is passed through untouched so that irregular historical
//! rows never abort a batch.

use bson::{Bson, Document};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Naive date-time layouts, tried in order.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Offset-carrying layouts (`+03:00` style) for the space separator, which
/// RFC 3339 parsing does not accept.
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M%:z"];

/// Parse an ISO-8601-like timestamp. Naive values are taken as UTC.
pub fn parse_temporal(input: &str) -> Option<DateTime<Utc>> {
    let s = input.trim();
    // Cheapest rejection first: every accepted form starts with YYYY-MM-DD.
    if s.len() < 10 || !s.as_bytes()[..4].iter().all(u8::is_ascii_digit) {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if s.len() == 10 {
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
        }
    }
    None
}

/// Normalize one value: parseable strings become datetimes, everything else
/// is returned unchanged.
pub fn normalize(value: Bson) -> Bson {
    match value {
        Bson::String(s) => match parse_temporal(&s) {
            Some(dt) => Bson::DateTime(bson::DateTime::from_chrono(dt)),
            None => Bson::String(s),
        },
        other => other,
    }
}

/// Normalize the named fields of a document in place.
///
/// Absent, null and empty fields are left alone.
pub fn normalize_fields(doc: &mut Document, fields: &[&str]) {
    for field in fields {
        if let Some(value) = doc.get_mut(*field) {
            let current = std::mem::replace(value, Bson::Null);
            *value = normalize(current);
        }
    }
}

/// Render a datetime as an RFC 3339 string for the intermediate files.
pub fn to_iso_string(dt: bson::DateTime) -> String {
    dt.to_chrono().to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Convert Unix epoch seconds (as stored by some SQLite writers) to ISO-8601.
///
/// Precision is milliseconds, the resolution of a stored BSON datetime.
pub fn epoch_seconds_to_iso(seconds: f64) -> Option<String> {
    if !seconds.is_finite() {
        return None;
    }
    let millis = (seconds * 1000.0).round() as i64;
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}
