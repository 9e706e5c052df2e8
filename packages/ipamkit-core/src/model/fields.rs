//! Lenient field readers for phpIPAM JSON records.
//!
//! phpIPAM serializes most integers as strings (`"mask": "24"`) but not
//! consistently, so every reader accepts both forms.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde_json::{Map, Value};

use crate::error::{IpamError, Result};

pub type Record = Map<String, Value>;

/// Written timestamps use the form the service stores in its database.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Unwrap a JSON object. Anything else is not a record.
pub(crate) fn into_record(value: Value, kind: &str) -> Result<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(IpamError::InvalidRecord(format!(
            "expected a {} object, got {}",
            kind, other
        ))),
    }
}

pub(crate) fn int_of(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub(crate) fn text_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a service timestamp. Values without an offset are local time.
/// Empty and all-zero dates mean "never".
pub(crate) fn parse_timestamp(text: &str) -> Option<DateTime<Local>> {
    let text = text.trim();
    if text.is_empty() || text.starts_with("0000-00-00") {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Local));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        });

    match naive {
        Some(naive) => Local.from_local_datetime(&naive).earliest(),
        None => {
            tracing::warn!("Ignoring malformed timestamp '{}'", text);
            None
        }
    }
}

pub(crate) fn timestamp_field(record: &Record, field: &str) -> Option<DateTime<Local>> {
    record
        .get(field)
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
}

pub(crate) fn now_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}
