//! Cell-level coercion for merged customer tables
//!
//! Producers hand us loosely typed JSON: ids may be numbers, counts may arrive
//! as floats from a left join, dates come in several layouts.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Naive layouts accepted for timestamps, tried in order after RFC 3339
const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d/%m/%Y"];

/// Errors for a single cell that cannot be coerced
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("{column}: unrecognized timestamp {value:?}")]
    InvalidTimestamp { column: String, value: String },

    #[error("{column}: expected a non-negative integer, got {value}")]
    InvalidCount { column: String, value: String },

    #[error("{column}: expected a number, got {value}")]
    InvalidNumber { column: String, value: String },

    #[error("{column}: expected a non-negative number, got {value}")]
    NegativeNumber { column: String, value: String },
}

/// Trim and lower-case a column name
pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Render an identifier cell as a string key.
///
/// Integral floats (`17850.0`) are rendered without the fraction so ids that
/// went through a numeric column still join with their string form.
pub fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 && f.abs() < 1e15 {
                        format!("{}", f as i64)
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        _ => None,
    }
}

/// Render a categorical cell as a label
pub fn label_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(_) => id_from_value(value),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Parse a timestamp string; returns `None` when no layout matches
pub fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }

    None
}

/// Coerce a timestamp cell. Integers are read as epoch milliseconds.
pub fn timestamp_from_value(
    column: &str,
    value: &Value,
) -> Result<Option<DateTime<Utc>>, ValueError> {
    let invalid = || ValueError::InvalidTimestamp {
        column: column.to_string(),
        value: value.to_string(),
    };

    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_timestamp_str(s).map(Some).ok_or_else(invalid),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .map(Some)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Coerce a number cell, accepting numeric strings with `.` or `,` decimals
pub fn number_from_value(column: &str, value: &Value) -> Result<Option<f64>, ValueError> {
    let invalid = || ValueError::InvalidNumber {
        column: column.to_string(),
        value: value.to_string(),
    };

    let number = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64().ok_or_else(invalid)?,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .replace(',', ".")
                .parse::<f64>()
                .map_err(|_| invalid())?
        }
        _ => return Err(invalid()),
    };

    if number.is_finite() {
        Ok(Some(number))
    } else {
        Err(invalid())
    }
}

/// Coerce a non-negative number cell
pub fn amount_from_value(column: &str, value: &Value) -> Result<Option<f64>, ValueError> {
    match number_from_value(column, value)? {
        Some(n) if n < 0.0 => Err(ValueError::NegativeNumber {
            column: column.to_string(),
            value: value.to_string(),
        }),
        other => Ok(other),
    }
}

/// Coerce a count cell. Integral floats are accepted, fractions are not.
pub fn count_from_value(column: &str, value: &Value) -> Result<Option<u64>, ValueError> {
    let invalid = || ValueError::InvalidCount {
        column: column.to_string(),
        value: value.to_string(),
    };

    if let Value::Number(n) = value {
        if let Some(u) = n.as_u64() {
            return Ok(Some(u));
        }
    }

    match number_from_value(column, value).map_err(|_| invalid())? {
        None => Ok(None),
        Some(n) if n >= 0.0 && n.fract() == 0.0 && n <= u64::MAX as f64 => Ok(Some(n as u64)),
        Some(_) => Err(invalid()),
    }
}
