//! Header and field normalization shared by every reader.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Prefix Street Manager puts on the payload fields of an event.
const OBJECT_DATA_PREFIX: &str = "object_data.";

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

/// Normalizes a column name: strips the event payload prefix, lowercases,
/// and joins words with underscores.
///
/// `"Permit Reference Number"` and `"object_data.permit_reference_number"`
/// both become `"permit_reference_number"`.
#[must_use]
pub fn clean_header(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('\u{feff}');
    let unprefixed = trimmed.strip_prefix(OBJECT_DATA_PREFIX).unwrap_or(trimmed);

    unprefixed
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Flattens nested JSON objects into dotted keys with cleaned names.
///
/// Scalars become their text form, arrays are kept as JSON text, and nulls
/// are dropped.
#[must_use]
pub fn flatten_json(value: &Value) -> BTreeMap<String, String> {
    let mut flat = BTreeMap::new();
    flatten_into(value, "", &mut flat);
    flat.into_iter()
        .map(|(key, value)| (clean_header(&key), value))
        .collect()
}

fn flatten_into(value: &Value, prefix: &str, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(child, &format!("{prefix}{key}."), out);
            }
        }
        Value::Null => {}
        leaf => {
            let key = prefix.strip_suffix('.').unwrap_or(prefix).to_string();
            let text = match leaf {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.insert(key, text);
        }
    }
}

/// `None` for missing or whitespace-only values, otherwise the trimmed text.
#[must_use]
pub fn non_blank(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parses a number, tolerating thousands separators.
#[must_use]
pub fn parse_number(raw: Option<&str>) -> Option<f64> {
    let cleaned = raw?.trim().replace(',', "");
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses a non-negative count. Fractional values are rounded.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_count(raw: Option<&str>) -> Option<u32> {
    let value = parse_number(raw)?;
    if value < 0.0 {
        return None;
    }
    Some(value.round().min(f64::from(u32::MAX)) as u32)
}

/// Parses the timestamp layouts seen in Street Manager extracts. A bare
/// date is taken as midnight. Offsets are converted to UTC.
#[must_use]
pub fn parse_timestamp(raw: Option<&str>) -> Option<NaiveDateTime> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Some(with_offset.naive_utc());
    }

    let without_zone = raw.trim_end_matches('Z');
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(without_zone, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_headers() {
        assert_eq!(clean_header("Permit Reference Number"), "permit_reference_number");
        assert_eq!(clean_header("  USRN "), "usrn");
        assert_eq!(clean_header("object_data.work_category"), "work_category");
        assert_eq!(clean_header("\u{feff}swa_code"), "swa_code");
        assert_eq!(clean_header("Link  length"), "link_length");
    }

    #[test]
    fn flattens_street_manager_events() {
        let event: Value = serde_json::json!({
            "event_reference": 42,
            "event_type": "WORK_START",
            "object_data": {
                "permit_reference_number": "TSR1591199404915-01",
                "usrn": 8_400_123,
                "is_ttro_required": true,
                "close_footway": null,
            }
        });

        let flat = flatten_json(&event);

        assert_eq!(flat["permit_reference_number"], "TSR1591199404915-01");
        assert_eq!(flat["usrn"], "8400123");
        assert_eq!(flat["is_ttro_required"], "true");
        assert_eq!(flat["event_reference"], "42");
        assert!(!flat.contains_key("close_footway"));
    }

    #[test]
    fn parses_numbers_and_counts() {
        assert_eq!(parse_number(Some("1,234.5")), Some(1234.5));
        assert_eq!(parse_number(Some("n/a")), None);
        assert_eq!(parse_number(None), None);
        assert_eq!(parse_count(Some("12")), Some(12));
        assert_eq!(parse_count(Some("12.6")), Some(13));
        assert_eq!(parse_count(Some("-1")), None);
    }

    #[test]
    fn parses_timestamp_layouts() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 3)
            .and_then(|d| d.and_hms_opt(8, 15, 0))
            .unwrap();

        assert_eq!(parse_timestamp(Some("2025-03-03T08:15:00.000Z")), Some(expected));
        assert_eq!(parse_timestamp(Some("2025-03-03T08:15:00")), Some(expected));
        assert_eq!(parse_timestamp(Some("2025-03-03 08:15:00")), Some(expected));
        assert_eq!(parse_timestamp(Some("03/03/2025 08:15")), Some(expected));
        assert_eq!(parse_timestamp(Some("2025-03-03T09:15:00+01:00")), Some(expected));
        assert_eq!(
            parse_timestamp(Some("2025-03-03")),
            NaiveDate::from_ymd_opt(2025, 3, 3).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
        assert_eq!(parse_timestamp(Some("soon")), None);
        assert_eq!(parse_timestamp(Some("  ")), None);
    }
}
