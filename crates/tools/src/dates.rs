//! Strict calendar-date argument parsing.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::Envelope;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse an optional date argument. Absent (or null) is fine; anything
/// present must match `YYYY-MM-DD` exactly or the caller gets a failure
/// envelope naming the field.
pub(crate) fn parse_date_arg(
    args: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<NaiveDate>, Envelope> {
    let Some(raw) = args.get(field).and_then(Value::as_str) else {
        return Ok(None);
    };
    parse_date(field, raw).map(Some)
}

pub(crate) fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, Envelope> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| {
        Envelope::fail(format!(
            "invalid {field}: expected YYYY-MM-DD, got '{raw}'"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn absent_and_null_are_none() {
        assert_eq!(parse_date_arg(&args(json!({})), "start_date").unwrap(), None);
        assert_eq!(
            parse_date_arg(&args(json!({"start_date": null})), "start_date").unwrap(),
            None
        );
    }

    #[test]
    fn valid_date_parses() {
        let date = parse_date_arg(&args(json!({"end_date": "2025-03-14"})), "end_date")
            .unwrap()
            .unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
    }

    #[test]
    fn malformed_dates_name_the_field() {
        for bad in ["yesterday", "2024-13-40", "03/14/2025", "2025-3-1x"] {
            let err = parse_date_arg(&args(json!({"start_date": bad})), "start_date")
                .unwrap_err();
            let message = err.error().unwrap().to_string();
            assert!(message.contains("start_date"), "{message}");
            assert!(message.contains(bad), "{message}");
        }
    }
}
