//! Column-type-aware decoding of Snowflake REST SQL API cell values.
//!
//! The Snowflake SQL API returns every cell as a string alongside a column
//! type name; grounded on the donor-adjacent `parser.rs` value coercion
//! (`examples/weilliptic-public-wadk/mcps/rust/snowflake/src/parser.rs`),
//! trimmed to the scalar types `preview_table`/`execute_query` need to
//! round-trip through JSON.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

/// A single decoded cell. Kept distinct from `serde_json::Value` so
/// `Rows` can defer JSON rendering until the wire boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl RowValue {
    pub fn to_json(&self) -> Value {
        match self {
            RowValue::Null => Value::Null,
            RowValue::Integer(i) => Value::from(*i),
            RowValue::Float(f) => Value::from(*f),
            RowValue::Text(s) => Value::String(s.clone()),
            RowValue::Boolean(b) => Value::Bool(*b),
        }
    }

    /// Decode a raw cell string using its Snowflake column type name.
    pub fn decode(raw: Option<&str>, column_type: &str) -> Self {
        let Some(raw) = raw else { return RowValue::Null };
        match column_type.to_ascii_lowercase().as_str() {
            "fixed" | "number" | "decimal" | "numeric" | "int" | "integer" | "bigint" | "smallint"
            | "tinyint" | "byteint" => {
                if let Ok(i) = raw.parse::<i64>() {
                    RowValue::Integer(i)
                } else if let Ok(f) = raw.parse::<f64>() {
                    RowValue::Float(f)
                } else {
                    RowValue::Text(raw.to_string())
                }
            }
            "real" | "float" | "float4" | "float8" | "double" | "double precision" => {
                raw.parse::<f64>().map(RowValue::Float).unwrap_or_else(|_| RowValue::Text(raw.to_string()))
            }
            "boolean" => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => RowValue::Boolean(true),
                "false" | "0" => RowValue::Boolean(false),
                _ => RowValue::Text(raw.to_string()),
            },
            "date" => decode_date(raw).map(RowValue::Text).unwrap_or_else(|| RowValue::Text(raw.to_string())),
            "timestamp_ntz" | "timestamp_ltz" | "timestamp_tz" => {
                decode_timestamp(raw).map(RowValue::Text).unwrap_or_else(|| RowValue::Text(raw.to_string()))
            }
            _ => RowValue::Text(raw.to_string()),
        }
    }
}

fn decode_date(raw: &str) -> Option<String> {
    let days = raw.parse::<i64>().ok()?;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    let date = epoch.checked_add_signed(chrono::Duration::days(days))?;
    Some(date.format("%Y-%m-%d").to_string())
}

fn decode_timestamp(raw: &str) -> Option<String> {
    let secs = raw.parse::<f64>().ok()?;
    let dt: DateTime<Utc> = DateTime::from_timestamp(secs.trunc() as i64, ((secs.fract()) * 1e9) as u32)?;
    Some(dt.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_integer() {
        assert_eq!(RowValue::decode(Some("42"), "FIXED"), RowValue::Integer(42));
    }

    #[test]
    fn decodes_null() {
        assert_eq!(RowValue::decode(None, "VARCHAR"), RowValue::Null);
    }

    #[test]
    fn decodes_boolean() {
        assert_eq!(RowValue::decode(Some("true"), "BOOLEAN"), RowValue::Boolean(true));
    }

    #[test]
    fn decodes_date_from_epoch_days() {
        assert_eq!(RowValue::decode(Some("0"), "DATE"), RowValue::Text("1970-01-01".to_string()));
    }

    #[test]
    fn falls_back_to_text_for_unparseable_number() {
        assert_eq!(RowValue::decode(Some("abc"), "FIXED"), RowValue::Text("abc".to_string()));
    }
}
