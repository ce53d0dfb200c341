//! Typed view of the inbound invoice request body.
//!
//! Callers post loosely-typed JSON (numbers as strings, single values where a
//! list is expected, `null` for "not given"). All of that is folded into
//! [`RequestPayload`] once, at deserialization time, so the validator only ever
//! sees plain Rust types.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Largest magnitude accepted for a single item count or item price, so that
/// `count * price` always fits in an `i64`.
pub const MAX_ITEM_VALUE: i64 = 1_000_000_000;

/// Recognized request fields. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RequestPayload {
    #[serde(deserialize_with = "lenient::text")]
    pub response_type: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub merchant_order_no: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub status: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub tax_type: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub category: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub love_code: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub carrier_type: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub carrier_num: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub buyer_name: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub buyer_email: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub buyer_ubn: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub buyer_address: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub print_flag: Option<String>,
    #[serde(deserialize_with = "lenient::whole_number")]
    pub amount: Option<i64>,
    #[serde(deserialize_with = "lenient::text_list")]
    pub item_name: Vec<String>,
    #[serde(deserialize_with = "lenient::count_list")]
    pub item_count: Vec<i64>,
    #[serde(deserialize_with = "lenient::number_list")]
    pub item_price: Vec<f64>,
    #[serde(deserialize_with = "lenient::text_list")]
    pub item_unit: Vec<String>,
}

impl RequestPayload {
    /// Decodes a JSON request body.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// Resolves a text field: absent or empty values fall back to `default`.
pub fn text_or(value: &Option<String>, default: impl FnOnce() -> String) -> String {
    match value.as_deref() {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default(),
    }
}

/// Resolves a text field that must be supplied; empty counts as missing.
pub fn required_text(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
}

mod lenient {
    use super::*;
    use serde::de::Error as _;

    fn kind(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    fn scalar_text(value: &Value) -> Result<Option<String>, String> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s.clone())),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
            other => Err(format!("expected text, found {}", kind(other))),
        }
    }

    fn scalar_number(value: &Value) -> Result<Option<f64>, String> {
        match value {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| format!("number {} is out of range", n)),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Some)
                .ok_or_else(|| format!("{:?} is not a number", s)),
            other => Err(format!("expected a number, found {}", kind(other))),
        }
    }

    fn scalar_whole(value: &Value) -> Result<Option<i64>, String> {
        if let Value::Number(n) = value {
            if let Some(i) = n.as_i64() {
                return Ok(Some(i));
            }
        }
        match scalar_number(value)? {
            Some(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => Ok(Some(n as i64)),
            Some(n) => Err(format!("{} is not a whole number", n)),
            None => Ok(None),
        }
    }

    fn list<T>(
        value: Value,
        item: impl Fn(&Value) -> Result<T, String>,
    ) -> Result<Vec<T>, String> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(values) => values.iter().map(item).collect(),
            scalar => Ok(vec![item(&scalar)?]),
        }
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        scalar_text(&Value::deserialize(d)?).map_err(D::Error::custom)
    }

    pub fn whole_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        scalar_whole(&Value::deserialize(d)?).map_err(D::Error::custom)
    }

    pub fn text_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        list(Value::deserialize(d)?, |v| {
            scalar_text(v).map(Option::unwrap_or_default)
        })
        .map_err(D::Error::custom)
    }

    fn bounded(n: f64, what: &str) -> Result<f64, String> {
        if n.abs() <= MAX_ITEM_VALUE as f64 {
            Ok(n)
        } else {
            Err(format!("{} {} is out of range", what, n))
        }
    }

    // Fractional counts are truncated toward zero.
    pub fn count_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<i64>, D::Error> {
        list(Value::deserialize(d)?, |v| {
            if let Value::Number(n) = v {
                if let Some(i) = n.as_i64() {
                    return bounded(i as f64, "item_count").map(|_| i);
                }
            }
            let n = scalar_number(v)?.unwrap_or_default();
            bounded(n, "item_count").map(|n| n.trunc() as i64)
        })
        .map_err(D::Error::custom)
    }

    pub fn number_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
        list(Value::deserialize(d)?, |v| {
            bounded(scalar_number(v)?.unwrap_or_default(), "item_price")
        })
        .map_err(D::Error::custom)
    }
}
