//! Lenient deserializers for provider fields that arrive as either
//! strings or numbers depending on the endpoint.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn coerce(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(coerce(Value::deserialize(deserializer)?).unwrap_or_default())
}

pub fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(coerce(Value::deserialize(deserializer)?))
}

/// Calendar day in either `YYYY-MM-DD` or the provider's compact `YYYYMMDD`
pub fn provider_day<'de, D>(deserializer: D) -> Result<chrono::NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = coerce(Value::deserialize(deserializer)?).unwrap_or_default();
    crate::models::meter::parse_provider_day(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid day: {}", raw)))
}
