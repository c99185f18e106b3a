//! Backend Record Helpers
//!
//! Rows arrive from the backend as loosely typed JSON objects. These helpers
//! normalize the fields whose encoding varies between tables (ids may be
//! UUID strings or integer keys).

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// A raw backend row as delivered by a snapshot query or a subscription.
pub type Record = Value;

/// Render an id-like JSON value as a string.
///
/// Accepts non-empty strings and integers; everything else is rejected.
#[must_use]
pub fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_id(&value).ok_or_else(|| serde::de::Error::custom("expected a string or integer id"))
}

pub(crate) fn optional_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_id))
}
