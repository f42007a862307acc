//! Cache Value Module
//!
//! The caller decides how a value is stored: `Raw` text goes to the backend
//! verbatim, `Json` is serialized. Reads try a JSON parse first and fall
//! back to raw text.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

// == Cache Value ==
/// A value stored in, or read from, the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheValue {
    /// Structured value, stored as JSON text
    Json(Value),
    /// Text stored as-is
    Raw(String),
}

impl CacheValue {
    /// Serializes any `Serialize` value into a `Json` value.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(CacheValue::Json(serde_json::to_value(value)?))
    }

    /// Text written to the backend.
    pub fn encode(&self) -> Result<String> {
        match self {
            CacheValue::Raw(text) => Ok(text.clone()),
            CacheValue::Json(value) => Ok(serde_json::to_string(value)?),
        }
    }

    /// Parses stored text, falling back to `Raw` when it is not JSON.
    pub fn decode(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => CacheValue::Json(value),
            Err(_) => CacheValue::Raw(text),
        }
    }

    /// Values `wrap` treats as a miss: empty text, `null`, `false`, zero and
    /// the empty string.
    pub fn is_blank(&self) -> bool {
        match self {
            CacheValue::Raw(text) => text.is_empty(),
            CacheValue::Json(Value::Null) | CacheValue::Json(Value::Bool(false)) => true,
            CacheValue::Json(Value::String(text)) => text.is_empty(),
            CacheValue::Json(Value::Number(n)) => n.as_f64() == Some(0.0),
            CacheValue::Json(_) => false,
        }
    }

    /// Deserializes the value into `T`. Raw text is tried as a JSON string.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T> {
        let value = match self {
            CacheValue::Json(value) => value,
            CacheValue::Raw(text) => Value::String(text),
        };
        Ok(serde_json::from_value(value)?)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            CacheValue::Json(value) => Some(value),
            CacheValue::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            CacheValue::Raw(text) => Some(text),
            CacheValue::Json(_) => None,
        }
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        CacheValue::Json(value)
    }
}

impl From<String> for CacheValue {
    fn from(text: String) -> Self {
        CacheValue::Raw(text)
    }
}

impl From<&str> for CacheValue {
    fn from(text: &str) -> Self {
        CacheValue::Raw(text.to_string())
    }
}
