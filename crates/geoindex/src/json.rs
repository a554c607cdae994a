//! Opaque JSON payloads.
//!
//! Metadata values, entry properties and index attributes are caller-defined
//! JSON. They are kept as validated JSON text and parsed on demand, so the
//! binary index format never has to describe arbitrary JSON structure.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{IndexError, Result};

/// Validated JSON text.
///
/// Serializes as structured JSON to human-readable formats (the JSON
/// exchange surface) and as a plain string to binary formats (the
/// persisted index state).
#[derive(Clone, PartialEq, Eq)]
pub struct JsonBlob(Box<str>);

impl JsonBlob {
    pub fn from_value(value: &Value) -> Self {
        Self(value.to_string().into_boxed_str())
    }

    /// Parses and validates JSON text.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|error| IndexError::Validation(format!("invalid JSON payload: {error}")))?;
        Ok(Self::from_value(&value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the payload. Blobs are only ever built from valid JSON, so a
    /// parse failure means the persisted text was damaged; it reads as null.
    pub fn to_value(&self) -> Value {
        match serde_json::from_str(&self.0) {
            Ok(value) => value,
            Err(error) => {
                log::warn!("unreadable JSON payload: {error}");
                Value::Null
            }
        }
    }
}

impl From<Value> for JsonBlob {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

impl fmt::Debug for JsonBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonBlob({})", self.0)
    }
}

impl fmt::Display for JsonBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for JsonBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            self.to_value().serialize(serializer)
        } else {
            serializer.serialize_str(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for JsonBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let value = Value::deserialize(deserializer)?;
            Ok(Self::from_value(&value))
        } else {
            let text = String::deserialize(deserializer)?;
            serde_json::from_str::<serde::de::IgnoredAny>(&text)
                .map_err(|error| D::Error::custom(format!("invalid JSON payload: {error}")))?;
            Ok(Self(text.into_boxed_str()))
        }
    }
}
