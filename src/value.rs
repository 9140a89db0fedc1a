//! Lazily-decoded view over a JSON document.
//!
//! Objects and arrays are decoded into maps and sequences so the decomposer
//! can walk them, but string and number leaves keep the raw source text.
//! Equality is therefore byte equality on the origin's representation: the
//! numbers `1` and `1.0` are *different* values, and a string keeps whatever
//! escape sequences the origin used. This is what makes model diffing cheap
//! and lets leaves be re-emitted to the bus without a decode/encode round
//! trip.

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use serde_json::value::RawValue;
use std::collections::HashMap;

/// A typed node of a JSON document.
#[derive(Debug, Clone)]
pub enum Value {
    Object(HashMap<String, Value>),
    Array(Vec<Value>),
    /// A JSON string, raw source text including the surrounding quotes.
    String(Box<RawValue>),
    /// A JSON number, raw source text.
    Number(Box<RawValue>),
    Bool(bool),
    Null,
}

impl Value {
    /// True for string, number, bool and null nodes.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Value::Object(_) | Value::Array(_))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Box<RawValue> = Box::<RawValue>::deserialize(deserializer)?;
        classify(raw).map_err(serde::de::Error::custom)
    }
}

/// Classify a raw JSON value by its first byte, recursing into composites.
fn classify(raw: Box<RawValue>) -> serde_json::Result<Value> {
    match raw.get().as_bytes().first() {
        Some(b'{') => Ok(Value::Object(serde_json::from_str(raw.get())?)),
        Some(b'[') => Ok(Value::Array(serde_json::from_str(raw.get())?)),
        Some(b't') => Ok(Value::Bool(true)),
        Some(b'f') => Ok(Value::Bool(false)),
        Some(b'n') => Ok(Value::Null),
        Some(b'"') => Ok(Value::String(raw)),
        _ => Ok(Value::Number(raw)),
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Object(map) => map.serialize(serializer),
            Value::Array(seq) => seq.serialize(serializer),
            Value::String(raw) | Value::Number(raw) => raw.serialize(serializer),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Null => serializer.serialize_unit(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::String(a), Value::String(b)) | (Value::Number(a), Value::Number(b)) => {
                a.get() == b.get()
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}
