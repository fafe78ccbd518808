//! JSON field values and metadata maps that survive bincode

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A field value carried by a change.
///
/// bincode cannot deserialize self-describing types, so binary formats store
/// the value as its compact JSON text; human-readable formats carry it as
/// plain JSON. serde_json keeps object keys sorted, which makes the text
/// canonical and therefore safe to hash.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct FieldValue(pub serde_json::Value);

impl FieldValue {
    pub fn new(value: impl Into<serde_json::Value>) -> Self {
        FieldValue(value.into())
    }

    pub fn null() -> Self {
        FieldValue(serde_json::Value::Null)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    /// Canonical JSON text of the value
    pub fn to_canonical(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        FieldValue(value)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue(serde_json::Value::String(s.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue(serde_json::Value::String(s))
    }
}

macro_rules! impl_from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for FieldValue {
                fn from(n: $t) -> Self {
                    FieldValue(serde_json::Value::from(n))
                }
            }
        )*
    };
}

impl_from_number!(i32, i64, u32, u64, f64);

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue(serde_json::Value::Bool(b))
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            self.0.serialize(serializer)
        } else {
            serializer.serialize_str(&self.to_canonical())
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            return serde_json::Value::deserialize(deserializer).map(FieldValue);
        }
        let text = String::deserialize(deserializer)?;
        serde_json::from_str(&text)
            .map(FieldValue)
            .map_err(serde::de::Error::custom)
    }
}

/// Opaque key/value metadata attached to commits and nodes
pub type Metadata = BTreeMap<String, FieldValue>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bincode_preserves_nested_values() {
        let value = FieldValue::new(json!({"damage": "1d8", "tags": ["finesse", 2]}));
        let bytes = bincode::serialize(&value).unwrap();
        let back: FieldValue = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_json_carries_plain_values() {
        let value = FieldValue::from("1d8");
        assert_eq!(serde_json::to_string(&value).unwrap(), r#""1d8""#);
        let back: FieldValue = serde_json::from_str("12").unwrap();
        assert_eq!(back, FieldValue::from(12));
    }

    #[test]
    fn test_canonical_text_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(FieldValue(a).to_canonical(), FieldValue(b).to_canonical());
    }
}
