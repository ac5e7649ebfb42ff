//! The uniform result wrapper every operation returns.
//!
//! The wire shape is the one contract agents depend on and must stay
//! bit-stable: `{"success": true, ...fields}` or
//! `{"success": false, "error": "..."}`. A success never carries an `error`
//! field and a failure never carries data fields.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// Discriminated success/failure result of a tool operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Success { data: Map<String, Value> },
    Failure { error: String },
}

impl Envelope {
    /// Success envelope from a JSON object. A non-object value is tucked
    /// under a `result` field so the wire shape stays flat.
    pub fn ok(data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        Self::Success { data }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Success { data } => Some(data),
            Self::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }

    /// The serialized wire form.
    pub fn to_value(&self) -> Value {
        // Serialization of this type is infallible: it only ever emits a map.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success { data } => {
                let mut map = serializer.serialize_map(Some(data.len() + 1))?;
                map.serialize_entry("success", &true)?;
                for (key, value) in data {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Self::Failure { error } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", error)?;
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_wire_shape() {
        let envelope = Envelope::ok(json!({"latitude": 33.9, "longitude": 35.5}));
        let value = envelope.to_value();
        assert_eq!(value["success"], true);
        assert_eq!(value["latitude"], 33.9);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn failure_wire_shape() {
        let envelope = Envelope::fail("no results found");
        let value = envelope.to_value();
        assert_eq!(
            value,
            json!({"success": false, "error": "no results found"})
        );
        assert!(envelope.data().is_none());
    }

    #[test]
    fn success_never_exposes_error() {
        let envelope = Envelope::ok(json!({"count": 0}));
        assert!(envelope.is_success());
        assert!(envelope.error().is_none());
    }

    #[test]
    fn non_object_data_is_wrapped() {
        let envelope = Envelope::ok(json!([1, 2, 3]));
        let value = envelope.to_value();
        assert_eq!(value["result"], json!([1, 2, 3]));
    }
}
