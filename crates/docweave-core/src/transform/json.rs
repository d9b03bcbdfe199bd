//! Lifting primitive JSON into BSON.
//!
//! Primitive input is converted to BSON before it reaches the field
//! converters, which then accept one representation for both inbound forms.
//! Integers become `Int64`, other numbers `Double`; strings are kept as
//! strings and coerced later by the field types (ids, datetimes).

use bson::{Bson, Document};
use serde_json::{Map, Value as JsonValue};

/// Convert a JSON value to BSON.
pub fn json_to_bson(value: &JsonValue) -> Bson {
    match value {
        JsonValue::Null => Bson::Null,
        JsonValue::Bool(b) => Bson::Boolean(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Bson::Int64(i),
            None => Bson::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => Bson::String(s.clone()),
        JsonValue::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        JsonValue::Object(map) => Bson::Document(object_to_document(map)),
    }
}

/// Convert a JSON object to a BSON document.
pub fn object_to_document(map: &Map<String, JsonValue>) -> Document {
    let mut doc = Document::new();
    for (key, value) in map {
        doc.insert(key.clone(), json_to_bson(value));
    }
    doc
}
