//! Per-field conversion between native, primitive and database forms.

use std::collections::BTreeMap;

use bson::{Bson, Document};
use chrono::SubsecRound;
use serde_json::{Map, Value as JsonValue};

use super::record::{self as record_transform, PrimitiveOptions};
use crate::catalog::{ClassTarget, FieldKind, ObjectIdType, RecordClass};
use crate::engine::Engine;
use crate::error::{ConversionError, Error, Result};
use crate::value::{Reference, Value};

/// Class-key tag carried by dynamic embedded records and generic references.
pub const CLASS_TAG: &str = "_cls";

pub(crate) const NOT_SAVED: &str = "Model is not saved yet. Save it first";
pub(crate) const NO_CLASS: &str = "Class of model can't be determined";

fn resolve_target(engine: &Engine, target: &ClassTarget) -> Result<std::sync::Arc<RecordClass>> {
    match target.key() {
        Some(key) => engine.class(key),
        None => Err(Error::NotRegistered("self".into())),
    }
}

fn conversion(message: impl Into<String>) -> Error {
    Error::Conversion(ConversionError::new(message))
}

/// Convert a database or primitive value to native form.
pub fn to_native(engine: &Engine, kind: &FieldKind, raw: &Bson) -> Result<Value> {
    if matches!(raw, Bson::Null | Bson::Undefined) {
        return Ok(Value::Null);
    }
    match kind {
        FieldKind::Scalar(scalar) => Ok(scalar.to_native(raw)?),
        FieldKind::Embedded(target) => {
            let doc = raw
                .as_document()
                .ok_or_else(|| conversion("expected an embedded document"))?;
            let class = resolve_target(engine, target)?;
            let record = record_transform::to_native(engine, &class, doc, None)?;
            Ok(Value::Record(Box::new(record)))
        }
        FieldKind::Reference(target) => reference_to_native(engine, target, raw),
        FieldKind::GenericReference => generic_to_native(engine, raw),
        FieldKind::List(inner) => {
            let items = raw
                .as_array()
                .ok_or_else(|| conversion("Could not interpret the value as a list"))?;
            let mut values = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                values.push(to_native(engine, inner, item).map_err(|e| e.within(&index.to_string()))?);
            }
            Ok(Value::List(values))
        }
        FieldKind::Dict(inner) => {
            let doc = raw
                .as_document()
                .ok_or_else(|| conversion("Only dictionaries may be used in a DictType"))?;
            let mut values = BTreeMap::new();
            for (key, item) in doc {
                values.insert(key.clone(), to_native(engine, inner, item).map_err(|e| e.within(key))?);
            }
            Ok(Value::Map(values))
        }
        FieldKind::Dynamic => dynamic_to_native(engine, raw),
    }
}

fn reference_to_native(engine: &Engine, target: &ClassTarget, raw: &Bson) -> Result<Value> {
    match raw {
        Bson::Document(doc) if is_reference_pair(doc) => {
            let id = ObjectIdType::coerce(pair_id(doc).unwrap_or(&Bson::Null))?;
            Ok(Value::Reference(Reference::Key(id)))
        }
        Bson::Document(doc) => {
            // an expanded primitive reference
            let class = resolve_target(engine, target)?;
            let record = record_transform::to_native(engine, &class, doc, None)?;
            Ok(Value::Reference(Reference::Live(Box::new(record))))
        }
        other => Ok(Value::Reference(Reference::Key(ObjectIdType::coerce(other)?))),
    }
}

fn generic_to_native(engine: &Engine, raw: &Bson) -> Result<Value> {
    let doc = raw.as_document().ok_or_else(|| {
        conversion("Value of GenericReference must be a document with `_id` and `_cls`")
    })?;
    let class_key = doc
        .get_str(CLASS_TAG)
        .map_err(|_| conversion(NO_CLASS))?
        .to_string();
    let class = engine.class(&class_key)?;
    if is_reference_pair(doc) {
        let id = ObjectIdType::coerce(pair_id(doc).unwrap_or(&Bson::Null))?;
        return Ok(Value::Reference(Reference::Generic { id, class_key }));
    }
    let record = record_transform::to_native(engine, &class, doc, None)?;
    Ok(Value::Reference(Reference::Live(Box::new(record))))
}

/// `{_id, _cls}` or `{id, _cls}`, nothing else.
fn is_reference_pair(doc: &Document) -> bool {
    doc.len() == 2 && doc.contains_key(CLASS_TAG) && pair_id(doc).is_some()
}

fn pair_id(doc: &Document) -> Option<&Bson> {
    doc.get("_id").or_else(|| doc.get("id"))
}

fn dynamic_to_native(engine: &Engine, raw: &Bson) -> Result<Value> {
    Ok(match raw {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::Int(i64::from(*i)),
        Bson::Int64(i) => Value::Int(*i),
        Bson::Double(f) => Value::Float(*f),
        Bson::String(s) => Value::String(s.clone()),
        Bson::ObjectId(id) => Value::ObjectId(*id),
        Bson::DateTime(dt) => Value::DateTime(dt.to_chrono()),
        Bson::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                values.push(dynamic_to_native(engine, item).map_err(|e| e.within(&index.to_string()))?);
            }
            Value::List(values)
        }
        Bson::Document(doc) => match doc.get_str(CLASS_TAG) {
            Ok(class_key) => {
                let class = engine.class(class_key)?;
                Value::Record(Box::new(record_transform::to_native(engine, &class, doc, None)?))
            }
            Err(_) => {
                let mut values = BTreeMap::new();
                for (key, item) in doc {
                    values.insert(key.clone(), dynamic_to_native(engine, item).map_err(|e| e.within(key))?);
                }
                Value::Map(values)
            }
        },
        other => {
            return Err(conversion(format!(
                "unsupported value of type {:?} in a dynamic field",
                other.element_type()
            )))
        }
    })
}

/// Convert a native value to database form.
pub fn to_database(kind: &FieldKind, value: &Value) -> Result<Bson> {
    if value.is_null() {
        return Ok(Bson::Null);
    }
    match kind {
        FieldKind::Scalar(scalar) => Ok(scalar.to_database(value)?),
        FieldKind::Embedded(_) => match value {
            Value::Record(record) => Ok(Bson::Document(record_transform::to_database(record)?)),
            other => Err(conversion(format!(
                "expected an embedded record, got {}",
                other.type_name()
            ))),
        },
        FieldKind::Reference(_) => match value {
            Value::Reference(reference) => reference
                .id()
                .map(Bson::ObjectId)
                .ok_or_else(|| conversion(NOT_SAVED)),
            Value::ObjectId(id) => Ok(Bson::ObjectId(*id)),
            other => Err(conversion(format!(
                "expected a reference, got {}",
                other.type_name()
            ))),
        },
        FieldKind::GenericReference => match value {
            Value::Reference(reference) => generic_pair(reference).map(Bson::Document),
            Value::ObjectId(_) => Err(conversion(NO_CLASS)),
            other => Err(conversion(format!(
                "expected a reference, got {}",
                other.type_name()
            ))),
        },
        FieldKind::List(inner) => match value {
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    out.push(to_database(inner, item).map_err(|e| e.within(&index.to_string()))?);
                }
                Ok(Bson::Array(out))
            }
            other => Err(conversion(format!("expected a list, got {}", other.type_name()))),
        },
        FieldKind::Dict(inner) => match value {
            Value::Map(map) => {
                let mut doc = Document::new();
                for (key, item) in map {
                    doc.insert(key.clone(), to_database(inner, item).map_err(|e| e.within(key))?);
                }
                Ok(Bson::Document(doc))
            }
            other => Err(conversion(format!("expected a map, got {}", other.type_name()))),
        },
        FieldKind::Dynamic => dynamic_to_database(value),
    }
}

fn generic_pair(reference: &Reference) -> Result<Document> {
    let id = reference.id().ok_or_else(|| conversion(NOT_SAVED))?;
    let class_key = reference.class_key().ok_or_else(|| conversion(NO_CLASS))?;
    let mut doc = Document::new();
    doc.insert("_id", id);
    doc.insert(CLASS_TAG, class_key);
    Ok(doc)
}

fn dynamic_to_database(value: &Value) -> Result<Bson> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int(i) => Bson::Int64(*i),
        Value::Float(f) => Bson::Double(*f),
        Value::String(s) => Bson::String(s.clone()),
        Value::DateTime(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
        Value::ObjectId(id) => Bson::ObjectId(*id),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                out.push(dynamic_to_database(item).map_err(|e| e.within(&index.to_string()))?);
            }
            Bson::Array(out)
        }
        Value::Map(map) => {
            let mut doc = Document::new();
            for (key, item) in map {
                doc.insert(key.clone(), dynamic_to_database(item).map_err(|e| e.within(key))?);
            }
            Bson::Document(doc)
        }
        Value::Record(record) => {
            let mut doc = record_transform::to_database(record)?;
            doc.insert(CLASS_TAG, record.class().key());
            Bson::Document(doc)
        }
        Value::Reference(reference) => Bson::Document(generic_pair(reference)?),
    })
}

/// Convert a native value to a JSON-safe primitive.
pub fn to_primitive(kind: &FieldKind, value: &Value, options: &PrimitiveOptions) -> JsonValue {
    if value.is_null() {
        return JsonValue::Null;
    }
    match kind {
        FieldKind::Scalar(scalar) => scalar.to_primitive(value),
        FieldKind::Embedded(_) => match value {
            Value::Record(record) => record_transform::to_primitive(record, &options.nested()),
            _ => JsonValue::Null,
        },
        FieldKind::Reference(_) => match value {
            Value::Reference(Reference::Live(record)) if options.expand => {
                record_transform::to_primitive(record, &options.nested())
            }
            Value::Reference(reference) => reference
                .id()
                .map(|id| JsonValue::String(id.to_hex()))
                .unwrap_or(JsonValue::Null),
            Value::ObjectId(id) => JsonValue::String(id.to_hex()),
            _ => JsonValue::Null,
        },
        FieldKind::GenericReference => match value {
            Value::Reference(reference) => generic_primitive(reference, options),
            _ => JsonValue::Null,
        },
        FieldKind::List(inner) => match value {
            Value::List(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|item| to_primitive(inner, item, options))
                    .collect(),
            ),
            _ => JsonValue::Null,
        },
        FieldKind::Dict(inner) => match value {
            Value::Map(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), to_primitive(inner, v, options)))
                    .collect(),
            ),
            _ => JsonValue::Null,
        },
        FieldKind::Dynamic => dynamic_to_primitive(value, options),
    }
}

fn generic_primitive(reference: &Reference, options: &PrimitiveOptions) -> JsonValue {
    let class_key = reference.class_key().map(str::to_string);
    let mut out = match reference {
        Reference::Live(record) if options.expand => {
            match record_transform::to_primitive(record, &options.nested()) {
                JsonValue::Object(map) => map,
                _ => Map::new(),
            }
        }
        _ => {
            let mut map = Map::new();
            map.insert(
                "_id".into(),
                reference
                    .id()
                    .map(|id| JsonValue::String(id.to_hex()))
                    .unwrap_or(JsonValue::Null),
            );
            map
        }
    };
    if let Some(class_key) = class_key {
        out.insert(CLASS_TAG.into(), JsonValue::String(class_key));
    }
    JsonValue::Object(out)
}

fn dynamic_to_primitive(value: &Value, options: &PrimitiveOptions) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::from(*i),
        Value::Float(f) => JsonValue::from(*f),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::DateTime(dt) => {
            JsonValue::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        }
        Value::ObjectId(id) => JsonValue::String(id.to_hex()),
        Value::List(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| dynamic_to_primitive(item, options))
                .collect(),
        ),
        Value::Map(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), dynamic_to_primitive(v, options)))
                .collect(),
        ),
        Value::Record(record) => {
            let mut out = match record_transform::to_primitive(record, &options.nested()) {
                JsonValue::Object(map) => map,
                _ => Map::new(),
            };
            out.insert(CLASS_TAG.into(), JsonValue::String(record.class().key().to_string()));
            JsonValue::Object(out)
        }
        Value::Reference(reference) => generic_primitive(reference, options),
    }
}

/// Check a native value against a field kind.
pub(crate) fn validate(kind: &FieldKind, value: &Value) -> Result<(), crate::error::ValidationError> {
    use crate::error::ValidationError;

    if value.is_null() {
        return Ok(());
    }
    match (kind, value) {
        (FieldKind::Scalar(scalar), value) => scalar.validate(value),
        (FieldKind::Embedded(target), Value::Record(record)) => {
            if Some(record.class().key()) != target.key() {
                return Err(ValidationError::new(
                    "",
                    format!("expected a record of class {}", target.key().unwrap_or("self")),
                ));
            }
            record.validate()
        }
        (FieldKind::Reference(target), Value::Reference(reference)) => {
            if let Reference::Live(record) = reference {
                if Some(record.class().key()) != target.key() {
                    return Err(ValidationError::new(
                        "",
                        format!("expected a reference to {}", target.key().unwrap_or("self")),
                    ));
                }
            }
            if reference.id().is_none() {
                return Err(ValidationError::new("", NOT_SAVED));
            }
            Ok(())
        }
        (FieldKind::GenericReference, Value::Reference(reference)) => {
            if reference.id().is_none() {
                return Err(ValidationError::new("", NOT_SAVED));
            }
            if reference.class_key().is_none() {
                return Err(ValidationError::new("", NO_CLASS));
            }
            Ok(())
        }
        (FieldKind::List(inner), Value::List(items)) => {
            for (index, item) in items.iter().enumerate() {
                validate(inner, item).map_err(|e| e.within(&index.to_string()))?;
            }
            Ok(())
        }
        (FieldKind::Dict(inner), Value::Map(map)) => {
            for (key, item) in map {
                validate(inner, item).map_err(|e| e.within(key))?;
            }
            Ok(())
        }
        (FieldKind::Dynamic, Value::Record(record)) => record.validate(),
        (FieldKind::Dynamic, _) => Ok(()),
        (kind, value) => Err(ValidationError::new(
            "",
            format!("{} is not a valid {}", value.type_name(), kind_name(kind)),
        )),
    }
}

fn kind_name(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::Scalar(_) => "scalar",
        FieldKind::Embedded(_) => "embedded record",
        FieldKind::Reference(_) => "reference",
        FieldKind::GenericReference => "generic reference",
        FieldKind::List(_) => "list",
        FieldKind::Dict(_) => "map",
        FieldKind::Dynamic => "dynamic value",
    }
}

/// Normalize a value assigned to a field: records and keys assigned to
/// reference fields become references.
pub(crate) fn coerce(kind: &FieldKind, value: Value) -> Result<Value, crate::error::ValidationError> {
    use crate::error::ValidationError;

    Ok(match (kind, value) {
        (FieldKind::Reference(_), Value::Record(record)) => {
            Value::Reference(Reference::Live(record))
        }
        (FieldKind::Reference(_), Value::ObjectId(id)) => Value::Reference(Reference::Key(id)),
        (FieldKind::Reference(_), Value::String(hex)) => {
            let id = ObjectIdType::coerce(&Bson::String(hex))
                .map_err(|e| ValidationError::new("", e.message))?;
            Value::Reference(Reference::Key(id))
        }
        (FieldKind::GenericReference, Value::Record(record)) => {
            Value::Reference(Reference::Live(record))
        }
        (FieldKind::GenericReference, Value::ObjectId(_)) => {
            return Err(ValidationError::new("", NO_CLASS))
        }
        (FieldKind::List(inner), Value::List(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                out.push(coerce(inner, item).map_err(|e| e.within(&index.to_string()))?);
            }
            Value::List(out)
        }
        (FieldKind::Dict(inner), Value::Map(map)) => {
            let mut out = BTreeMap::new();
            for (key, item) in map {
                let item = coerce(inner, item).map_err(|e| e.within(&key))?;
                out.insert(key, item);
            }
            Value::Map(out)
        }
        (_, value) => storage_precision(value),
    })
}

/// Round datetimes down to the millisecond precision the database keeps.
pub(crate) fn storage_precision(value: Value) -> Value {
    match value {
        Value::DateTime(dt) => Value::DateTime(dt.trunc_subsecs(3)),
        Value::List(items) => Value::List(items.into_iter().map(storage_precision).collect()),
        Value::Map(map) => Value::Map(
            map.into_iter()
                .map(|(key, item)| (key, storage_precision(item)))
                .collect(),
        ),
        other => other,
    }
}

/// Reference targets held by a field value, for prefetch and cascade.
pub(crate) fn referenced(value: &Value) -> Vec<&Reference> {
    match value {
        Value::Reference(reference) => vec![reference],
        Value::List(items) => items.iter().filter_map(Value::as_reference).collect(),
        _ => Vec::new(),
    }
}
