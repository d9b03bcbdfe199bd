//! Whole-record conversion.

use std::sync::Arc;

use bson::{Bson, Document};
use serde_json::{Map, Value as JsonValue};

use super::field::{self as field_transform, CLASS_TAG};
use super::json::json_to_bson;
use crate::catalog::{ObjectIdType, RecordClass};
use crate::engine::Engine;
use crate::error::{ConversionError, Error, Result};
use crate::record::{Projection, Record};

/// Options for primitive output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimitiveOptions {
    /// Expand loaded references into full primitive records instead of ids.
    pub expand: bool,
    /// Restrict the top-level fields emitted.
    pub projection: Option<Projection>,
}

impl PrimitiveOptions {
    /// Default options: references as ids, every field.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand loaded references.
    pub fn expanded() -> Self {
        Self {
            expand: true,
            projection: None,
        }
    }

    /// Restrict the emitted fields.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Options for nested records: the projection only applies at the top.
    pub(crate) fn nested(&self) -> Self {
        Self {
            expand: self.expand,
            projection: None,
        }
    }
}

/// Database form of a record: `_id` first, then declared fields in order.
///
/// Computed fields are never written.
pub fn to_database(record: &Record) -> Result<Document> {
    let mut doc = Document::new();
    if let Some(id) = record.id() {
        doc.insert("_id", id);
    }
    for (name, field) in record.class().fields() {
        if let Some(value) = record.get(name) {
            let raw = field_transform::to_database(&field.kind, value).map_err(|e| e.within(name))?;
            doc.insert(name, raw);
        }
    }
    Ok(doc)
}

/// Build a record from its database form, or from primitive input lifted to BSON.
///
/// `loaded` marks the fields that were requested when a projection was used;
/// defaults of the other fields are not applied.
pub fn to_native(
    engine: &Engine,
    class: &Arc<RecordClass>,
    doc: &Document,
    loaded: Option<Projection>,
) -> Result<Record> {
    let mut record = Record::new(engine.clone(), class.clone());
    if let Some(projection) = &loaded {
        let unloaded: Vec<String> = class
            .fields()
            .map(|(name, _)| name)
            .filter(|name| !projection.includes(name))
            .map(str::to_string)
            .collect();
        for name in unloaded {
            record.unset(&name);
        }
    }

    for (key, raw) in doc {
        match key.as_str() {
            "_id" | "id" => {
                if matches!(raw, Bson::Null) || class.is_embedded() {
                    continue;
                }
                let id = ObjectIdType::coerce(raw).map_err(|e| Error::from(e.within(key)))?;
                record.assign_id(id);
            }
            CLASS_TAG => {}
            name => match class.field(name) {
                Some(field) => {
                    let value = field_transform::to_native(engine, &field.kind, raw)
                        .map_err(|e| e.within(name))?;
                    record.put(name, value);
                }
                None if class.computed_field(name).is_some() => {}
                None => {
                    tracing::warn!(
                        class = %class.key(),
                        field = %name,
                        "dropping unknown field"
                    );
                }
            },
        }
    }
    record.set_loaded(loaded);
    Ok(record)
}

/// Primitive form of a record.
///
/// The key is emitted first as `id`; stored fields follow in declaration
/// order, then computed fields.
pub fn to_primitive(record: &Record, options: &PrimitiveOptions) -> JsonValue {
    let class = record.class();
    let visible = |name: &str| {
        record.loaded().map_or(true, |p| p.includes(name))
            && options.projection.as_ref().map_or(true, |p| p.includes(name))
    };

    let mut out = Map::new();
    if let Some(id) = record.id() {
        out.insert("id".into(), JsonValue::String(id.to_hex()));
    }
    for (name, field) in class.fields() {
        if !visible(name) {
            continue;
        }
        if let Some(value) = record.get(name) {
            out.insert(name.to_string(), field_transform::to_primitive(&field.kind, value, options));
        }
    }
    for computed in class.computed() {
        if options
            .projection
            .as_ref()
            .map_or(true, |p| p.includes(&computed.name))
        {
            let value = computed.compute(record);
            out.insert(computed.name.clone(), value_to_primitive(&value, options));
        }
    }
    JsonValue::Object(out)
}

fn value_to_primitive(value: &crate::value::Value, options: &PrimitiveOptions) -> JsonValue {
    field_transform::to_primitive(&crate::catalog::FieldKind::Dynamic, value, options)
}

/// Build a record from primitive input.
pub fn from_primitive(engine: &Engine, class: &Arc<RecordClass>, input: &JsonValue) -> Result<Record> {
    match json_to_bson(input) {
        Bson::Document(doc) => to_native(engine, class, &doc, None),
        _ => Err(Error::Conversion(ConversionError::new(format!(
            "primitive form of {} must be an object",
            class.key()
        )))),
    }
}
