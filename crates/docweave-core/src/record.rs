//! Record instances.
//!
//! A [`Record`] is one instance of a registered class: an optional key, the
//! values of its stored fields, and the projection it was loaded with.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde_json::Value as JsonValue;

use crate::cascade::RemoveOutcome;
use crate::catalog::{FieldKind, RecordClass};
use crate::driver::{Database, UpdateOptions, UpdateResult};
use crate::engine::Engine;
use crate::error::{Error, Result, ValidationError};
use crate::query::Manager;
use crate::transform::{self, field as field_transform, PrimitiveOptions};
use crate::value::{Reference, Value};

/// Field selection applied when loading records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Load only these fields.
    Only(BTreeSet<String>),
    /// Load every field except these.
    Exclude(BTreeSet<String>),
}

impl Projection {
    /// Load only the named fields.
    pub fn only<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Only(fields.into_iter().map(Into::into).collect())
    }

    /// Load every field but the named ones.
    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Exclude(fields.into_iter().map(Into::into).collect())
    }

    /// Whether a field is selected.
    pub fn includes(&self, name: &str) -> bool {
        match self {
            Projection::Only(fields) => fields.contains(name),
            Projection::Exclude(fields) => !fields.contains(name),
        }
    }

    /// Database projection document.
    pub fn to_document(&self) -> Document {
        let (fields, flag) = match self {
            Projection::Only(fields) => (fields, 1),
            Projection::Exclude(fields) => (fields, 0),
        };
        let mut doc = Document::new();
        for field in fields {
            doc.insert(field.clone(), Bson::Int32(flag));
        }
        doc
    }
}

/// An instance of a record class.
#[derive(Clone)]
pub struct Record {
    engine: Engine,
    class: Arc<RecordClass>,
    id: Option<ObjectId>,
    values: BTreeMap<String, Value>,
    loaded: Option<Projection>,
}

impl Record {
    /// Create a record with every default applied.
    pub fn new(engine: Engine, class: Arc<RecordClass>) -> Self {
        let values = class
            .fields()
            .filter_map(|(name, field)| {
                field
                    .default
                    .as_ref()
                    .map(|default| {
                        (name.to_string(), field_transform::storage_precision(default.produce()))
                    })
            })
            .collect();
        Self {
            engine,
            class,
            id: None,
            values,
            loaded: None,
        }
    }

    /// Class of the record.
    pub fn class(&self) -> &Arc<RecordClass> {
        &self.class
    }

    /// Engine the record belongs to.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Database key, once saved.
    pub fn id(&self) -> Option<ObjectId> {
        self.id
    }

    /// Set the key of a record that has none.
    ///
    /// The key is immutable once assigned, and embedded records have none.
    pub fn set_id(&mut self, id: ObjectId) -> Result<()> {
        if self.class.is_embedded() {
            return Err(Error::Operation(format!(
                "embedded record {} has no key",
                self.class.key()
            )));
        }
        match self.id {
            Some(current) if current != id => Err(Error::Operation(format!(
                "key of {} record {} cannot be changed",
                self.class.key(),
                current
            ))),
            _ => {
                self.id = Some(id);
                Ok(())
            }
        }
    }

    pub(crate) fn assign_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }

    /// Stored value of a field, if set.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Value of a stored or computed field, null when unset.
    pub fn value(&self, name: &str) -> Value {
        if let Some(value) = self.values.get(name) {
            return value.clone();
        }
        match self.class.computed_field(name) {
            Some(computed) => computed.compute(self),
            None => Value::Null,
        }
    }

    /// Assign a field.
    ///
    /// Records and keys assigned to reference fields become references;
    /// records must be of the declared class.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let field = match self.class.field(name) {
            Some(field) => field,
            None if self.class.computed_field(name).is_some() => {
                return Err(ValidationError::new(name, "computed field is read-only").into())
            }
            None => return Err(ValidationError::new(name, "Rogue field").into()),
        };
        let value = field_transform::coerce(&field.kind, value.into()).map_err(|e| e.within(name))?;
        check_target(&field.kind, &value).map_err(|e| e.within(name))?;
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Assign a field, builder style.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Clear a field. Returns the previous value.
    pub fn unset(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    /// Store an already converted value.
    pub(crate) fn put(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.values.get_mut(name)
    }

    /// Set field values.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Projection the record was loaded with.
    pub fn loaded(&self) -> Option<&Projection> {
        self.loaded.as_ref()
    }

    /// Whether the record was loaded with a projection.
    pub fn is_partial(&self) -> bool {
        self.loaded.is_some()
    }

    pub(crate) fn set_loaded(&mut self, loaded: Option<Projection>) {
        self.loaded = loaded;
    }

    /// Check every field against its declaration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, field) in self.class.fields() {
            match self.values.get(name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(ValidationError::new(name, "This field is required."));
                    }
                }
                Some(value) => {
                    field_transform::validate(&field.kind, value).map_err(|e| e.within(name))?
                }
            }
        }
        Ok(())
    }

    /// Primitive form.
    pub fn to_primitive(&self, options: &PrimitiveOptions) -> JsonValue {
        transform::to_primitive(self, options)
    }

    /// Database form.
    pub fn to_database(&self) -> Result<Document> {
        transform::to_database(self)
    }

    fn manager(&self, db: &Database) -> Manager {
        Manager::new(self.engine.clone(), self.class.clone()).set_db(db.clone())
    }

    /// Validate and write the record, inserting it when it has no key.
    pub async fn save(&mut self, db: &Database) -> Result<ObjectId> {
        self.manager(db).save(self).await
    }

    /// Insert the record without firing save hooks.
    pub async fn insert(&mut self, db: &Database) -> Result<ObjectId> {
        self.manager(db).insert_one(self).await
    }

    /// Remove the record, applying delete rules.
    pub async fn remove(&self, db: &Database) -> Result<RemoveOutcome> {
        self.manager(db).remove_records(vec![self.clone()]).await
    }

    /// Apply a partial update to the stored record.
    pub async fn update(
        &self,
        db: &Database,
        patch: Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        let id = self.id.ok_or_else(|| {
            Error::Operation(format!("{} record is not saved yet", self.class.key()))
        })?;
        self.manager(db)
            .update(bson::doc! { "_id": id }, patch, options)
            .await
    }
}

/// Check that records assigned to embedded and reference fields have the
/// declared class.
fn check_target(kind: &FieldKind, value: &Value) -> Result<(), ValidationError> {
    let (expected, record) = match (kind, value) {
        (FieldKind::Embedded(target), Value::Record(record)) => (target.key(), record.as_ref()),
        (FieldKind::Reference(target), Value::Reference(Reference::Live(record))) => {
            (target.key(), record.as_ref())
        }
        (FieldKind::List(inner), Value::List(items)) => {
            for (index, item) in items.iter().enumerate() {
                check_target(inner, item).map_err(|e| e.within(&index.to_string()))?;
            }
            return Ok(());
        }
        (FieldKind::Dict(inner), Value::Map(map)) => {
            for (key, item) in map {
                check_target(inner, item).map_err(|e| e.within(key))?;
            }
            return Ok(());
        }
        (FieldKind::Embedded(_), other) | (FieldKind::Reference(_), other)
            if !other.is_null() && !matches!(other, Value::Reference(_)) =>
        {
            return Err(ValidationError::new(
                "",
                format!("{} cannot be assigned here", other.type_name()),
            ))
        }
        _ => return Ok(()),
    };
    match expected {
        Some(key) if key != record.class().key() => Err(ValidationError::new(
            "",
            format!("expected a record of class {}, got {}", key, record.class().key()),
        )),
        _ => Ok(()),
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("class", &self.class.key())
            .field("id", &self.id)
            .field("values", &self.values)
            .finish()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.class.key() == other.class.key() && self.id == other.id && self.values == other.values
    }
}
