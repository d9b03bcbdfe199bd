//! Native field values.
//!
//! [`Value`] is the in-memory shape of every field: scalars, containers,
//! embedded records and references. Dynamic fields hold any variant.

use std::collections::BTreeMap;
use std::fmt;

use bson::oid::ObjectId;
use chrono::{DateTime, Utc};

use crate::record::Record;

/// A native field value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent or explicitly null.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
    /// Database key.
    ObjectId(ObjectId),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map.
    Map(BTreeMap<String, Value>),
    /// Embedded record.
    Record(Box<Record>),
    /// Reference to another persisted record.
    Reference(Reference),
}

impl Value {
    /// Whether the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as a float, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as a timestamp.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Get as a database key.
    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Value::ObjectId(id) => Some(*id),
            _ => None,
        }
    }

    /// Borrow as a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow as a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Borrow as an embedded record.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Borrow as a reference.
    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Value::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    /// Name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::ObjectId(_) => "object id",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
            Value::Reference(_) => "reference",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::ObjectId(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(Box::new(v))
    }
}

impl From<Reference> for Value {
    fn from(v: Reference) -> Self {
        Value::Reference(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A reference field value.
///
/// References compare by target: a key equals a live record with the same id.
#[derive(Debug, Clone)]
pub enum Reference {
    /// The key of a record of the field's declared class.
    Key(ObjectId),
    /// The key of a record together with its class key.
    Generic {
        /// Key of the referenced record.
        id: ObjectId,
        /// Registry key of the referenced record's class.
        class_key: String,
    },
    /// A loaded record.
    Live(Box<Record>),
}

impl Reference {
    /// Key of the referenced record, if it has one.
    pub fn id(&self) -> Option<ObjectId> {
        match self {
            Reference::Key(id) => Some(*id),
            Reference::Generic { id, .. } => Some(*id),
            Reference::Live(record) => record.id(),
        }
    }

    /// Class key of the referenced record, when known.
    pub fn class_key(&self) -> Option<&str> {
        match self {
            Reference::Key(_) => None,
            Reference::Generic { class_key, .. } => Some(class_key),
            Reference::Live(record) => Some(record.class().key()),
        }
    }

    /// The loaded record, if the reference has been resolved.
    pub fn record(&self) -> Option<&Record> {
        match self {
            Reference::Live(record) => Some(record),
            _ => None,
        }
    }

    /// Whether the reference holds a loaded record.
    pub fn is_live(&self) -> bool {
        matches!(self, Reference::Live(_))
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        if self.id().is_none() || other.id().is_none() {
            // unsaved targets only equal themselves structurally
            return match (self, other) {
                (Reference::Live(a), Reference::Live(b)) => a == b,
                _ => false,
            };
        }
        if self.id() != other.id() {
            return false;
        }
        match (self.class_key(), other.class_key()) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl From<Record> for Reference {
    fn from(record: Record) -> Self {
        Reference::Live(Box::new(record))
    }
}

impl From<ObjectId> for Reference {
    fn from(id: ObjectId) -> Self {
        Reference::Key(id)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.class_key(), self.id()) {
            (Some(class), Some(id)) => write!(f, "{}({})", class, id),
            (None, Some(id)) => write!(f, "{}", id),
            (Some(class), None) => write!(f, "{}(unsaved)", class),
            (None, None) => write!(f, "(unsaved)"),
        }
    }
}
