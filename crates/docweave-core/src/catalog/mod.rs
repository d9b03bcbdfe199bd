//! Record class catalog.
//!
//! Schema declarations, field kinds, scalar types, delete rules, indexes and
//! the registry that ties class keys to registered classes.

mod field;
mod index;
mod registry;
mod relation;
mod schema;
mod types;

pub use field::{ClassTarget, ComputedField, DefaultValue, Field, FieldKind};
pub use index::IndexSpec;
pub use registry::Registry;
pub use relation::{DeleteRule, ReverseRule};
pub use schema::{default_collection_name, RecordClass, Schema, SchemaKind};
pub use types::{BoolType, DateTimeType, FloatType, IntType, ObjectIdType, ScalarType, StringType};
