//! Conversions between the three forms of a record.
//!
//! Native records hold [`Value`](crate::value::Value)s. The database form is
//! a BSON document with references stored as keys. The primitive form is
//! JSON-safe output for callers, with the key emitted as `id` and computed
//! fields included.

pub mod field;
pub mod json;
pub mod record;

pub use record::{from_primitive, to_database, to_native, to_primitive, PrimitiveOptions};
