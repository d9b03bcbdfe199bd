//! Docweave Core - async document mapping engine.
//!
//! This crate maps record classes onto a document database: schemas and a
//! class registry, conversion between native, primitive and database forms,
//! query managers with batched reference prefetching, delete rules applied on
//! removal, and lifecycle hooks.

pub mod cascade;
pub mod catalog;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod query;
pub mod record;
pub mod retry;
pub mod signals;
pub mod transform;
pub mod value;

pub use cascade::RemoveOutcome;
pub use catalog::{
    ClassTarget, DeleteRule, Field, FieldKind, IndexSpec, RecordClass, Registry, Schema,
    ScalarType,
};
pub use config::{EngineConfig, RetryPolicy};
pub use driver::{
    Database, Driver, DriverError, FindOptions, MemoryDatabase, SortOrder, UpdateOptions,
    UpdateResult,
};
pub use engine::{Engine, Model};
pub use error::{ConversionError, Error, Result, ValidationError};
pub use query::{Cursor, Manager};
pub use record::{Projection, Record};
pub use signals::{Hook, HookBus, Receiver, ReceiverId};
pub use transform::PrimitiveOptions;
pub use value::{Reference, Value};
