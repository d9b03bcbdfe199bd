//! Database driver interface.
//!
//! The engine never talks to storage directly. Every read and write goes
//! through a [`Driver`], an externally owned handle that the application
//! hands to managers with [`Manager::set_db`](crate::Manager::set_db).
//!
//! [`memory::MemoryDatabase`] is a complete in-process implementation used
//! by the test suite.

pub mod matcher;
pub mod memory;
pub mod pipeline;
pub mod update;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::IndexSpec;

pub use memory::MemoryDatabase;

/// Driver-level errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Transient connectivity failure; the engine retries these.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server rejected the operation.
    #[error("operation failed (code {code}): {message}")]
    Operation {
        /// Server error code.
        code: i32,
        /// Server error message.
        message: String,
    },

    /// A unique index was violated.
    #[error("duplicate key error on index `{0}`")]
    DuplicateKey(String),

    /// The filter, update or pipeline is malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Result alias for driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Stream of raw documents returned by [`Driver::find`].
pub type DocumentStream = BoxStream<'static, DriverResult<Document>>;

/// Shared database handle.
pub type Database = Arc<dyn Driver>;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

impl SortOrder {
    /// The numeric direction used in index and sort documents.
    pub fn as_i32(self) -> i32 {
        match self {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        }
    }
}

/// Options for [`Driver::find`] and [`Driver::find_one`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort keys, applied in order.
    pub sort: Vec<(String, SortOrder)>,
    /// Number of matching documents to skip.
    pub skip: u64,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
    /// Projection document (`{field: 1}` or `{field: 0}`).
    pub projection: Option<Document>,
}

impl FindOptions {
    /// Create empty find options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sort key.
    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    /// Set the skip count.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Set the limit.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the projection.
    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Options for [`Driver::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a document when nothing matches.
    pub upsert: bool,
    /// Update every matching document instead of the first.
    pub multi: bool,
    /// Flatten nested sub-documents of the patch into dotted keys.
    ///
    /// Applied by the manager before the update reaches the driver.
    pub flatten: bool,
}

impl UpdateOptions {
    /// Update a single document.
    pub fn single() -> Self {
        Self::default()
    }

    /// Update every matching document.
    pub fn multi() -> Self {
        Self {
            multi: true,
            ..Self::default()
        }
    }

    /// Update a single document, inserting it when missing.
    pub fn upsert() -> Self {
        Self {
            upsert: true,
            ..Self::default()
        }
    }

    /// Flatten nested patches into dotted keys.
    pub fn with_flatten(mut self) -> Self {
        self.flatten = true;
        self
    }
}

/// Result of an update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    /// Whether the server acknowledged the write.
    pub ok: bool,
    /// Documents matched by the filter.
    pub matched: u64,
    /// Documents actually changed.
    pub modified: u64,
    /// Key of the inserted document when the update upserted.
    pub upserted_id: Option<Bson>,
}

/// Result of a removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveResult {
    /// Whether the server acknowledged the write.
    pub ok: bool,
    /// Number of documents removed.
    pub removed: u64,
}

/// An asynchronous document database.
///
/// All methods may fail with [`DriverError::Connection`], which the engine
/// treats as retryable.
#[async_trait]
pub trait Driver: fmt::Debug + Send + Sync {
    /// Find the first document matching `filter`.
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DriverResult<Option<Document>>;

    /// Find every document matching `filter`.
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DriverResult<DocumentStream>;

    /// Count documents matching `filter`.
    async fn count(&self, collection: &str, filter: Document) -> DriverResult<u64>;

    /// Insert documents, assigning an `_id` to those without one.
    ///
    /// Returns the keys in input order.
    async fn insert(&self, collection: &str, documents: Vec<Document>)
        -> DriverResult<Vec<ObjectId>>;

    /// Apply `update` to documents matching `filter`.
    ///
    /// An update without `$`-operators replaces the matched document.
    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DriverResult<UpdateResult>;

    /// Remove every document matching `filter`.
    async fn remove(&self, collection: &str, filter: Document) -> DriverResult<RemoveResult>;

    /// Run an aggregation pipeline.
    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>)
        -> DriverResult<Vec<Document>>;

    /// Create an index if it does not exist yet. Returns the index name.
    async fn ensure_index(&self, collection: &str, index: &IndexSpec) -> DriverResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_options_builder() {
        let options = FindOptions::new()
            .with_sort("title", SortOrder::Desc)
            .with_skip(5)
            .with_limit(10);

        assert_eq!(options.sort, vec![("title".to_string(), SortOrder::Desc)]);
        assert_eq!(options.skip, 5);
        assert_eq!(options.limit, Some(10));
        assert!(options.projection.is_none());
    }

    #[test]
    fn test_update_options() {
        assert!(!UpdateOptions::single().multi);
        assert!(UpdateOptions::multi().multi);
        assert!(UpdateOptions::upsert().upsert);
        assert!(UpdateOptions::multi().with_flatten().flatten);
        assert_eq!(SortOrder::Desc.as_i32(), -1);
    }
}
