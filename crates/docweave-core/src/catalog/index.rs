//! Index declarations.

use std::time::Duration;

use bson::Document;
use serde::{Deserialize, Serialize};

use crate::driver::SortOrder;

/// A (possibly compound) index on a record collection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Indexed fields in order, with direction. Nested fields use dotted paths.
    pub keys: Vec<(String, SortOrder)>,
    /// Reject documents that duplicate an existing key.
    pub unique: bool,
    /// Expire documents this long after the indexed datetime.
    pub ttl: Option<Duration>,
}

impl IndexSpec {
    /// Create an empty index declaration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an ascending key.
    pub fn asc(self, field: impl Into<String>) -> Self {
        self.with_key(field, SortOrder::Asc)
    }

    /// Add a descending key.
    pub fn desc(self, field: impl Into<String>) -> Self {
        self.with_key(field, SortOrder::Desc)
    }

    /// Add a key with an explicit direction.
    pub fn with_key(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.keys.push((field.into(), order));
        self
    }

    /// Mark the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set a time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// The index name, e.g. `title_1_user.name_1`.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|(field, order)| format!("{}_{}", field, order.as_i32()))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// The key document, e.g. `{title: 1, "user.name": 1}`.
    pub fn key_document(&self) -> Document {
        let mut doc = Document::new();
        for (field, order) in &self.keys {
            doc.insert(field.clone(), order.as_i32());
        }
        doc
    }
}
