//! Lazy query cursor.

use std::ops::Range;

use bson::Document;

use super::manager::Manager;
use crate::driver::{FindOptions, SortOrder};
use crate::error::Result;
use crate::record::{Projection, Record};

/// A query that has not run yet.
///
/// Sort, skip, limit and projection are accumulated and sent with the
/// find when a terminal method is awaited.
#[derive(Debug, Clone)]
pub struct Cursor {
    manager: Manager,
    filter: Document,
    options: FindOptions,
    projection: Option<Projection>,
}

impl Cursor {
    pub(crate) fn new(manager: Manager, filter: Document) -> Self {
        Self {
            manager,
            filter,
            options: FindOptions::new(),
            projection: None,
        }
    }

    /// The processed filter.
    pub fn filter(&self) -> &Document {
        &self.filter
    }

    /// Add a sort key.
    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.options = self.options.with_sort(field, order);
        self
    }

    /// Skip the first `n` matches.
    pub fn skip(mut self, n: u64) -> Self {
        self.options = self.options.with_skip(n);
        self
    }

    /// Return at most `n` matches.
    pub fn limit(mut self, n: u64) -> Self {
        self.options = self.options.with_limit(n);
        self
    }

    /// Load only the named fields.
    pub fn only<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(Projection::only(fields));
        self
    }

    /// Load every field except the named ones.
    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(Projection::exclude(fields));
        self
    }

    /// Run the query and load every match.
    pub async fn all(self) -> Result<Vec<Record>> {
        let mut options = self.options;
        if let Some(projection) = &self.projection {
            options = options.with_projection(projection.to_document());
        }
        let docs = self.manager.find_documents(&self.filter, &options).await?;
        self.manager.load(docs, self.projection.as_ref()).await
    }

    /// First match, if any.
    pub async fn first(self) -> Result<Option<Record>> {
        self.get(0).await
    }

    /// The match at `index` within the cursor's current window.
    pub async fn get(self, index: u64) -> Result<Option<Record>> {
        if self.options.limit.is_some_and(|limit| index >= limit) {
            return Ok(None);
        }
        let skip = self.options.skip.saturating_add(index);
        let mut records = self.skip(skip).limit(1).all().await?;
        Ok(records.pop())
    }

    /// Matches in `range`, relative to the cursor's current window.
    pub async fn slice(self, range: Range<u64>) -> Result<Vec<Record>> {
        if range.end <= range.start {
            return Ok(Vec::new());
        }
        let start = self.options.skip.saturating_add(range.start);
        let mut len = range.end - range.start;
        if let Some(limit) = self.options.limit {
            len = len.min(limit.saturating_sub(range.start));
        }
        if len == 0 {
            return Ok(Vec::new());
        }
        self.skip(start).limit(len).all().await
    }

    /// Number of matches, ignoring skip and limit.
    pub async fn count(&self) -> Result<u64> {
        let collection = self.manager.class().collection();
        let filter = &self.filter;
        self.manager
            .run("count", |db| async move { db.count(collection, filter.clone()).await })
            .await
    }
}
