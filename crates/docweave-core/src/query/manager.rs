//! Per-class query manager.
//!
//! A [`Manager`] is bound to one record class and, once [`set_db`] is
//! called, to one database handle. Every database call goes through the
//! engine's retry policy.
//!
//! [`set_db`]: Manager::set_db

use std::future::Future;
use std::sync::Arc;

use bson::oid::ObjectId;
use bson::Document;

use super::cursor::Cursor;
use super::filter::{flatten, process_query};
use super::prefetch::prefetch_related;
use crate::cascade::{CascadeExecutor, RemoveOutcome};
use crate::catalog::RecordClass;
use crate::driver::matcher::is_operator_document;
use crate::driver::{Database, DriverResult, FindOptions, UpdateOptions, UpdateResult};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::record::{Projection, Record};
use crate::retry::with_retry;
use crate::signals::Hook;
use crate::transform::{self, field as field_transform};

/// Query manager for one record class.
#[derive(Debug, Clone)]
pub struct Manager {
    engine: Engine,
    class: Arc<RecordClass>,
    db: Option<Database>,
    prefetch: Vec<String>,
}

impl Manager {
    /// Create an unbound manager.
    pub fn new(engine: Engine, class: Arc<RecordClass>) -> Self {
        Self {
            engine,
            class,
            db: None,
            prefetch: Vec::new(),
        }
    }

    /// Engine handle.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Managed class.
    pub fn class(&self) -> &Arc<RecordClass> {
        &self.class
    }

    /// A copy of this manager bound to `db`.
    pub fn set_db(&self, db: Database) -> Manager {
        Manager {
            db: Some(db),
            ..self.clone()
        }
    }

    /// A copy of this manager that resolves the given reference paths on
    /// every record it loads.
    ///
    /// Paths are dotted field names, e.g. `main_event.user`.
    pub fn prefetch_related<I, S>(&self, paths: I) -> Manager
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut manager = self.clone();
        manager.prefetch.extend(paths.into_iter().map(Into::into));
        manager
    }

    /// Reference paths resolved after loading.
    pub fn prefetch_paths(&self) -> &[String] {
        &self.prefetch
    }

    /// The bound database.
    pub fn database(&self) -> Result<&Database> {
        if self.class.is_embedded() {
            return Err(Error::Operation(format!(
                "embedded class {} has no collection",
                self.class.key()
            )));
        }
        self.db
            .as_ref()
            .ok_or_else(|| Error::Unbound(self.class.key().to_string()))
    }

    /// Run a driver call under the retry policy.
    pub(crate) async fn run<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: Fn(Database) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let db = self.database()?.clone();
        with_retry(&self.engine.config().retry, self.class.key(), operation, || {
            op(db.clone())
        })
        .await
    }

    /// Start a query.
    pub fn filter(&self, query: Document) -> Result<Cursor> {
        self.database()?;
        Ok(Cursor::new(self.clone(), process_query(query)?))
    }

    /// Load the first record matching `query`, or `None`.
    pub async fn get(&self, query: Document) -> Result<Option<Record>> {
        let filter = process_query(query)?;
        let collection = self.class.collection();
        let filter_ref = &filter;
        let found = self
            .run("find_one", |db| async move {
                db.find_one(collection, filter_ref.clone(), FindOptions::new())
                    .await
            })
            .await?;
        tracing::debug!(
            class = %self.class.key(),
            collection = %collection,
            found = found.is_some(),
            "get"
        );
        match found {
            Some(doc) => {
                let mut records = vec![transform::to_native(&self.engine, &self.class, &doc, None)?];
                self.resolve(&mut records).await?;
                Ok(records.pop())
            }
            None => Ok(None),
        }
    }

    /// Load every record of the class.
    pub async fn all(&self) -> Result<Vec<Record>> {
        self.filter(Document::new())?.all().await
    }

    /// Count records matching `query`.
    pub async fn count(&self, query: Document) -> Result<u64> {
        let filter = process_query(query)?;
        let collection = self.class.collection();
        let filter = &filter;
        self.run("count", |db| async move { db.count(collection, filter.clone()).await })
            .await
    }

    pub(crate) async fn find_documents(
        &self,
        filter: &Document,
        options: &FindOptions,
    ) -> Result<Vec<Document>> {
        use futures::TryStreamExt;

        let collection = self.class.collection();
        let docs = self
            .run("find", |db| async move {
                let stream = db.find(collection, filter.clone(), options.clone()).await?;
                stream.try_collect::<Vec<_>>().await
            })
            .await?;
        tracing::debug!(
            class = %self.class.key(),
            collection = %collection,
            count = docs.len(),
            "find"
        );
        Ok(docs)
    }

    /// Convert loaded documents and resolve prefetch paths.
    pub(crate) async fn load(
        &self,
        docs: Vec<Document>,
        projection: Option<&Projection>,
    ) -> Result<Vec<Record>> {
        let mut records = docs
            .iter()
            .map(|doc| transform::to_native(&self.engine, &self.class, doc, projection.cloned()))
            .collect::<Result<Vec<_>>>()?;
        self.resolve(&mut records).await?;
        Ok(records)
    }

    async fn resolve(&self, records: &mut [Record]) -> Result<()> {
        if self.prefetch.is_empty() || records.is_empty() {
            return Ok(());
        }
        let db = self.database()?.clone();
        prefetch_related(&self.engine, &db, &self.class, records, &self.prefetch).await
    }

    fn check_class(&self, record: &Record) -> Result<()> {
        if record.class().key() != self.class.key() {
            return Err(Error::Operation(format!(
                "manager of {} cannot write a {} record",
                self.class.key(),
                record.class().key()
            )));
        }
        Ok(())
    }

    /// Insert one record without firing save hooks.
    ///
    /// A record with a key is inserted under that key; an existing record
    /// with the same key is a duplicate-key failure.
    pub async fn insert_one(&self, record: &mut Record) -> Result<ObjectId> {
        let ids = self.insert(std::slice::from_mut(record)).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| Error::OperationFailure("insert returned no key".into()))
    }

    /// Insert records in one batch, assigning their keys.
    pub async fn insert(&self, records: &mut [Record]) -> Result<Vec<ObjectId>> {
        let mut docs = Vec::with_capacity(records.len());
        for record in records.iter() {
            self.check_class(record)?;
            docs.push(record.to_database()?);
        }
        let collection = self.class.collection();
        let docs = &docs;
        let ids = self
            .run("insert", |db| async move { db.insert(collection, docs.clone()).await })
            .await?;
        for (record, id) in records.iter_mut().zip(&ids) {
            record.assign_id(*id);
        }
        tracing::debug!(
            class = %self.class.key(),
            collection = %collection,
            count = ids.len(),
            "inserted records"
        );
        Ok(ids)
    }

    /// Validate and write a record.
    ///
    /// A record without a key is inserted; one with a key replaces the
    /// stored document, creating it if needed. Save hooks fire around the
    /// write.
    pub async fn save(&self, record: &mut Record) -> Result<ObjectId> {
        self.check_class(record)?;
        if record.is_partial() {
            return Err(Error::Operation(format!(
                "{} record was loaded with a projection and cannot be saved",
                self.class.key()
            )));
        }
        record.validate()?;
        let hooks = self.engine.hooks();
        hooks.send(Hook::PreSave, &self.class, record).await?;

        let doc = record.to_database()?;
        let collection = self.class.collection();
        let id = match record.id() {
            None => {
                let docs = vec![doc];
                let docs = &docs;
                let ids = self
                    .run("save", |db| async move { db.insert(collection, docs.clone()).await })
                    .await?;
                let id = ids
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::OperationFailure("insert returned no key".into()))?;
                record.assign_id(id);
                id
            }
            Some(id) => {
                let filter = bson::doc! { "_id": id };
                let (filter, doc) = (&filter, &doc);
                let result = self
                    .run("save", |db| async move {
                        db.update(collection, filter.clone(), doc.clone(), UpdateOptions::upsert())
                            .await
                    })
                    .await?;
                if !result.ok {
                    return Err(Error::OperationFailure(format!(
                        "save of {} {} was not acknowledged",
                        self.class.key(),
                        id
                    )));
                }
                id
            }
        };
        tracing::debug!(class = %self.class.key(), id = %id, "saved record");

        hooks.send(Hook::PostSave, &self.class, record).await?;
        Ok(id)
    }

    /// Apply a partial update to records matching `query`.
    ///
    /// Values of declared fields are converted to their database form. The
    /// patch is wrapped in `$set` unless it already uses update operators.
    pub async fn update(
        &self,
        query: Document,
        patch: Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        let filter = process_query(query)?;
        let update = if is_operator_document(&patch) {
            patch
        } else {
            let mut data = self.patch_to_database(patch)?;
            if options.flatten {
                data = flatten(data);
            }
            bson::doc! { "$set": data }
        };

        let collection = self.class.collection();
        let (filter_ref, update_ref) = (&filter, &update);
        let result = self
            .run("update", |db| async move {
                db.update(collection, filter_ref.clone(), update_ref.clone(), options)
                    .await
            })
            .await?;
        tracing::debug!(
            class = %self.class.key(),
            matched = result.matched,
            modified = result.modified,
            "update result"
        );
        if !result.ok {
            return Err(Error::OperationFailure(format!(
                "update of {} was not acknowledged",
                self.class.key()
            )));
        }
        Ok(result)
    }

    /// Convert the values of declared fields in a patch.
    ///
    /// Dotted keys and keys unknown to the class are passed through.
    fn patch_to_database(&self, patch: Document) -> Result<Document> {
        let mut out = Document::new();
        for (key, raw) in patch {
            let value = match self.class.field(&key) {
                Some(field) => {
                    let native = field_transform::to_native(&self.engine, &field.kind, &raw)
                        .map_err(|e| e.within(&key))?;
                    field_transform::to_database(&field.kind, &native).map_err(|e| e.within(&key))?
                }
                None => raw,
            };
            out.insert(key, value);
        }
        Ok(out)
    }

    /// Remove records matching `query`, applying delete rules.
    pub async fn remove(&self, query: Document) -> Result<RemoveOutcome> {
        let filter = process_query(query)?;
        let docs = self.find_documents(&filter, &FindOptions::new()).await?;
        let records = docs
            .iter()
            .map(|doc| transform::to_native(&self.engine, &self.class, doc, None))
            .collect::<Result<Vec<_>>>()?;
        self.remove_records(records).await
    }

    /// Remove the given records, applying delete rules.
    pub async fn remove_records(&self, records: Vec<Record>) -> Result<RemoveOutcome> {
        for record in &records {
            self.check_class(record)?;
        }
        let db = self.database()?;
        CascadeExecutor::new(&self.engine, db)
            .process_remove(&self.class, records)
            .await
    }

    /// Run an aggregation pipeline on the class's collection.
    pub async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let collection = self.class.collection();
        let pipeline = &pipeline;
        self.run("aggregate", |db| async move {
            db.aggregate(collection, pipeline.clone()).await
        })
        .await
    }

    /// Create every index declared on the class. Returns the index names.
    pub async fn ensure_indexes(&self) -> Result<Vec<String>> {
        let collection = self.class.collection();
        let mut names = Vec::with_capacity(self.class.indexes().len());
        for index in self.class.indexes() {
            let name = self
                .run("ensure_index", |db| async move {
                    db.ensure_index(collection, index).await
                })
                .await?;
            tracing::debug!(class = %self.class.key(), index = %name, "ensured index");
            names.push(name);
        }
        Ok(names)
    }

    /// Build a record of the class from primitive input.
    pub fn from_primitive(&self, input: &serde_json::Value) -> Result<Record> {
        transform::from_primitive(&self.engine, &self.class, input)
    }
}
