//! In-process document database.
//!
//! `MemoryDatabase` implements [`Driver`] over plain vectors of documents.
//! It is the backend for the test suite, so it also records every operation
//! it receives and can be told to fail the next few calls with a connection
//! error.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};

use super::matcher::{lookup, values_equal, FilterEvaluator};
use super::pipeline::{apply_projection, run_pipeline, sort_documents};
use super::update::{apply_update, is_replacement, upsert_seed};
use super::{
    DocumentStream, Driver, DriverError, DriverResult, FindOptions, RemoveResult, UpdateOptions,
    UpdateResult,
};
use crate::catalog::IndexSpec;

/// Name of the implicit primary key index.
pub const ID_INDEX: &str = "_id_";

/// Kind of operation received by the in-memory driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// [`Driver::find_one`].
    FindOne,
    /// [`Driver::find`].
    Find,
    /// [`Driver::count`].
    Count,
    /// [`Driver::insert`].
    Insert,
    /// [`Driver::update`].
    Update,
    /// [`Driver::remove`].
    Remove,
    /// [`Driver::aggregate`].
    Aggregate,
    /// [`Driver::ensure_index`].
    EnsureIndex,
}

/// An operation received by the in-memory driver.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// What was requested.
    pub kind: OperationKind,
    /// Target collection.
    pub collection: String,
    /// Filter document, empty for inserts, pipelines and index builds.
    pub filter: Document,
    /// Whether the call failed with an injected connection error.
    pub failed: bool,
}

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<Document>,
    indexes: BTreeMap<String, IndexSpec>,
}

impl Collection {
    fn matching(&self, filter: &Document) -> DriverResult<Vec<usize>> {
        let mut positions = Vec::new();
        for (position, doc) in self.documents.iter().enumerate() {
            if FilterEvaluator::evaluate(filter, doc)? {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    /// Check a candidate document against `_id` and every unique index.
    fn check_unique(&self, candidate: &Document, skip: Option<usize>) -> DriverResult<()> {
        for (position, existing) in self.documents.iter().enumerate() {
            if Some(position) == skip {
                continue;
            }
            if let (Some(a), Some(b)) = (candidate.get("_id"), existing.get("_id")) {
                if values_equal(a, b) {
                    return Err(DriverError::DuplicateKey(ID_INDEX.to_string()));
                }
            }
            for (name, index) in &self.indexes {
                if index.unique && same_key(index, candidate, existing) {
                    return Err(DriverError::DuplicateKey(name.clone()));
                }
            }
        }
        Ok(())
    }
}

fn index_key(index: &IndexSpec, doc: &Document) -> Vec<Bson> {
    index
        .keys
        .iter()
        .map(|(field, _)| {
            lookup(doc, field)
                .into_iter()
                .next()
                .cloned()
                .unwrap_or(Bson::Null)
        })
        .collect()
}

fn same_key(index: &IndexSpec, a: &Document, b: &Document) -> bool {
    let left = index_key(index, a);
    let right = index_key(index, b);
    left.iter().zip(right.iter()).all(|(x, y)| values_equal(x, y))
}

/// An in-memory [`Driver`] implementation.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    collections: RwLock<HashMap<String, Collection>>,
    operations: Mutex<Vec<Operation>>,
    pending_failures: AtomicUsize,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` operations with [`DriverError::Connection`].
    pub fn fail_next_operations(&self, n: usize) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Every operation received so far, including injected failures.
    pub fn operations(&self) -> Vec<Operation> {
        self.operations.lock().clone()
    }

    /// Forget the operation log.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    /// Snapshot of a collection's documents in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// Indexes of a collection keyed by name, including the `_id_` index.
    pub fn index_information(&self, collection: &str) -> BTreeMap<String, IndexSpec> {
        let mut info = BTreeMap::new();
        info.insert(ID_INDEX.to_string(), IndexSpec::new().asc("_id"));
        if let Some(c) = self.collections.read().get(collection) {
            info.extend(c.indexes.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        info
    }

    /// Log an operation and consume a pending injected failure.
    fn begin(&self, kind: OperationKind, collection: &str, filter: &Document) -> DriverResult<()> {
        let failed = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        self.operations.lock().push(Operation {
            kind,
            collection: collection.to_string(),
            filter: filter.clone(),
            failed,
        });
        if failed {
            return Err(DriverError::Connection(format!(
                "connection reset during {:?} on {}",
                kind, collection
            )));
        }
        Ok(())
    }

    fn select(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
    ) -> DriverResult<Vec<Document>> {
        let collections = self.collections.read();
        let mut docs = match collections.get(collection) {
            Some(c) => {
                let mut docs = Vec::new();
                for doc in &c.documents {
                    if FilterEvaluator::evaluate(filter, doc)? {
                        docs.push(doc.clone());
                    }
                }
                docs
            }
            None => Vec::new(),
        };
        drop(collections);

        sort_documents(&mut docs, &options.sort);
        let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
        let limit = options
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        let docs = docs.into_iter().skip(skip).take(limit);
        match &options.projection {
            Some(projection) => docs.map(|d| apply_projection(&d, projection)).collect(),
            None => Ok(docs.collect()),
        }
    }
}

fn document_id(doc: &mut Document) -> DriverResult<ObjectId> {
    match doc.get("_id") {
        Some(Bson::ObjectId(id)) => Ok(*id),
        Some(other) => Err(DriverError::InvalidQuery(format!(
            "unsupported _id value {}",
            other
        ))),
        None => {
            let id = ObjectId::new();
            // keep `_id` first, as a server would
            let mut with_id = Document::new();
            with_id.insert("_id", id);
            with_id.extend(std::mem::take(doc));
            *doc = with_id;
            Ok(id)
        }
    }
}

#[async_trait]
impl Driver for MemoryDatabase {
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DriverResult<Option<Document>> {
        self.begin(OperationKind::FindOne, collection, &filter)?;
        let options = FindOptions {
            limit: Some(1),
            ..options
        };
        Ok(self.select(collection, &filter, &options)?.into_iter().next())
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DriverResult<DocumentStream> {
        self.begin(OperationKind::Find, collection, &filter)?;
        let docs = self.select(collection, &filter, &options)?;
        Ok(stream::iter(docs.into_iter().map(Ok)).boxed())
    }

    async fn count(&self, collection: &str, filter: Document) -> DriverResult<u64> {
        self.begin(OperationKind::Count, collection, &filter)?;
        let collections = self.collections.read();
        match collections.get(collection) {
            Some(c) => Ok(c.matching(&filter)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn insert(
        &self,
        collection: &str,
        mut documents: Vec<Document>,
    ) -> DriverResult<Vec<ObjectId>> {
        self.begin(OperationKind::Insert, collection, &Document::new())?;
        let mut ids = Vec::with_capacity(documents.len());
        for doc in &mut documents {
            ids.push(document_id(doc)?);
        }

        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        for (position, doc) in documents.iter().enumerate() {
            target.check_unique(doc, None)?;
            // duplicates inside the batch itself
            for earlier in &documents[..position] {
                if values_equal(
                    earlier.get("_id").unwrap_or(&Bson::Null),
                    doc.get("_id").unwrap_or(&Bson::Null),
                ) {
                    return Err(DriverError::DuplicateKey(ID_INDEX.to_string()));
                }
            }
        }
        target.documents.extend(documents);
        Ok(ids)
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DriverResult<UpdateResult> {
        self.begin(OperationKind::Update, collection, &filter)?;
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();

        let mut positions = target.matching(&filter)?;
        if !options.multi {
            positions.truncate(1);
        }

        if positions.is_empty() {
            if !options.upsert {
                return Ok(UpdateResult {
                    ok: true,
                    matched: 0,
                    modified: 0,
                    upserted_id: None,
                });
            }
            let mut doc = upsert_seed(&filter);
            if is_replacement(&update) {
                let id = doc.get("_id").cloned();
                doc = update.clone();
                if let Some(id) = id {
                    doc.insert("_id", id);
                }
            } else {
                apply_update(&mut doc, &update)?;
            }
            let id = document_id(&mut doc)?;
            target.check_unique(&doc, None)?;
            target.documents.push(doc);
            return Ok(UpdateResult {
                ok: true,
                matched: 0,
                modified: 0,
                upserted_id: Some(Bson::ObjectId(id)),
            });
        }

        let mut modified = 0;
        for &position in &positions {
            let mut doc = target.documents[position].clone();
            if apply_update(&mut doc, &update)? {
                target.check_unique(&doc, Some(position))?;
                target.documents[position] = doc;
                modified += 1;
            }
        }
        Ok(UpdateResult {
            ok: true,
            matched: positions.len() as u64,
            modified,
            upserted_id: None,
        })
    }

    async fn remove(&self, collection: &str, filter: Document) -> DriverResult<RemoveResult> {
        self.begin(OperationKind::Remove, collection, &filter)?;
        let mut collections = self.collections.write();
        let target = match collections.get_mut(collection) {
            Some(c) => c,
            None => return Ok(RemoveResult { ok: true, removed: 0 }),
        };
        let positions = target.matching(&filter)?;
        let mut position = 0;
        target.documents.retain(|_| {
            let keep = positions.binary_search(&position).is_err();
            position += 1;
            keep
        });
        Ok(RemoveResult {
            ok: true,
            removed: positions.len() as u64,
        })
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DriverResult<Vec<Document>> {
        self.begin(OperationKind::Aggregate, collection, &Document::new())?;
        let docs = self.documents(collection);
        run_pipeline(docs, &pipeline)
    }

    async fn ensure_index(&self, collection: &str, index: &IndexSpec) -> DriverResult<String> {
        self.begin(OperationKind::EnsureIndex, collection, &Document::new())?;
        if index.keys.is_empty() {
            return Err(DriverError::InvalidQuery("index has no keys".into()));
        }
        let name = index.name();
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        match target.indexes.get(&name) {
            Some(existing) if existing == index => return Ok(name),
            Some(_) => {
                return Err(DriverError::Operation {
                    code: 85,
                    message: format!("index {} already exists with different options", name),
                })
            }
            None => {}
        }
        if index.unique {
            for (i, a) in target.documents.iter().enumerate() {
                for b in &target.documents[i + 1..] {
                    if same_key(index, a, b) {
                        return Err(DriverError::DuplicateKey(name));
                    }
                }
            }
        }
        target.indexes.insert(name.clone(), index.clone());
        Ok(name)
    }
}
