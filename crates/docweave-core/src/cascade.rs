//! Delete-rule executor.
//!
//! Removal runs in three phases:
//! - Collect: follow CASCADE rules from the records being removed until no
//!   new record is reached, remembering the level each was reached at.
//! - Check: count the referencing documents of every DENY rule over that
//!   closure. Any hit aborts the removal before anything is written.
//! - Apply: deepest level first, NULLIFY and PULL the referencing
//!   documents, then remove the level's records with hooks around the delete.
//!
//! The phases are not transactional. A database failure in the apply phase
//! leaves the levels already applied in place.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{doc, Document};

use crate::catalog::{DeleteRule, RecordClass};
use crate::driver::{Database, FindOptions, UpdateOptions};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::query::Manager;
use crate::record::Record;
use crate::signals::Hook;
use crate::transform;

/// Result of a removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOutcome {
    /// Records removed because they were asked for.
    pub removed: u64,
    /// Records removed through CASCADE rules.
    pub cascaded: u64,
    /// Referencing documents whose field was unset by NULLIFY rules.
    pub nullified: u64,
    /// Referencing documents that had keys pulled from a list by PULL rules.
    pub pulled: u64,
}

impl RemoveOutcome {
    /// Total number of records removed.
    pub fn total_removed(&self) -> u64 {
        self.removed + self.cascaded
    }
}

/// Records of one class reached at one cascade level.
struct Batch {
    class: Arc<RecordClass>,
    records: Vec<Record>,
}

impl Batch {
    fn ids(&self) -> Vec<ObjectId> {
        self.records.iter().filter_map(Record::id).collect()
    }
}

/// Applies delete rules for a removal.
pub struct CascadeExecutor<'a> {
    engine: &'a Engine,
    db: &'a Database,
}

impl<'a> CascadeExecutor<'a> {
    /// Create an executor over a database.
    pub fn new(engine: &'a Engine, db: &'a Database) -> Self {
        Self { engine, db }
    }

    fn manager(&self, class: Arc<RecordClass>) -> Manager {
        Manager::new(self.engine.clone(), class).set_db(self.db.clone())
    }

    /// Remove `records` of `class` and apply every delete rule that points at them.
    pub async fn process_remove(
        &self,
        class: &Arc<RecordClass>,
        records: Vec<Record>,
    ) -> Result<RemoveOutcome> {
        if records.is_empty() {
            return Ok(RemoveOutcome::default());
        }
        if let Some(unsaved) = records.iter().find(|r| r.id().is_none()) {
            return Err(Error::Operation(format!(
                "{} record is not saved yet and cannot be removed",
                unsaved.class().key()
            )));
        }

        let records = self.still_stored(class, records).await?;
        if records.is_empty() {
            return Ok(RemoveOutcome::default());
        }

        let levels = self.collect(class, records).await?;
        let closure = closure_ids(&levels);
        self.check_deny(&levels, &closure).await?;

        let mut outcome = RemoveOutcome::default();
        for (depth, level) in levels.iter().enumerate().rev() {
            for batch in level {
                let removed = self.apply(batch, &closure, &mut outcome).await?;
                if depth == 0 {
                    outcome.removed += removed;
                } else {
                    outcome.cascaded += removed;
                }
            }
        }
        tracing::debug!(
            class = %class.key(),
            removed = outcome.removed,
            cascaded = outcome.cascaded,
            nullified = outcome.nullified,
            pulled = outcome.pulled,
            "remove complete"
        );
        Ok(outcome)
    }

    /// Drop roots that are no longer in the database, so rules and hooks
    /// only run for records this removal actually deletes.
    async fn still_stored(
        &self,
        class: &Arc<RecordClass>,
        records: Vec<Record>,
    ) -> Result<Vec<Record>> {
        let ids: Vec<ObjectId> = records.iter().filter_map(Record::id).collect();
        let options = FindOptions::new().with_projection(doc! { "_id": 1 });
        let docs = self
            .manager(class.clone())
            .find_documents(&doc! { "_id": { "$in": ids } }, &options)
            .await?;
        let stored: HashSet<ObjectId> = docs
            .iter()
            .filter_map(|doc| doc.get_object_id("_id").ok())
            .collect();
        let (present, gone): (Vec<Record>, Vec<Record>) = records
            .into_iter()
            .partition(|record| record.id().is_some_and(|id| stored.contains(&id)));
        if !gone.is_empty() {
            tracing::debug!(
                class = %class.key(),
                missing = gone.len(),
                "skipping records already removed"
            );
        }
        Ok(present)
    }

    /// Follow CASCADE rules breadth first. Level 0 holds the roots.
    async fn collect(
        &self,
        class: &Arc<RecordClass>,
        roots: Vec<Record>,
    ) -> Result<Vec<Vec<Batch>>> {
        let max_depth = self.engine.config().max_cascade_depth;
        let mut visited: HashSet<(String, ObjectId)> = HashSet::new();
        let mut roots_unique = Vec::with_capacity(roots.len());
        for record in roots {
            if let Some(id) = record.id() {
                if visited.insert((class.key().to_string(), id)) {
                    roots_unique.push(record);
                }
            }
        }

        let mut levels = vec![vec![Batch {
            class: class.clone(),
            records: roots_unique,
        }]];
        loop {
            let mut next: Vec<Batch> = Vec::new();
            let frontier = levels.last().map(Vec::as_slice).unwrap_or_default();
            for batch in frontier {
                let ids = batch.ids();
                for rule in self.engine.registry().delete_rules(batch.class.key()) {
                    if rule.rule != DeleteRule::Cascade {
                        continue;
                    }
                    let referencing = self.engine.class(&rule.referencing_class)?;
                    let manager = self.manager(referencing.clone());
                    let filter = doc! { rule.field.as_str(): { "$in": ids.clone() } };
                    let docs = manager.find_documents(&filter, &FindOptions::new()).await?;
                    for doc in &docs {
                        let record = transform::to_native(self.engine, &referencing, doc, None)?;
                        let Some(id) = record.id() else {
                            continue;
                        };
                        if !visited.insert((referencing.key().to_string(), id)) {
                            continue;
                        }
                        match next.iter_mut().find(|b| b.class.key() == referencing.key()) {
                            Some(target) => target.records.push(record),
                            None => next.push(Batch {
                                class: referencing.clone(),
                                records: vec![record],
                            }),
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            if levels.len() > max_depth {
                return Err(Error::CascadeDepthExceeded {
                    depth: levels.len(),
                });
            }
            levels.push(next);
        }
        Ok(levels)
    }

    /// Refuse the removal if any DENY rule has a referencing document
    /// outside the closure.
    async fn check_deny(
        &self,
        levels: &[Vec<Batch>],
        closure: &HashMap<String, Vec<ObjectId>>,
    ) -> Result<()> {
        for batch in levels.iter().flatten() {
            let ids = batch.ids();
            for rule in self.engine.registry().delete_rules(batch.class.key()) {
                if rule.rule != DeleteRule::Deny {
                    continue;
                }
                let referencing = self.engine.class(&rule.referencing_class)?;
                let filter = referencing_filter(&rule.field, &ids, closure.get(referencing.key()));
                let count = self.manager(referencing).count(filter).await?;
                if count > 0 {
                    tracing::debug!(
                        class = %batch.class.key(),
                        referencing = %rule.referencing_class,
                        field = %rule.field,
                        count,
                        "removal denied"
                    );
                    return Err(Error::Operation(format!(
                        "Could not delete document ({}.{} refers to it)",
                        rule.referencing_class, rule.field
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply NULLIFY and PULL rules for one batch, then remove it.
    async fn apply(
        &self,
        batch: &Batch,
        closure: &HashMap<String, Vec<ObjectId>>,
        outcome: &mut RemoveOutcome,
    ) -> Result<u64> {
        let ids = batch.ids();
        for rule in self.engine.registry().delete_rules(batch.class.key()) {
            let update = match rule.rule {
                DeleteRule::Nullify => doc! { "$unset": { rule.field.as_str(): "" } },
                DeleteRule::Pull => doc! { "$pull": { rule.field.as_str(): { "$in": ids.clone() } } },
                DeleteRule::Cascade | DeleteRule::Deny | DeleteRule::DoNothing => continue,
            };
            let referencing = self.engine.class(&rule.referencing_class)?;
            let filter = referencing_filter(&rule.field, &ids, closure.get(referencing.key()));
            let result = self
                .manager(referencing)
                .update(filter, update, UpdateOptions::multi())
                .await?;
            tracing::debug!(
                class = %batch.class.key(),
                referencing = %rule.referencing_class,
                field = %rule.field,
                rule = rule.rule.as_str(),
                modified = result.modified,
                "applied delete rule"
            );
            match rule.rule {
                DeleteRule::Nullify => outcome.nullified += result.modified,
                _ => outcome.pulled += result.modified,
            }
        }

        let hooks = self.engine.hooks();
        for record in &batch.records {
            hooks.send(Hook::PreRemove, &batch.class, record).await?;
        }

        let manager = self.manager(batch.class.clone());
        let collection = batch.class.collection();
        let filter = doc! { "_id": { "$in": ids } };
        let filter = &filter;
        let result = manager
            .run("remove", |db| async move { db.remove(collection, filter.clone()).await })
            .await?;
        if !result.ok {
            return Err(Error::OperationFailure(format!(
                "remove from {} was not acknowledged",
                collection
            )));
        }

        for record in &batch.records {
            hooks.send(Hook::PostRemove, &batch.class, record).await?;
        }
        Ok(result.removed)
    }
}

/// Keys of every record in the closure, per class key.
fn closure_ids(levels: &[Vec<Batch>]) -> HashMap<String, Vec<ObjectId>> {
    let mut closure: HashMap<String, Vec<ObjectId>> = HashMap::new();
    for batch in levels.iter().flatten() {
        closure
            .entry(batch.class.key().to_string())
            .or_default()
            .extend(batch.ids());
    }
    closure
}

/// Documents whose `field` references `ids`, excluding records that are
/// themselves being removed.
fn referencing_filter(field: &str, ids: &[ObjectId], removed: Option<&Vec<ObjectId>>) -> Document {
    let mut filter = doc! { field: { "$in": ids.to_vec() } };
    if let Some(removed) = removed.filter(|r| !r.is_empty()) {
        filter.insert("_id", doc! { "$nin": removed.clone() });
    }
    filter
}
