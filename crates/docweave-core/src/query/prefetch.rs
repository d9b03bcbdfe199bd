//! Batched resolution of reference paths.
//!
//! For each top-level segment of the requested paths, the keys referenced by
//! every loaded record are grouped per target class and fetched with a
//! single `$in` query. Remaining path suffixes are resolved by the manager
//! that loads the targets, so `event.user` costs one query per level.

use std::collections::HashMap;
use std::sync::Arc;

use bson::oid::ObjectId;
use futures::future::{try_join_all, BoxFuture};

use super::manager::Manager;
use crate::catalog::{FieldKind, RecordClass};
use crate::driver::Database;
use crate::engine::Engine;
use crate::error::Result;
use crate::record::Record;
use crate::transform::field::referenced;
use crate::value::{Reference, Value};

/// Paths grouped by their first segment, in request order.
fn group_paths(paths: &[String]) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for path in paths {
        let (head, suffix) = match path.split_once('.') {
            Some((head, suffix)) => (head, Some(suffix)),
            None => (path.as_str(), None),
        };
        let position = match groups.iter().position(|(h, _)| h == head) {
            Some(position) => position,
            None => {
                groups.push((head.to_string(), Vec::new()));
                groups.len() - 1
            }
        };
        if let Some(suffix) = suffix {
            if !suffix.is_empty() && !groups[position].1.iter().any(|s| s == suffix) {
                groups[position].1.push(suffix.to_string());
            }
        }
    }
    groups
}

/// Target class key of a reference held by a field.
fn target_key<'a>(kind: &'a FieldKind, reference: &'a Reference) -> Option<&'a str> {
    match kind.reference_target() {
        Some(target) => target.key(),
        None => reference.class_key(),
    }
}

struct Batch {
    field: String,
    class_key: String,
    suffixes: Vec<String>,
    ids: Vec<ObjectId>,
}

/// Replace reference keys in `records` with live records along `paths`.
///
/// Unknown and non-reference segments are skipped with a warning. Targets
/// that no longer exist stay as keys.
pub(crate) fn prefetch_related<'a>(
    engine: &'a Engine,
    db: &'a Database,
    class: &'a Arc<RecordClass>,
    records: &'a mut [Record],
    paths: &'a [String],
) -> BoxFuture<'a, Result<()>> {
    Box::pin(resolve_paths(engine, db, class, records, paths))
}

async fn resolve_paths(
    engine: &Engine,
    db: &Database,
    class: &Arc<RecordClass>,
    records: &mut [Record],
    paths: &[String],
) -> Result<()> {
    let mut batches: Vec<Batch> = Vec::new();
    for (head, suffixes) in group_paths(paths) {
        let field = match class.field(&head) {
            Some(field) if field.kind.is_reference() => field,
            Some(_) => {
                tracing::warn!(class = %class.key(), field = %head, "prefetch path is not a reference");
                continue;
            }
            None => {
                tracing::warn!(class = %class.key(), field = %head, "unknown prefetch path");
                continue;
            }
        };

        for record in records.iter() {
            let Some(value) = record.get(&head) else {
                continue;
            };
            for reference in referenced(value) {
                let (Some(id), Some(class_key)) = (reference.id(), target_key(&field.kind, reference))
                else {
                    continue;
                };
                let position = batches
                    .iter()
                    .position(|b| b.field == head && b.class_key == class_key);
                let batch = match position {
                    Some(position) => &mut batches[position],
                    None => {
                        batches.push(Batch {
                            field: head.clone(),
                            class_key: class_key.to_string(),
                            suffixes: suffixes.clone(),
                            ids: Vec::new(),
                        });
                        let last = batches.len() - 1;
                        &mut batches[last]
                    }
                };
                if !batch.ids.contains(&id) {
                    batch.ids.push(id);
                }
            }
        }
    }

    if batches.is_empty() {
        return Ok(());
    }

    let mut queries = Vec::with_capacity(batches.len());
    for batch in &batches {
        let target = engine.class(&batch.class_key)?;
        let manager = Manager::new(engine.clone(), target)
            .set_db(db.clone())
            .prefetch_related(batch.suffixes.iter().cloned());
        let cursor = manager.filter(bson::doc! { "_id": { "$in": batch.ids.clone() } })?;
        tracing::debug!(
            class = %class.key(),
            field = %batch.field,
            target = %batch.class_key,
            ids = batch.ids.len(),
            "prefetching references"
        );
        queries.push(cursor.all());
    }
    let fetched = try_join_all(queries).await?;

    let mut loaded: HashMap<(&str, &str, ObjectId), Record> = HashMap::new();
    for (batch, found) in batches.iter().zip(fetched) {
        for record in found {
            if let Some(id) = record.id() {
                loaded.insert((batch.field.as_str(), batch.class_key.as_str(), id), record);
            }
        }
    }

    let mut heads: Vec<&str> = batches.iter().map(|b| b.field.as_str()).collect();
    heads.dedup();
    for record in records.iter_mut() {
        for head in &heads {
            let Some(field) = class.field(head) else {
                continue;
            };
            if let Some(value) = record.get_mut(head) {
                splice(&field.kind, value, head, &loaded);
            }
        }
    }
    Ok(())
}

fn splice(
    kind: &FieldKind,
    value: &mut Value,
    field: &str,
    loaded: &HashMap<(&str, &str, ObjectId), Record>,
) {
    match value {
        Value::Reference(reference) => {
            let found = match (reference.id(), target_key(kind, reference)) {
                (Some(id), Some(class_key)) => loaded.get(&(field, class_key, id)),
                _ => None,
            };
            if let Some(record) = found {
                *reference = Reference::Live(Box::new(record.clone()));
            }
        }
        Value::List(items) => {
            for item in items {
                splice(kind, item, field, loaded);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_paths() {
        let paths: Vec<String> = ["event.user", "simple", "event.user", "event", "records.event.user"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            group_paths(&paths),
            vec![
                ("event".to_string(), vec!["user".to_string()]),
                ("simple".to_string(), vec![]),
                ("records".to_string(), vec!["event.user".to_string()]),
            ]
        );
    }
}
