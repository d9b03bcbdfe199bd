//! Sorting, projection and aggregation stages for the in-memory driver.

use bson::{Bson, Document};

use super::matcher::{compare_for_sort, lookup, truthy, FilterEvaluator};
use super::update::{remove_path, set_path};
use super::{DriverError, DriverResult, SortOrder};

/// Sort documents in place by a list of keys.
pub fn sort_documents(docs: &mut [Document], keys: &[(String, SortOrder)]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (field, order) in keys {
            let left = lookup(a, field).into_iter().next();
            let right = lookup(b, field).into_iter().next();
            let ordering = compare_for_sort(left, right);
            let ordering = match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            if ordering.is_ne() {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Parse a sort specification document (`{field: 1, other: -1}`).
pub fn parse_sort(spec: &Document) -> DriverResult<Vec<(String, SortOrder)>> {
    spec.iter()
        .map(|(field, direction)| {
            let order = match as_i64(direction) {
                Some(1) => SortOrder::Asc,
                Some(-1) => SortOrder::Desc,
                _ => {
                    return Err(DriverError::InvalidQuery(format!(
                        "invalid sort direction for {}",
                        field
                    )))
                }
            };
            Ok((field.clone(), order))
        })
        .collect()
}

/// Apply an inclusion or exclusion projection.
///
/// `_id` is kept unless explicitly excluded. Inclusion values that are
/// `"$path"` strings copy the referenced field under the new name.
pub fn apply_projection(doc: &Document, projection: &Document) -> DriverResult<Document> {
    let inclusive = projection
        .iter()
        .any(|(k, v)| k != "_id" && (truthy(v) || matches!(v, Bson::String(_))));

    if !inclusive {
        let mut out = doc.clone();
        for (path, flag) in projection {
            if !truthy(flag) {
                remove_path(&mut out, path);
            }
        }
        return Ok(out);
    }

    let mut out = Document::new();
    let keep_id = projection.get("_id").map(truthy).unwrap_or(true);
    if keep_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
    }
    for (path, spec) in projection {
        if path == "_id" {
            continue;
        }
        let source = match spec {
            Bson::String(reference) => match reference.strip_prefix('$') {
                Some(source) => source,
                None => {
                    set_path(&mut out, path, spec.clone())?;
                    continue;
                }
            },
            flag if truthy(flag) => path.as_str(),
            _ => {
                return Err(DriverError::InvalidQuery(format!(
                    "cannot mix inclusion and exclusion at {}",
                    path
                )))
            }
        };
        if let Some(value) = single_value(doc, source) {
            set_path(&mut out, path, value)?;
        }
    }
    Ok(out)
}

/// Run an aggregation pipeline over a collection snapshot.
pub fn run_pipeline(mut docs: Vec<Document>, pipeline: &[Document]) -> DriverResult<Vec<Document>> {
    for stage in pipeline {
        let (name, spec) = match stage.iter().next() {
            Some(entry) if stage.len() == 1 => entry,
            _ => {
                return Err(DriverError::InvalidQuery(
                    "a pipeline stage must have exactly one key".into(),
                ))
            }
        };
        docs = match name.as_str() {
            "$match" => {
                let filter = stage_document(name, spec)?;
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if FilterEvaluator::evaluate(filter, &doc)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$project" => {
                let projection = stage_document(name, spec)?;
                docs.iter()
                    .map(|doc| apply_projection(doc, projection))
                    .collect::<DriverResult<_>>()?
            }
            "$unwind" => unwind(docs, spec)?,
            "$sort" => {
                let keys = parse_sort(stage_document(name, spec)?)?;
                sort_documents(&mut docs, &keys);
                docs
            }
            "$skip" => {
                let n = stage_count(name, spec)?;
                docs.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = stage_count(name, spec)?;
                docs.into_iter().take(n).collect()
            }
            "$count" => {
                let field = spec.as_str().ok_or_else(|| {
                    DriverError::InvalidQuery("$count needs a field name".into())
                })?;
                if docs.is_empty() {
                    Vec::new()
                } else {
                    let mut counted = Document::new();
                    counted.insert(field, docs.len() as i64);
                    vec![counted]
                }
            }
            other => {
                return Err(DriverError::Operation {
                    code: 40324,
                    message: format!("unrecognized pipeline stage name: '{}'", other),
                })
            }
        };
    }
    Ok(docs)
}

fn unwind(docs: Vec<Document>, spec: &Bson) -> DriverResult<Vec<Document>> {
    let (reference, preserve) = match spec {
        Bson::String(path) => (path.as_str(), false),
        Bson::Document(options) => {
            let path = options.get_str("path").map_err(|_| {
                DriverError::InvalidQuery("$unwind needs a path".into())
            })?;
            let preserve = options
                .get("preserveNullAndEmptyArrays")
                .map(truthy)
                .unwrap_or(false);
            (path, preserve)
        }
        _ => return Err(DriverError::InvalidQuery("invalid $unwind".into())),
    };
    let path = reference
        .strip_prefix('$')
        .ok_or_else(|| DriverError::InvalidQuery("$unwind path must start with $".into()))?;

    let mut out = Vec::new();
    for doc in docs {
        match single_value(&doc, path) {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = doc.clone();
                    set_path(&mut copy, path, item)?;
                    out.push(copy);
                }
            }
            Some(Bson::Array(_)) | Some(Bson::Null) | None => {
                if preserve {
                    out.push(doc);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}

fn single_value(doc: &Document, path: &str) -> Option<Bson> {
    let values = lookup(doc, path);
    match values.len() {
        0 => None,
        1 => Some(values[0].clone()),
        _ => Some(Bson::Array(values.into_iter().cloned().collect())),
    }
}

fn stage_document<'a>(name: &str, spec: &'a Bson) -> DriverResult<&'a Document> {
    spec.as_document()
        .ok_or_else(|| DriverError::InvalidQuery(format!("{} needs a document", name)))
}

fn stage_count(name: &str, spec: &Bson) -> DriverResult<usize> {
    as_i64(spec)
        .filter(|n| *n >= 0)
        .map(|n| n as usize)
        .ok_or_else(|| DriverError::InvalidQuery(format!("{} needs a non-negative integer", name)))
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        Bson::Double(f) if f.fract() == 0.0 => Some(*f as i64),
        _ => None,
    }
}
