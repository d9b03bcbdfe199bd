//! Update operators for the in-memory driver.

use bson::{Bson, Document};

use super::matcher::{is_operator_document, values_equal, FilterEvaluator};
use super::{DriverError, DriverResult};

/// Whether an update document replaces the whole document.
pub fn is_replacement(update: &Document) -> bool {
    !update.keys().any(|k| k.starts_with('$'))
}

/// Apply an update document in place.
///
/// Returns `true` if the document changed. A replacement keeps the
/// original `_id`.
pub fn apply_update(doc: &mut Document, update: &Document) -> DriverResult<bool> {
    let before = doc.clone();

    if is_replacement(update) {
        let id = doc.get("_id").cloned();
        let mut replaced = Document::new();
        if let Some(id) = id {
            replaced.insert("_id", id);
        }
        for (key, value) in update {
            if key != "_id" {
                replaced.insert(key.clone(), value.clone());
            }
        }
        *doc = replaced;
        return Ok(*doc != before);
    }

    for (op, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| DriverError::InvalidQuery(format!("{} needs a document", op)))?;
        for (path, operand) in fields {
            if path == "_id" && op != "$setOnInsert" {
                return Err(DriverError::Operation {
                    code: 66,
                    message: "the _id field is immutable".into(),
                });
            }
            match op.as_str() {
                "$set" | "$setOnInsert" => set_path(doc, path, operand.clone())?,
                "$unset" => {
                    remove_path(doc, path);
                }
                "$inc" => increment(doc, path, operand)?,
                "$push" => {
                    let values = each_values(operand);
                    let items = array_at(doc, path)?;
                    items.extend(values);
                }
                "$addToSet" => {
                    let values = each_values(operand);
                    let items = array_at(doc, path)?;
                    for value in values {
                        if !items.iter().any(|item| values_equal(item, &value)) {
                            items.push(value);
                        }
                    }
                }
                "$pull" => {
                    if let Some(Bson::Array(items)) = get_path_mut(doc, path) {
                        let mut kept = Vec::with_capacity(items.len());
                        for item in items.drain(..) {
                            if !pull_matches(&item, operand)? {
                                kept.push(item);
                            }
                        }
                        *items = kept;
                    }
                }
                "$pullAll" => {
                    let removed = operand.as_array().ok_or_else(|| {
                        DriverError::InvalidQuery("$pullAll needs an array".into())
                    })?;
                    if let Some(Bson::Array(items)) = get_path_mut(doc, path) {
                        items.retain(|item| !removed.iter().any(|r| values_equal(item, r)));
                    }
                }
                other => {
                    return Err(DriverError::InvalidQuery(format!(
                        "unknown update operator {}",
                        other
                    )))
                }
            }
        }
    }

    Ok(*doc != before)
}

/// Build the document inserted by an upsert from the equality clauses of its filter.
pub fn upsert_seed(filter: &Document) -> Document {
    let mut seed = Document::new();
    for (key, value) in filter {
        if key.starts_with('$') {
            continue;
        }
        match value {
            Bson::Document(ops) if is_operator_document(ops) => {
                if let Some(eq) = ops.get("$eq") {
                    let _ = set_path(&mut seed, key, eq.clone());
                }
            }
            other => {
                let _ = set_path(&mut seed, key, other.clone());
            }
        }
    }
    seed
}

/// Whether an array element is removed by a `$pull` condition.
fn pull_matches(item: &Bson, condition: &Bson) -> DriverResult<bool> {
    match condition {
        Bson::Document(ops) if is_operator_document(ops) => {
            let mut wrapper = Document::new();
            wrapper.insert("v", item.clone());
            let mut filter = Document::new();
            filter.insert("v", condition.clone());
            FilterEvaluator::evaluate(&filter, &wrapper)
        }
        Bson::Document(sub) => match item {
            Bson::Document(item) => FilterEvaluator::evaluate(sub, item),
            _ => Ok(false),
        },
        other => Ok(values_equal(item, other)),
    }
}

fn each_values(operand: &Bson) -> Vec<Bson> {
    if let Bson::Document(ops) = operand {
        if let Some(Bson::Array(each)) = ops.get("$each") {
            return each.clone();
        }
    }
    vec![operand.clone()]
}

fn increment(doc: &mut Document, path: &str, by: &Bson) -> DriverResult<()> {
    let current = get_path_mut(doc, path).map(|v| v.clone());
    let next = match (current, by) {
        (None, by) => by.clone(),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => Bson::Int32(a + b),
        (Some(Bson::Int32(a)), Bson::Int64(b)) => Bson::Int64(i64::from(a) + b),
        (Some(Bson::Int64(a)), Bson::Int32(b)) => Bson::Int64(a + i64::from(*b)),
        (Some(Bson::Int64(a)), Bson::Int64(b)) => Bson::Int64(a + b),
        (Some(a), b) => match (number(&a), number(b)) {
            (Some(x), Some(y)) => Bson::Double(x + y),
            _ => {
                return Err(DriverError::Operation {
                    code: 14,
                    message: format!("cannot apply $inc to non-numeric field {}", path),
                })
            }
        },
    };
    set_path(doc, path, next)
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

fn array_at<'a>(doc: &'a mut Document, path: &str) -> DriverResult<&'a mut Vec<Bson>> {
    if get_path_mut(doc, path).is_none() {
        set_path(doc, path, Bson::Array(Vec::new()))?;
    }
    match get_path_mut(doc, path) {
        Some(Bson::Array(items)) => Ok(items),
        _ => Err(DriverError::Operation {
            code: 2,
            message: format!("field {} is not an array", path),
        }),
    }
}

/// Mutable access to the value at a dotted path.
pub fn get_path_mut<'a>(doc: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get_mut(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(sub) => sub.get_mut(segment)?,
            Bson::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set the value at a dotted path, creating intermediate documents.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) -> DriverResult<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !doc.contains_key(head) {
                doc.insert(head, Document::new());
            }
            match doc.get_mut(head) {
                Some(Bson::Document(sub)) => set_path(sub, rest, value),
                Some(Bson::Array(items)) => {
                    let (index, tail) = match rest.split_once('.') {
                        Some((index, tail)) => (index, Some(tail)),
                        None => (rest, None),
                    };
                    let slot = index
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| items.get_mut(i))
                        .ok_or_else(|| DriverError::Operation {
                            code: 28,
                            message: format!("cannot create field in array at {}", path),
                        })?;
                    match (tail, slot) {
                        (None, slot) => {
                            *slot = value;
                            Ok(())
                        }
                        (Some(tail), Bson::Document(sub)) => set_path(sub, tail, value),
                        (Some(_), _) => Err(DriverError::Operation {
                            code: 28,
                            message: format!("cannot traverse {}", path),
                        }),
                    }
                }
                _ => Err(DriverError::Operation {
                    code: 28,
                    message: format!("cannot create field {} in a non-document", path),
                }),
            }
        }
    }
}

/// Remove the value at a dotted path. Returns the removed value.
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Bson> {
    match path.rsplit_once('.') {
        None => doc.remove(path),
        Some((parent, leaf)) => match get_path_mut(doc, parent)? {
            Bson::Document(sub) => sub.remove(leaf),
            _ => None,
        },
    }
}
