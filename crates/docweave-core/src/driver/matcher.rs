//! Filter evaluation for the in-memory driver.
//!
//! Evaluates mongo-style filter documents against stored documents. Field
//! paths may be dotted (`user.name`) and traverse arrays, in which case a
//! condition matches when any element satisfies it.

use std::cmp::Ordering;

use bson::{Bson, Document};

use super::{DriverError, DriverResult};

/// Evaluates filter documents against stored documents.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate a filter document against a document.
    ///
    /// Returns `true` if the document matches every clause.
    pub fn evaluate(filter: &Document, doc: &Document) -> DriverResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => {
                    let clauses = Self::clauses(key, condition)?;
                    let mut all = true;
                    for clause in clauses {
                        if !Self::evaluate(clause, doc)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "$or" => {
                    let clauses = Self::clauses(key, condition)?;
                    let mut any = false;
                    for clause in clauses {
                        if Self::evaluate(clause, doc)? {
                            any = true;
                            break;
                        }
                    }
                    any
                }
                "$nor" => {
                    let clauses = Self::clauses(key, condition)?;
                    let mut none = true;
                    for clause in clauses {
                        if Self::evaluate(clause, doc)? {
                            none = false;
                            break;
                        }
                    }
                    none
                }
                op if op.starts_with('$') => {
                    return Err(DriverError::InvalidQuery(format!(
                        "unknown top level operator {}",
                        op
                    )));
                }
                path => Self::evaluate_field(path, condition, doc)?,
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn clauses<'a>(key: &str, condition: &'a Bson) -> DriverResult<Vec<&'a Document>> {
        let array = condition
            .as_array()
            .ok_or_else(|| DriverError::InvalidQuery(format!("{} needs an array", key)))?;
        array
            .iter()
            .map(|c| {
                c.as_document().ok_or_else(|| {
                    DriverError::InvalidQuery(format!("{} entries must be documents", key))
                })
            })
            .collect()
    }

    /// Evaluate a condition on a single field path.
    fn evaluate_field(path: &str, condition: &Bson, doc: &Document) -> DriverResult<bool> {
        let values = lookup(doc, path);
        match condition {
            Bson::Document(ops) if is_operator_document(ops) => {
                for (op, operand) in ops {
                    if !Self::evaluate_operator(op, operand, &values)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            other => Ok(Self::matches_eq(&values, other)),
        }
    }

    fn evaluate_operator(op: &str, operand: &Bson, values: &[&Bson]) -> DriverResult<bool> {
        match op {
            "$eq" => Ok(Self::matches_eq(values, operand)),
            "$ne" => Ok(!Self::matches_eq(values, operand)),
            "$gt" => Ok(Self::matches_cmp(values, operand, Ordering::is_gt)),
            "$gte" => Ok(Self::matches_cmp(values, operand, Ordering::is_ge)),
            "$lt" => Ok(Self::matches_cmp(values, operand, Ordering::is_lt)),
            "$lte" => Ok(Self::matches_cmp(values, operand, Ordering::is_le)),
            "$in" => {
                let candidates = operand
                    .as_array()
                    .ok_or_else(|| DriverError::InvalidQuery("$in needs an array".into()))?;
                Ok(candidates.iter().any(|c| Self::matches_eq(values, c)))
            }
            "$nin" => {
                let candidates = operand
                    .as_array()
                    .ok_or_else(|| DriverError::InvalidQuery("$nin needs an array".into()))?;
                Ok(!candidates.iter().any(|c| Self::matches_eq(values, c)))
            }
            "$exists" => {
                let wanted = truthy(operand);
                Ok(values.is_empty() != wanted)
            }
            "$not" => {
                let inner = operand
                    .as_document()
                    .ok_or_else(|| DriverError::InvalidQuery("$not needs a document".into()))?;
                for (inner_op, inner_operand) in inner {
                    if !Self::evaluate_operator(inner_op, inner_operand, values)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            "$size" => {
                let wanted = operand
                    .as_i64()
                    .or_else(|| operand.as_i32().map(i64::from))
                    .ok_or_else(|| DriverError::InvalidQuery("$size needs an integer".into()))?;
                Ok(values.iter().any(|v| match v {
                    Bson::Array(items) => items.len() as i64 == wanted,
                    _ => false,
                }))
            }
            other => Err(DriverError::InvalidQuery(format!(
                "unknown operator {}",
                other
            ))),
        }
    }

    /// Equality with array-element semantics; `null` matches a missing field.
    fn matches_eq(values: &[&Bson], expected: &Bson) -> bool {
        if values.is_empty() {
            return matches!(expected, Bson::Null);
        }
        values.iter().any(|value| {
            if values_equal(value, expected) {
                return true;
            }
            match value {
                Bson::Array(items) => items.iter().any(|item| values_equal(item, expected)),
                _ => false,
            }
        })
    }

    fn matches_cmp(values: &[&Bson], operand: &Bson, accept: fn(Ordering) -> bool) -> bool {
        values.iter().any(|value| match value {
            Bson::Array(items) => items
                .iter()
                .any(|item| compare_values(item, operand).map(accept).unwrap_or(false)),
            other => compare_values(other, operand).map(accept).unwrap_or(false),
        })
    }
}

/// Whether every key of a document is an operator.
pub fn is_operator_document(doc: &Document) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

/// Interpret a projection or `$exists` operand as a boolean.
pub fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        Bson::Null => false,
        _ => true,
    }
}

/// Resolve a dotted path, descending into arrays of sub-documents.
///
/// Returns every value reached; an empty result means the path is missing.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut segments = path.split('.');
    let first = match segments.next() {
        Some(s) => s,
        None => return Vec::new(),
    };
    let mut current: Vec<&Bson> = doc.get(first).into_iter().collect();
    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            match value {
                Bson::Document(sub) => next.extend(sub.get(segment)),
                Bson::Array(items) => {
                    if let Ok(index) = segment.parse::<usize>() {
                        next.extend(items.get(index));
                    } else {
                        for item in items {
                            if let Bson::Document(sub) = item {
                                next.extend(sub.get(segment));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

/// Compare two values of the same type bracket.
///
/// Returns `None` for values that cannot be ordered against each other.
pub fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::Document(x), Bson::Document(y)) => {
            if x == y {
                Some(Ordering::Equal)
            } else {
                None
            }
        }
        (Bson::Array(x), Bson::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                match compare_values(left, right)? {
                    Ordering::Equal => continue,
                    unequal => return Some(unequal),
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        _ => {
            let x = as_number(a)?;
            let y = as_number(b)?;
            x.partial_cmp(&y)
        }
    }
}

/// Equality across numeric representations.
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

/// Rank of a value's type in the canonical sort order.
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 0,
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) | Some(Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::ObjectId(_)) => 5,
        Some(Bson::Boolean(_)) => 6,
        Some(Bson::DateTime(_)) => 7,
        Some(_) => 8,
    }
}

/// Total order used for sorting; missing values sort first.
pub fn compare_for_sort(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}
