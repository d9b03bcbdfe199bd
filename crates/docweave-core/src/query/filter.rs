//! Query and patch preprocessing.

use bson::{Bson, Document};

use crate::catalog::ObjectIdType;
use crate::error::Result;

const KEY_ALIASES: [&str; 2] = ["id", "pk"];

/// Rewrite key aliases in a query.
///
/// `id` and `pk` become `_id`, and key values given as hex strings are
/// coerced to object ids, including inside `$in`, `$nin`, `$eq` and `$ne`.
/// Logical operators are rewritten recursively.
pub fn process_query(query: Document) -> Result<Document> {
    let mut out = Document::new();
    for (key, value) in query {
        match key.as_str() {
            "$and" | "$or" | "$nor" => {
                let clauses = match value {
                    Bson::Array(clauses) => clauses
                        .into_iter()
                        .map(|clause| match clause {
                            Bson::Document(doc) => process_query(doc).map(Bson::Document),
                            other => Ok(other),
                        })
                        .collect::<Result<Vec<_>>>()?,
                    other => {
                        out.insert(key, other);
                        continue;
                    }
                };
                out.insert(key, Bson::Array(clauses));
            }
            k if k == "_id" || KEY_ALIASES.contains(&k) => {
                out.insert("_id", coerce_key(value)?);
            }
            _ => {
                out.insert(key, value);
            }
        }
    }
    Ok(out)
}

fn coerce_key(value: Bson) -> Result<Bson> {
    Ok(match value {
        Bson::String(_) => Bson::ObjectId(ObjectIdType::coerce(&value)?),
        Bson::Document(doc) => {
            let mut out = Document::new();
            for (op, operand) in doc {
                let operand = match (op.as_str(), operand) {
                    ("$in" | "$nin", Bson::Array(items)) => Bson::Array(
                        items
                            .into_iter()
                            .map(coerce_key)
                            .collect::<Result<Vec<_>>>()?,
                    ),
                    ("$eq" | "$ne", operand) => coerce_key(operand)?,
                    (_, operand) => operand,
                };
                out.insert(op, operand);
            }
            Bson::Document(out)
        }
        other => other,
    })
}

/// Flatten nested sub-documents into dotted keys.
///
/// Keys that already start with `$` and arrays are kept as they are.
pub fn flatten(doc: Document) -> Document {
    let mut out = Document::new();
    flatten_into(&mut out, "", doc);
    out
}

fn flatten_into(out: &mut Document, prefix: &str, doc: Document) {
    for (key, value) in doc {
        let path = if prefix.is_empty() {
            key
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Bson::Document(inner) if !inner.is_empty() && !path.starts_with('$') => {
                flatten_into(out, &path, inner)
            }
            other => {
                out.insert(path, other);
            }
        }
    }
}
