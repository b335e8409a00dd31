//! Evaluation of native query and update documents over in-memory
//! documents. Covers the operator subset this crate emits.

use std::cmp::Ordering;

use bson::{Bson, DateTime, Document, oid::ObjectId};
use regex::RegexBuilder;

use crate::{Error, error::Result};

pub(crate) fn matches(document: &Document, query: &Document) -> Result<bool> {
    for (key, condition) in query {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            operator if operator.starts_with('$') => {
                return Err(Error::driver(format!("unsupported query operator {operator}")));
            }
            field => field_matches(document.get(field), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(operator: &str, condition: &'a Bson) -> Result<Vec<&'a Document>> {
    let Bson::Array(items) = condition else {
        return Err(Error::driver(format!("{operator} expects an array")));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            _ => Err(Error::driver(format!("{operator} expects documents"))),
        })
        .collect()
}

fn is_operator_document(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(document) if document.keys().next().is_some_and(|k| k.starts_with('$')) => {
            Some(document)
        }
        _ => None,
    }
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> Result<bool> {
    let Some(operators) = is_operator_document(condition) else {
        return Ok(equals(value, condition));
    };

    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => compare(value, operand).is_some_and(Ordering::is_gt),
            "$gte" => compare(value, operand).is_some_and(Ordering::is_ge),
            "$lt" => compare(value, operand).is_some_and(Ordering::is_lt),
            "$lte" => compare(value, operand).is_some_and(Ordering::is_le),
            "$in" => members(operator, operand)?.iter().any(|item| equals(value, item)),
            "$nin" => !members(operator, operand)?.iter().any(|item| equals(value, item)),
            "$exists" => value.is_some() == truthy(operand),
            "$type" => type_matches(value, operand)?,
            "$regex" => {
                let options = operators.get_str("$options").unwrap_or_default();
                regex_matches(value, operand, options)?
            }
            "$options" => true,
            "$not" => !field_matches(value, operand)?,
            _ => return Err(Error::driver(format!("unsupported query operator {operator}"))),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn members<'a>(operator: &str, operand: &'a Bson) -> Result<&'a Vec<Bson>> {
    match operand {
        Bson::Array(items) => Ok(items),
        _ => Err(Error::driver(format!("{operator} expects an array"))),
    }
}

fn truthy(operand: &Bson) -> bool {
    match operand {
        Bson::Boolean(value) => *value,
        Bson::Null => false,
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Double(value) => *value != 0.0,
        _ => true,
    }
}

/// Missing matches null; an array matches when any element does.
fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    match (value, expected) {
        (None, Bson::Null) => true,
        (None, _) => false,
        (Some(Bson::Array(items)), expected) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| same(item, expected))
        }
        (Some(value), expected) => same(value, expected),
    }
}

fn same(left: &Bson, right: &Bson) -> bool {
    match (number(left), number(right)) {
        (Some(left), Some(right)) => left == right,
        _ => left == right,
    }
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(f64::from(*value)),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

/// Comparison within one type bracket; values of different brackets never
/// compare.
fn compare(value: Option<&Bson>, operand: &Bson) -> Option<Ordering> {
    let value = value?;
    if let Bson::Array(items) = value {
        return items.iter().find_map(|item| compare_same_bracket(item, operand));
    }
    compare_same_bracket(value, operand)
}

fn compare_same_bracket(left: &Bson, right: &Bson) -> Option<Ordering> {
    if type_rank(Some(left)) != type_rank(Some(right)) {
        return None;
    }
    Some(order(Some(left), Some(right)))
}

// BSON comparison order: missing/null, numbers, strings, documents, arrays,
// object ids, booleans, dates.
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 0,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => 1,
        Some(Bson::String(_) | Bson::Symbol(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::Binary(_)) => 5,
        Some(Bson::ObjectId(_)) => 6,
        Some(Bson::Boolean(_)) => 7,
        Some(Bson::DateTime(_)) => 8,
        Some(Bson::Timestamp(_)) => 9,
        Some(Bson::RegularExpression(_)) => 10,
        Some(_) => 11,
    }
}

/// Total order used for sorting.
pub(crate) fn order(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let rank = type_rank(left).cmp(&type_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }
    match (left, right) {
        (Some(left), Some(right)) => match (left, right) {
            (Bson::String(left), Bson::String(right)) => left.cmp(right),
            (Bson::ObjectId(left), Bson::ObjectId(right)) => left.bytes().cmp(&right.bytes()),
            (Bson::Boolean(left), Bson::Boolean(right)) => left.cmp(right),
            (Bson::DateTime(left), Bson::DateTime(right)) => left.cmp(right),
            (Bson::Array(left), Bson::Array(right)) => left
                .iter()
                .zip(right.iter())
                .map(|(left, right)| order(Some(left), Some(right)))
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| left.len().cmp(&right.len())),
            _ => match (number(left), number(right)) {
                (Some(left), Some(right)) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            },
        },
        _ => Ordering::Equal,
    }
}

fn type_matches(value: Option<&Bson>, operand: &Bson) -> Result<bool> {
    let Some(value) = value else {
        return Ok(false);
    };
    let alias = match operand {
        Bson::String(alias) => alias.as_str(),
        Bson::Int32(code) => code_alias(i64::from(*code))?,
        Bson::Int64(code) => code_alias(*code)?,
        Bson::Double(code) => code_alias(*code as i64)?,
        _ => return Err(Error::driver("$type expects an alias or a code")),
    };
    Ok(match alias {
        "double" => matches!(value, Bson::Double(_)),
        "string" => matches!(value, Bson::String(_)),
        "object" => matches!(value, Bson::Document(_)),
        "array" => matches!(value, Bson::Array(_)),
        "objectId" => matches!(value, Bson::ObjectId(_)),
        "bool" => matches!(value, Bson::Boolean(_)),
        "date" => matches!(value, Bson::DateTime(_)),
        "null" => matches!(value, Bson::Null),
        "int" => matches!(value, Bson::Int32(_)),
        "long" => matches!(value, Bson::Int64(_)),
        "number" => number(value).is_some(),
        other => return Err(Error::driver(format!("unsupported $type {other}"))),
    })
}

fn code_alias(code: i64) -> Result<&'static str> {
    Ok(match code {
        1 => "double",
        2 => "string",
        3 => "object",
        4 => "array",
        7 => "objectId",
        8 => "bool",
        9 => "date",
        10 => "null",
        16 => "int",
        18 => "long",
        _ => return Err(Error::driver(format!("unsupported $type code {code}"))),
    })
}

fn regex_matches(value: Option<&Bson>, pattern: &Bson, options: &str) -> Result<bool> {
    let (pattern, options) = match pattern {
        Bson::String(pattern) => (pattern.as_str(), options),
        Bson::RegularExpression(regex) => (regex.pattern.as_str(), regex.options.as_str()),
        _ => return Err(Error::driver("$regex expects a string")),
    };
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| Error::Driver(Box::new(e)))?;
    Ok(match value {
        Some(Bson::String(text)) => regex.is_match(text),
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Bson::String(text) if regex.is_match(text))),
        _ => false,
    })
}

/// Orders two documents by a sort specification; a negative direction sorts
/// that key descending.
pub(crate) fn compare_documents(left: &Document, right: &Document, sort: &Document) -> Ordering {
    for (field, direction) in sort {
        let ordering = order(left.get(field), right.get(field));
        let ordering = if number(direction).is_some_and(|d| d < 0.0) {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering.is_ne() {
            return ordering;
        }
    }
    Ordering::Equal
}

pub(crate) fn sort(documents: &mut [Document], sort: &Document) {
    documents.sort_by(|left, right| compare_documents(left, right, sort));
}

pub(crate) fn project(document: Document, projection: &Document) -> Document {
    let include = projection
        .iter()
        .filter(|(field, _)| field.as_str() != "_id")
        .any(|(_, flag)| truthy(flag));
    let keep_id = projection.get("_id").is_none_or(truthy);

    if include {
        document
            .into_iter()
            .filter(|(field, _)| {
                if field == "_id" {
                    keep_id
                } else {
                    projection.get(field).is_some_and(truthy)
                }
            })
            .collect()
    } else {
        document
            .into_iter()
            .filter(|(field, _)| {
                if field == "_id" {
                    keep_id
                } else {
                    projection.get(field).is_none_or(truthy)
                }
            })
            .collect()
    }
}

/// Seed for an upsert that inserts: equality conditions of the query.
pub(crate) fn upsert_seed(query: &Document) -> Document {
    let mut seed = Document::new();
    for (key, condition) in query {
        if key == "$and" {
            if let Bson::Array(items) = condition {
                for item in items {
                    if let Bson::Document(clause) = item {
                        for (field, value) in upsert_seed(clause) {
                            seed.insert(field, value);
                        }
                    }
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }
        match is_operator_document(condition) {
            Some(operators) => {
                if let Some(value) = operators.get("$eq") {
                    seed.insert(key.clone(), value.clone());
                }
            }
            None => {
                seed.insert(key.clone(), condition.clone());
            }
        }
    }
    seed
}

/// Applies an operator update in place.
pub(crate) fn apply_update(
    document: &mut Document,
    update: &Document,
    inserting: bool,
    now: DateTime,
) -> Result<()> {
    for (operator, operand) in update {
        let Bson::Document(bucket) = operand else {
            return Err(Error::driver(format!("{operator} expects a document")));
        };
        match operator.as_str() {
            "$set" => {
                for (field, value) in bucket {
                    document.insert(field.clone(), value.clone());
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (field, value) in bucket {
                        document.insert(field.clone(), value.clone());
                    }
                }
            }
            "$unset" => {
                for field in bucket.keys() {
                    document.remove(field);
                }
            }
            "$inc" => {
                for (field, amount) in bucket {
                    let incremented = increment(field, document.get(field), amount)?;
                    document.insert(field.clone(), incremented);
                }
            }
            "$currentDate" => {
                for field in bucket.keys() {
                    document.insert(field.clone(), now);
                }
            }
            "$rename" => {
                for (source, target) in bucket {
                    let Bson::String(target) = target else {
                        return Err(Error::driver("$rename expects string targets"));
                    };
                    if let Some(value) = document.remove(source) {
                        document.insert(target.clone(), value);
                    }
                }
            }
            _ => return Err(Error::driver(format!("unsupported update operator {operator}"))),
        }
    }
    Ok(())
}

/// `$inc` arithmetic. An int32 sum that overflows widens to int64; an int64
/// overflow is an error.
fn increment(field: &str, current: Option<&Bson>, amount: &Bson) -> Result<Bson> {
    let overflow = || Error::driver(format!("$inc on {field} overflows int64"));
    Ok(match (current, amount) {
        (None, amount) if number(amount).is_some() => amount.clone(),
        (Some(Bson::Int32(value)), Bson::Int32(amount)) => match value.checked_add(*amount) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(i64::from(*value) + i64::from(*amount)),
        },
        (Some(Bson::Int32(value)), Bson::Int64(amount)) => {
            Bson::Int64(i64::from(*value).checked_add(*amount).ok_or_else(overflow)?)
        }
        (Some(Bson::Int64(value)), Bson::Int32(amount)) => {
            Bson::Int64(value.checked_add(i64::from(*amount)).ok_or_else(overflow)?)
        }
        (Some(Bson::Int64(value)), Bson::Int64(amount)) => {
            Bson::Int64(value.checked_add(*amount).ok_or_else(overflow)?)
        }
        (current, amount) => match (current.and_then(number), number(amount)) {
            (Some(value), Some(amount)) => Bson::Double(value + amount),
            _ => {
                return Err(Error::driver(format!(
                    "cannot apply $inc with {amount} to non-numeric field {field}"
                )));
            }
        },
    })
}

pub(crate) fn ensure_id(document: &mut Document) -> Bson {
    match document.get("_id") {
        Some(id) => id.clone(),
        None => {
            let id = Bson::ObjectId(ObjectId::new());
            document.insert("_id", id.clone());
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn visibility_predicate_semantics() {
        let predicate = doc! { "deleted": { "$not": { "$type": "date" } } };
        assert!(matches(&doc! { "name": "a" }, &predicate).unwrap());
        assert!(matches(&doc! { "deleted": null }, &predicate).unwrap());
        assert!(!matches(&doc! { "deleted": DateTime::now() }, &predicate).unwrap());
    }

    #[test]
    fn comparison_respects_type_brackets() {
        let document = doc! { "age": 30, "name": "bob", "tags": ["a", "b"] };
        assert!(matches(&document, &doc! { "age": { "$gte": 30.0, "$lt": 31 } }).unwrap());
        assert!(!matches(&document, &doc! { "age": { "$gt": "10" } }).unwrap());
        assert!(matches(&document, &doc! { "tags": { "$eq": "b" } }).unwrap());
        assert!(matches(&document, &doc! { "missing": { "$eq": null } }).unwrap());
        assert!(
            matches(
                &document,
                &doc! { "$or": [{ "name": { "$regex": "^B", "$options": "i" } }, { "age": 1 }] }
            )
            .unwrap()
        );
        assert!(matches(&document, &doc! { "$nor": [{ "age": { "$in": [1, 2] } }] }).unwrap());
    }

    #[test]
    fn update_operators_apply() {
        let now = DateTime::from_millis(42);
        let mut document = doc! { "_id": 1, "count": 1, "old": "x" };
        apply_update(
            &mut document,
            &doc! {
                "$inc": { "count": 2 },
                "$currentDate": { "modified": true },
                "$setOnInsert": { "created": now },
                "$rename": { "old": "new" },
            },
            false,
            now,
        )
        .unwrap();
        assert_eq!(document, doc! { "_id": 1, "count": 3, "modified": now, "new": "x" });
    }

    #[test]
    fn inc_widens_int32_and_rejects_int64_overflow() {
        let now = DateTime::from_millis(0);
        let mut document = doc! { "_id": 1, "n": i32::MAX, "m": 5 };
        apply_update(&mut document, &doc! { "$inc": { "n": 1, "m": 2 } }, false, now).unwrap();
        assert_eq!(document.get("n"), Some(&Bson::Int64(i64::from(i32::MAX) + 1)));
        assert_eq!(document.get("m"), Some(&Bson::Int32(7)));

        let mut document = doc! { "_id": 1, "n": i64::MAX };
        let err = apply_update(&mut document, &doc! { "$inc": { "n": 1 } }, false, now);
        assert!(matches!(err, Err(Error::Driver(_))));
        assert_eq!(document.get("n"), Some(&Bson::Int64(i64::MAX)));

        let mut document = doc! { "_id": 1, "n": i32::MIN };
        apply_update(&mut document, &doc! { "$inc": { "n": i64::MIN } }, false, now)
            .unwrap_err();
    }

    #[test]
    fn inc_rejects_non_numeric_operands() {
        let now = DateTime::from_millis(0);
        let mut document = doc! { "name": "x" };
        assert!(apply_update(&mut document, &doc! { "$inc": { "name": 1 } }, false, now).is_err());
        assert!(apply_update(&mut document, &doc! { "$inc": { "n": "1" } }, false, now).is_err());
    }

    #[test]
    fn sort_orders_by_each_key_in_turn() {
        let mut documents = vec![
            doc! { "a": 1, "b": "x" },
            doc! { "a": 2, "b": "y" },
            doc! { "a": 1, "b": "z" },
        ];
        sort(&mut documents, &doc! { "a": -1, "b": 1.0 });
        let keys: Vec<_> = documents
            .iter()
            .map(|document| document.get_str("b").unwrap())
            .collect();
        assert_eq!(keys, ["y", "x", "z"]);
    }

    #[test]
    fn upsert_seed_takes_equalities() {
        let seed = upsert_seed(&doc! {
            "$and": [{ "name": { "$eq": "pump" } }, { "deleted": { "$not": { "$type": "date" } } }]
        });
        assert_eq!(seed, doc! { "name": "pump" });
    }

    #[test]
    fn projection_modes() {
        let document = doc! { "_id": 1, "name": "a", "secret": "b" };
        assert_eq!(
            project(document.clone(), &doc! { "name": 1 }),
            doc! { "_id": 1, "name": "a" }
        );
        assert_eq!(
            project(document, &doc! { "secret": 0 }),
            doc! { "_id": 1, "name": "a" }
        );
    }
}
