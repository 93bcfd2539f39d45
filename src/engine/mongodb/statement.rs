//! Shell-style `MongoDB` statement parsing
//!
//! Statements take the form `db.<collection>.<operation>(<args>)`, optionally
//! followed by cursor modifiers for `find`:
//!
//! ```text
//! db.orders.find({"status": "shipped"}, {"total": 1}).sort({"total": -1}).limit(5)
//! db.orders.aggregate([{"$group": {"_id": "$status", "n": {"$sum": 1}}}])
//! db.orders.countDocuments({"status": "shipped"})
//! db.orders.distinct("status")
//! db.getCollection("order.items").findOne({"sku": "A-1"})
//! ```
//!
//! Arguments are strict JSON (extended JSON wrappers such as `{"$oid": ...}`
//! and `{"$date": ...}` are accepted). Parse failures are statement errors so
//! the completion engine gets a chance to correct them.

use mongodb::bson::{Bson, Document};
use serde_json::Value;

use crate::error::{NlQueryError, Result};

/// Operation to run against a collection
#[derive(Debug, Clone, PartialEq)]
pub enum MongoOperation {
    Find {
        filter: Document,
        projection: Option<Document>,
        sort: Option<Document>,
        limit: Option<i64>,
        skip: Option<u64>,
    },
    FindOne {
        filter: Document,
        projection: Option<Document>,
    },
    Aggregate {
        pipeline: Vec<Document>,
    },
    CountDocuments {
        filter: Document,
    },
    Distinct {
        field: String,
        filter: Document,
    },
}

/// A parsed statement
#[derive(Debug, Clone, PartialEq)]
pub struct MongoStatement {
    pub collection: String,
    pub operation: MongoOperation,
}

/// One `name(args)` segment of a call chain
#[derive(Debug)]
struct Call<'a> {
    name: &'a str,
    args: Vec<Value>,
}

fn malformed(detail: impl std::fmt::Display) -> NlQueryError {
    NlQueryError::statement(format!("Malformed MongoDB statement: {detail}"))
}

/// Parse a shell-style statement
pub fn parse(statement: &str) -> Result<MongoStatement> {
    let trimmed = statement.trim();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    let rest = trimmed
        .strip_prefix("db.")
        .ok_or_else(|| malformed("expected a statement starting with 'db.'"))?;

    let (collection, rest) = if let Some(after) = rest.strip_prefix("getCollection") {
        let (call, rest) = next_call("getCollection", after)?;
        let collection = match call.args.as_slice() {
            [Value::String(name)] => name.clone(),
            _ => return Err(malformed("getCollection expects a single string argument")),
        };
        let rest = rest
            .strip_prefix('.')
            .ok_or_else(|| malformed("expected an operation after getCollection(...)"))?;
        (collection, rest)
    } else {
        // Collection names may contain dots; the operation is the last segment before '('
        let open = rest.find('(').ok_or_else(|| malformed("missing '(' after operation"))?;
        let dot = rest[..open]
            .rfind('.')
            .ok_or_else(|| malformed("expected db.<collection>.<operation>(...)"))?;
        (rest[..dot].to_string(), &rest[dot + 1..])
    };

    if collection.is_empty() {
        return Err(malformed("collection name is empty"));
    }

    let calls = parse_chain(rest)?;
    let (head, modifiers) = calls.split_first().ok_or_else(|| malformed("missing operation"))?;
    let operation = build_operation(head, modifiers)?;

    Ok(MongoStatement { collection, operation })
}

/// Split `op(args).mod(args)...` into calls
fn parse_chain(input: &str) -> Result<Vec<Call<'_>>> {
    let mut calls = Vec::new();
    let mut rest = input;

    loop {
        let open = rest.find('(').ok_or_else(|| malformed(format!("expected '(' in '{rest}'")))?;
        let name = rest[..open].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(malformed(format!("invalid method name '{name}'")));
        }

        let (call, after) = next_call(name, &rest[open..])?;
        calls.push(call);

        let after = after.trim_start();
        if after.is_empty() {
            return Ok(calls);
        }
        rest = after
            .strip_prefix('.')
            .ok_or_else(|| malformed(format!("unexpected trailing text '{after}'")))?;
    }
}

/// Parse `(args)` at the start of `input`, returning the call and the remainder
fn next_call<'a>(name: &'a str, input: &'a str) -> Result<(Call<'a>, &'a str)> {
    let input = input.trim_start();
    if !input.starts_with('(') {
        return Err(malformed(format!("expected '(' after '{name}'")));
    }

    let close = matching_paren(input).ok_or_else(|| malformed(format!("unbalanced parentheses in '{name}(...)'")))?;
    let inner = input[1..close].trim();

    let args = if inner.is_empty() {
        Vec::new()
    } else {
        serde_json::from_str::<Vec<Value>>(&format!("[{inner}]"))
            .map_err(|e| malformed(format!("arguments of '{name}' are not valid JSON: {e}")))?
    };

    Ok((Call { name, args }, &input[close + 1..]))
}

/// Byte index of the ')' closing the '(' at index 0, skipping string literals
fn matching_paren(input: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in input.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }

    None
}

fn build_operation(head: &Call<'_>, modifiers: &[Call<'_>]) -> Result<MongoOperation> {
    let args = head.args.as_slice();

    let operation = match head.name {
        "find" => {
            let (filter, projection) = filter_and_projection(head.name, args)?;
            let mut sort = None;
            let mut limit = None;
            let mut skip = None;
            for modifier in modifiers {
                match (modifier.name, modifier.args.as_slice()) {
                    ("sort", [keys]) => sort = Some(to_document(keys.clone(), "sort")?),
                    ("limit", [n]) => limit = Some(to_count(n, "limit")?),
                    ("skip", [n]) => skip = Some(to_count(n, "skip")?.unsigned_abs()),
                    ("toArray", []) => {}
                    (name, _) => return Err(malformed(format!("unsupported cursor modifier '{name}'"))),
                }
            }
            return Ok(MongoOperation::Find { filter, projection, sort, limit, skip });
        }
        "findOne" => {
            let (filter, projection) = filter_and_projection(head.name, args)?;
            MongoOperation::FindOne { filter, projection }
        }
        "aggregate" => {
            let pipeline = match args {
                [Value::Array(stages)] => stages
                    .iter()
                    .map(|stage| to_document(stage.clone(), "pipeline stage"))
                    .collect::<Result<Vec<_>>>()?,
                _ => return Err(malformed("aggregate expects a single pipeline array")),
            };
            MongoOperation::Aggregate { pipeline }
        }
        "countDocuments" => {
            let filter = match args {
                [] => Document::new(),
                [filter] => to_document(filter.clone(), "filter")?,
                _ => return Err(malformed("countDocuments expects at most one filter")),
            };
            MongoOperation::CountDocuments { filter }
        }
        "distinct" => {
            let (field, filter) = match args {
                [Value::String(field)] => (field.clone(), Document::new()),
                [Value::String(field), filter] => (field.clone(), to_document(filter.clone(), "filter")?),
                _ => return Err(malformed("distinct expects a field name and an optional filter")),
            };
            MongoOperation::Distinct { field, filter }
        }
        other => return Err(malformed(format!("unsupported operation '{other}'"))),
    };

    if let Some(modifier) = modifiers.iter().find(|m| m.name != "toArray") {
        return Err(malformed(format!("'{}' cannot follow '{}'", modifier.name, head.name)));
    }

    Ok(operation)
}

fn filter_and_projection(op: &str, args: &[Value]) -> Result<(Document, Option<Document>)> {
    match args {
        [] => Ok((Document::new(), None)),
        [filter] => Ok((to_document(filter.clone(), "filter")?, None)),
        [filter, projection] => Ok((
            to_document(filter.clone(), "filter")?,
            Some(to_document(projection.clone(), "projection")?),
        )),
        _ => Err(malformed(format!("{op} expects at most a filter and a projection"))),
    }
}

/// Convert a JSON object (extended JSON allowed) into a BSON document
fn to_document(value: Value, what: &str) -> Result<Document> {
    if !value.is_object() {
        return Err(malformed(format!("{what} must be a JSON object")));
    }
    match Bson::try_from(value) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(_) => Err(malformed(format!("{what} must be a JSON object"))),
        Err(e) => Err(malformed(format!("{what} is not valid extended JSON: {e}"))),
    }
}

fn to_count(value: &Value, what: &str) -> Result<i64> {
    value
        .as_i64()
        .filter(|n| *n >= 0)
        .ok_or_else(|| malformed(format!("{what} expects a non-negative integer")))
}
