//! Catalog row helpers shared by the engine adapters
//!
//! Every adapter aliases its catalog queries to the same column names
//! (`column_name`, `data_type`, `is_nullable`, `column_comment`,
//! `referenced_table`, `referenced_column`). Engines disagree on the casing of
//! the names they hand back (Oracle upper-cases everything, MySQL 8 upper-cases
//! `information_schema` columns), so lookups here ignore ASCII case.

use serde_json::Value;

use crate::engine::{ColumnInfo, FieldInfo, ForeignKeyInfo, Row, TableInfo};
use crate::error::{NlQueryError, Result};

/// Conventional primary key field of the document store
pub const DOCUMENT_ID_FIELD: &str = "_id";

/// Look up a catalog field regardless of its casing
#[must_use]
pub fn field<'a>(row: &'a Row, name: &str) -> Option<&'a Value> {
    row.get(name).or_else(|| {
        row.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, value)| value)
    })
}

/// Read a catalog field as text; `NULL` and missing fields are `None`
#[must_use]
pub fn text(row: &Row, name: &str) -> Option<String> {
    match field(row, name)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Read a required catalog field as text
pub fn required_text(row: &Row, name: &str, engine: &str) -> Result<String> {
    text(row, name).ok_or_else(|| {
        NlQueryError::introspection(engine, format!("catalog row is missing '{name}'"))
    })
}

/// Read a yes/no catalog flag (`YES`, `Y`, `true`, `1`)
#[must_use]
pub fn flag(row: &Row, name: &str) -> bool {
    match field(row, name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
        Some(Value::String(s)) => {
            matches!(s.trim().to_ascii_uppercase().as_str(), "YES" | "Y" | "TRUE" | "1")
        }
        _ => false,
    }
}

/// Collect the `table_name` column of a table-listing query
pub fn table_names(rows: &[Row], engine: &str) -> Result<Vec<String>> {
    rows.iter().map(|row| required_text(row, "table_name", engine)).collect()
}

/// Assemble a `TableInfo` from the three per-table catalog queries
///
/// `column_rows` must already be in ordinal order and `pk_rows` in key order.
pub fn build_table(
    name: &str,
    column_rows: &[Row],
    pk_rows: &[Row],
    fk_rows: &[Row],
    engine: &str,
) -> Result<TableInfo> {
    let primary_keys = pk_rows
        .iter()
        .map(|row| required_text(row, "column_name", engine))
        .collect::<Result<Vec<_>>>()?;

    let mut columns = Vec::with_capacity(column_rows.len());
    for row in column_rows {
        let column_name = required_text(row, "column_name", engine)?;
        let is_primary_key = primary_keys.iter().any(|pk| pk.eq_ignore_ascii_case(&column_name));
        columns.push(ColumnInfo {
            data_type: required_text(row, "data_type", engine)?,
            nullable: flag(row, "is_nullable"),
            is_primary_key,
            comment: text(row, "column_comment").filter(|c| !c.trim().is_empty()),
            name: column_name,
        });
    }

    let foreign_keys = fk_rows
        .iter()
        .map(|row| {
            Ok(ForeignKeyInfo {
                column: required_text(row, "column_name", engine)?,
                referenced_table: required_text(row, "referenced_table", engine)?,
                referenced_column: required_text(row, "referenced_column", engine)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(TableInfo { name: name.to_string(), columns, primary_keys, foreign_keys })
}

/// Union the fields of sampled documents in first-seen order
///
/// The recorded type is the runtime type of the first value seen for each
/// field. Documents are expected in relaxed extended JSON.
#[must_use]
pub fn infer_fields(documents: &[Row]) -> Vec<FieldInfo> {
    let mut fields: Vec<FieldInfo> = Vec::new();

    for document in documents {
        for (name, value) in document {
            if fields.iter().any(|f| &f.name == name) {
                continue;
            }
            fields.push(FieldInfo {
                name: name.clone(),
                inferred_type: json_type_name(value).to_string(),
                is_primary_key: name == DOCUMENT_ID_FIELD,
            });
        }
    }

    fields
}

/// Runtime type name of a relaxed extended JSON value
#[must_use]
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "double",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(map) => {
            let wrapper = if map.len() == 1 { map.keys().next().map(String::as_str) } else { None };
            match wrapper {
                Some("$oid") => "objectId",
                Some("$date") => "date",
                Some("$numberLong") => "long",
                Some("$numberDecimal") => "decimal",
                Some("$binary") => "binary",
                Some("$timestamp") => "timestamp",
                Some("$regularExpression") => "regex",
                _ => "object",
            }
        }
    }
}
