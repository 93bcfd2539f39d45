//! Oracle Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for Oracle databases.
//!
//! # Implementation Notes
//! - Uses the `oracle` crate (ODPI-C, synchronous); every call runs on the
//!   blocking thread pool via `tokio::task::spawn_blocking`
//! - Connects with an Easy Connect string `//host:port/service`
//! - Schema introspection via the `USER_*` dictionary views (the login's own schema)
//! - One trailing `;` is stripped from statements (OCI rejects it)
//! - NUMBER values are parsed into JSON numbers, RAW/BLOB are Base64-encoded

use std::sync::Arc;

use oracle::sql_type::{OracleType, Timestamp, ToSql};
use oracle::{Connection, SqlValue};
use tracing::{debug, warn};

use crate::engine::{
    catalog, ConnectionConfig, DatabaseEngine, EngineFamily, ResultSet, SchemaInfo, TableInfo,
};
use crate::error::{NlQueryError, Result};

const ENGINE: &str = "oracle";

/// Oracle database engine implementation
pub struct OracleEngine {
    conn: Option<Arc<Connection>>,
}

impl OracleEngine {
    /// Open a connection to the configured service
    pub async fn open(config: &ConnectionConfig) -> Result<Self> {
        let family = EngineFamily::Oracle;
        let host = ConnectionConfig::require(config.host.as_ref(), family, "host")?;
        let user = ConnectionConfig::require(config.user.as_ref(), family, "user")?.to_string();
        let password =
            ConnectionConfig::require(config.password.as_ref(), family, "password")?.to_string();
        let service = ConnectionConfig::require(config.database.as_ref(), family, "database")?;
        let connect_string = easy_connect(host, config.port_or_default(family), service);

        let conn = tokio::task::spawn_blocking(move || {
            Connection::connect(&user, &password, &connect_string)
        })
        .await
        .map_err(|e| NlQueryError::connection(ENGINE, format!("Connection task failed: {e}")))?
        .map_err(|e| NlQueryError::connection(ENGINE, format!("Failed to connect to Oracle: {e}")))?;

        Ok(Self { conn: Some(Arc::new(conn)) })
    }

    fn conn(&self) -> Result<Arc<Connection>> {
        self.conn
            .clone()
            .ok_or_else(|| NlQueryError::connection(ENGINE, "connection already closed"))
    }
}

impl DatabaseEngine for OracleEngine {
    fn family(&self) -> EngineFamily {
        EngineFamily::Oracle
    }

    async fn introspect(&mut self) -> Result<SchemaInfo> {
        let conn = self.conn()?;

        let tables = tokio::task::spawn_blocking(move || introspect_tables(&conn))
            .await
            .map_err(|e| NlQueryError::introspection(ENGINE, format!("Introspection task failed: {e}")))??;

        debug!(engine = ENGINE, tables = tables.len(), "Introspected schema");
        Ok(SchemaInfo::Relational { tables })
    }

    async fn execute(&mut self, statement: &str) -> Result<ResultSet> {
        let conn = self.conn()?;
        let statement = strip_terminator(statement).to_string();

        tokio::task::spawn_blocking(move || execute_statement(&conn, &statement))
            .await
            .map_err(|e| NlQueryError::statement(format!("Statement task failed: {e}")))?
    }

    async fn close(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        match tokio::task::spawn_blocking(move || conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(engine = ENGINE, error = %e, "Failed to close connection cleanly"),
            Err(e) => warn!(engine = ENGINE, error = %e, "Close task failed"),
        }
    }
}

/// Easy Connect string for `host:port/service`
fn easy_connect(host: &str, port: u16, service: &str) -> String {
    format!("//{host}:{port}/{service}")
}

/// Remove a single trailing statement terminator
fn strip_terminator(statement: &str) -> &str {
    let trimmed = statement.trim();
    trimmed.strip_suffix(';').map_or(trimmed, str::trim_end)
}

fn execute_statement(conn: &Connection, statement: &str) -> Result<ResultSet> {
    let mut stmt = conn
        .statement(statement)
        .build()
        .map_err(|e| NlQueryError::statement(e.to_string()))?;

    if !stmt.is_query() {
        stmt.execute(&[]).map_err(|e| NlQueryError::statement(e.to_string()))?;
        return Ok(Vec::new());
    }

    let rows = stmt.query(&[]).map_err(|e| NlQueryError::statement(e.to_string()))?;
    let names: Vec<String> = rows.column_info().iter().map(|c| c.name().to_string()).collect();

    let mut result = Vec::new();
    for row in rows {
        let row = row.map_err(|e| NlQueryError::statement(e.to_string()))?;
        let mut map = crate::engine::Row::new();
        for (name, value) in names.iter().zip(row.sql_values()) {
            let json = oracle_value_to_json(value).map_err(|e| {
                NlQueryError::statement(format!("Failed to convert Oracle value for '{name}': {e}"))
            })?;
            map.insert(name.clone(), json);
        }
        result.push(map);
    }

    Ok(result)
}

/// Run a dictionary query and convert rows to JSON
fn catalog_rows(conn: &Connection, query: &str, params: &[&dyn ToSql]) -> Result<ResultSet> {
    let introspection_error =
        |e: oracle::Error| NlQueryError::introspection(ENGINE, format!("Catalog query failed: {e}"));

    let rows = conn.query(query, params).map_err(introspection_error)?;
    let names: Vec<String> = rows.column_info().iter().map(|c| c.name().to_string()).collect();

    let mut result = Vec::new();
    for row in rows {
        let row = row.map_err(introspection_error)?;
        let mut map = crate::engine::Row::new();
        for (name, value) in names.iter().zip(row.sql_values()) {
            map.insert(name.clone(), oracle_value_to_json(value).map_err(introspection_error)?);
        }
        result.push(map);
    }

    Ok(result)
}

fn introspect_tables(conn: &Connection) -> Result<Vec<TableInfo>> {
    let table_rows = catalog_rows(conn, "SELECT table_name FROM user_tables ORDER BY table_name", &[])?;

    let mut tables = Vec::new();
    for table_name in catalog::table_names(&table_rows, ENGINE)? {
        tables.push(introspect_table(conn, &table_name)?);
    }
    Ok(tables)
}

fn introspect_table(conn: &Connection, table_name: &str) -> Result<TableInfo> {
    let table = table_name.to_string();

    let columns = catalog_rows(
        conn,
        "SELECT
            c.column_name,
            c.data_type,
            c.nullable AS is_nullable,
            cc.comments AS column_comment
         FROM user_tab_columns c
         LEFT JOIN user_col_comments cc
           ON cc.table_name = c.table_name AND cc.column_name = c.column_name
         WHERE c.table_name = :1
         ORDER BY c.column_id",
        &[&table],
    )?;

    let primary_key = catalog_rows(
        conn,
        "SELECT cols.column_name
         FROM user_constraints cons
         JOIN user_cons_columns cols ON cols.constraint_name = cons.constraint_name
         WHERE cons.constraint_type = 'P'
           AND cons.table_name = :1
         ORDER BY cols.position",
        &[&table],
    )?;

    let foreign_keys = catalog_rows(
        conn,
        "SELECT
            cols.column_name,
            rcols.table_name AS referenced_table,
            rcols.column_name AS referenced_column
         FROM user_constraints cons
         JOIN user_cons_columns cols ON cols.constraint_name = cons.constraint_name
         JOIN user_cons_columns rcols
           ON rcols.constraint_name = cons.r_constraint_name
           AND rcols.position = cols.position
         WHERE cons.constraint_type = 'R'
           AND cons.table_name = :1
         ORDER BY cons.constraint_name, cols.position",
        &[&table],
    )?;

    catalog::build_table(table_name, &columns, &primary_key, &foreign_keys, ENGINE)
}

/// Convert Oracle value to JSON value
fn oracle_value_to_json(value: &SqlValue) -> oracle::Result<serde_json::Value> {
    use serde_json::Value;

    if value.is_null()? {
        return Ok(Value::Null);
    }

    let json = match value.oracle_type()? {
        OracleType::Number(_, _)
        | OracleType::Float(_)
        | OracleType::BinaryFloat
        | OracleType::BinaryDouble
        | OracleType::Int64
        | OracleType::UInt64 => number_text_to_json(value.get::<String>()?),
        OracleType::Raw(_) | OracleType::LongRaw | OracleType::BLOB => {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(value.get::<Vec<u8>>()?))
        }
        OracleType::Date
        | OracleType::Timestamp(_)
        | OracleType::TimestampTZ(_)
        | OracleType::TimestampLTZ(_) => Value::String(value.get::<Timestamp>()?.to_string()),
        _ => Value::String(value.get::<String>()?),
    };

    Ok(json)
}

/// NUMBER arrives as decimal text; keep integers exact
fn number_text_to_json(text: String) -> serde_json::Value {
    if let Ok(i) = text.parse::<i64>() {
        return serde_json::Value::from(i);
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => serde_json::Number::from_f64(f)
            .map_or(serde_json::Value::String(text), serde_json::Value::Number),
        _ => serde_json::Value::String(text),
    }
}
