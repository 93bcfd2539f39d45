//! MySQL Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for MySQL databases (including MariaDB).
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver, requires tokio runtime)
//! - One `Conn` per adapter, released by `close`
//! - Schema introspection via `information_schema`, scoped to the configured database
//! - ENUM and SET types arrive as strings
//! - BLOB data is Base64-encoded for JSON safety

use mysql_async::{prelude::*, Conn, OptsBuilder, Row, Value};
use tracing::{debug, warn};

use crate::engine::{
    catalog, ConnectionConfig, DatabaseEngine, EngineFamily, ResultSet, SchemaInfo, TableInfo,
};
use crate::error::{NlQueryError, Result};

const ENGINE: &str = "mysql";

/// MySQL database engine implementation
pub struct MySqlEngine {
    conn: Option<Conn>,
    database: String,
}

impl MySqlEngine {
    /// Open a connection to the configured database
    pub async fn open(config: &ConnectionConfig) -> Result<Self> {
        let opts = build_mysql_opts(config)?;
        let database = ConnectionConfig::require(config.database.as_ref(), EngineFamily::MySql, "database")?
            .to_string();

        let conn = Conn::new(opts)
            .await
            .map_err(|e| NlQueryError::connection(ENGINE, format!("Failed to connect to MySQL: {e}")))?;

        Ok(Self { conn: Some(conn), database })
    }

    fn conn(&mut self) -> Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| NlQueryError::connection(ENGINE, "connection already closed"))
    }

    /// Run a parameterized catalog query and convert rows to JSON
    async fn catalog_rows<P>(&mut self, query: &str, params: P) -> Result<ResultSet>
    where
        P: Into<mysql_async::Params> + Send,
    {
        let rows: Vec<Row> = self
            .conn()?
            .exec(query, params)
            .await
            .map_err(|e| NlQueryError::introspection(ENGINE, format!("Catalog query failed: {e}")))?;

        rows.iter()
            .map(row_to_json)
            .collect::<Result<_>>()
            .map_err(|e| NlQueryError::introspection(ENGINE, e.message()))
    }

    async fn introspect_table(&mut self, table_name: &str) -> Result<TableInfo> {
        let schema = self.database.clone();

        let columns = self
            .catalog_rows(
                "SELECT column_name, column_type AS data_type, is_nullable, column_comment
                 FROM information_schema.columns
                 WHERE table_schema = ? AND table_name = ?
                 ORDER BY ordinal_position",
                (schema.as_str(), table_name),
            )
            .await?;

        let primary_key = self
            .catalog_rows(
                "SELECT column_name
                 FROM information_schema.key_column_usage
                 WHERE table_schema = ?
                 AND table_name = ?
                 AND constraint_name = 'PRIMARY'
                 ORDER BY ordinal_position",
                (schema.as_str(), table_name),
            )
            .await?;

        let foreign_keys = self
            .catalog_rows(
                "SELECT
                    kcu.column_name,
                    kcu.referenced_table_name AS referenced_table,
                    kcu.referenced_column_name AS referenced_column
                 FROM information_schema.key_column_usage kcu
                 WHERE kcu.table_schema = ?
                 AND kcu.table_name = ?
                 AND kcu.referenced_table_name IS NOT NULL
                 ORDER BY kcu.constraint_name, kcu.ordinal_position",
                (schema.as_str(), table_name),
            )
            .await?;

        catalog::build_table(table_name, &columns, &primary_key, &foreign_keys, ENGINE)
    }
}

impl DatabaseEngine for MySqlEngine {
    fn family(&self) -> EngineFamily {
        EngineFamily::MySql
    }

    async fn introspect(&mut self) -> Result<SchemaInfo> {
        let schema = self.database.clone();
        let table_rows = self
            .catalog_rows(
                "SELECT table_name
                 FROM information_schema.tables
                 WHERE table_schema = ?
                 AND table_type = 'BASE TABLE'
                 ORDER BY table_name",
                (schema.as_str(),),
            )
            .await?;

        let mut tables = Vec::new();
        for table_name in catalog::table_names(&table_rows, ENGINE)? {
            tables.push(self.introspect_table(&table_name).await?);
        }

        debug!(engine = ENGINE, tables = tables.len(), "Introspected schema");
        Ok(SchemaInfo::Relational { tables })
    }

    async fn execute(&mut self, statement: &str) -> Result<ResultSet> {
        let rows: Vec<Row> = self
            .conn()?
            .query(statement)
            .await
            .map_err(|e| NlQueryError::statement(e.to_string()))?;

        rows.iter().map(row_to_json).collect()
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.disconnect().await {
                warn!(engine = ENGINE, error = %e, "Failed to disconnect cleanly");
            }
        }
    }
}

/// Build MySQL connection options from `ConnectionConfig`
fn build_mysql_opts(config: &ConnectionConfig) -> Result<OptsBuilder> {
    let family = EngineFamily::MySql;
    let host = ConnectionConfig::require(config.host.as_ref(), family, "host")?;
    let user = ConnectionConfig::require(config.user.as_ref(), family, "user")?;
    let password = ConnectionConfig::require(config.password.as_ref(), family, "password")?;
    let database = ConnectionConfig::require(config.database.as_ref(), family, "database")?;

    let opts = OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(config.port_or_default(family))
        .user(Some(user))
        .pass(Some(password))
        .db_name(Some(database));

    Ok(opts)
}

/// Convert a MySQL row to a JSON object
fn row_to_json(row: &Row) -> Result<crate::engine::Row> {
    let mut map = crate::engine::Row::new();

    for (idx, column) in row.columns_ref().iter().enumerate() {
        let value = row
            .as_ref(idx)
            .ok_or_else(|| NlQueryError::statement(format!("Failed to get value at index {idx}")))?;
        map.insert(column.name_str().to_string(), mysql_value_to_json(value));
    }

    Ok(map)
}

/// Convert MySQL value to JSON value
fn mysql_value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::NULL => serde_json::Value::Null,

        Value::Bytes(bytes) => {
            if let Ok(s) = std::str::from_utf8(bytes) {
                serde_json::Value::String(s.to_string())
            } else {
                use base64::Engine;
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        }

        Value::Int(i) => serde_json::Value::from(*i),
        Value::UInt(u) => serde_json::Value::from(*u),

        // NaN/Infinity become null
        Value::Float(f) => serde_json::Number::from_f64(f64::from(*f))
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Double(d) => {
            serde_json::Number::from_f64(*d).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }

        Value::Date(year, month, day, hour, minute, second, micro) => {
            let text = if (*hour, *minute, *second, *micro) == (0, 0, 0, 0) {
                format!("{year:04}-{month:02}-{day:02}")
            } else {
                format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}")
            };
            serde_json::Value::String(text)
        }

        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            serde_json::Value::String(format!(
                "{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
            ))
        }
    }
}
