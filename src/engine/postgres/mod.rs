//! `PostgreSQL` Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for `PostgreSQL` databases.
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (async driver, requires tokio runtime)
//! - One client per adapter; the connection task is aborted on `close`
//! - Schema introspection via `information_schema`, scoped to `current_schema()`
//! - Catalog columns are cast to `text` so domain types never reach the decoder
//! - JSON/JSONB preserved as nested JSON
//! - BYTEA data is Base64-encoded for JSON safety

use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::{Client, Config, NoTls, Row};
use tracing::debug;

use crate::engine::{
    catalog, ConnectionConfig, DatabaseEngine, EngineFamily, ResultSet, SchemaInfo, TableInfo,
};
use crate::error::{NlQueryError, Result};

const ENGINE: &str = "postgres";

/// `PostgreSQL` database engine implementation
pub struct PostgresEngine {
    client: Option<Client>,
    connection_task: Option<JoinHandle<()>>,
}

impl PostgresEngine {
    /// Open a connection to the configured database
    pub async fn open(config: &ConnectionConfig) -> Result<Self> {
        let pg_config = build_pg_config(config)?;

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            NlQueryError::connection(ENGINE, format!("Failed to connect to PostgreSQL: {e}"))
        })?;

        // Connection errors are not logged to prevent credential leakage
        let connection_task = tokio::spawn(async move {
            let _ = connection.await;
        });

        Ok(Self { client: Some(client), connection_task: Some(connection_task) })
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| NlQueryError::connection(ENGINE, "connection already closed"))
    }

    async fn catalog_rows(
        &self,
        query: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<ResultSet> {
        let rows = self
            .client()?
            .query(query, params)
            .await
            .map_err(|e| NlQueryError::introspection(ENGINE, format!("Catalog query failed: {e}")))?;

        rows.iter()
            .map(row_to_json)
            .collect::<Result<_>>()
            .map_err(|e| NlQueryError::introspection(ENGINE, e.message()))
    }

    async fn introspect_table(&self, schema: &str, table_name: &str) -> Result<TableInfo> {
        let columns = self
            .catalog_rows(
                "SELECT
                    c.column_name::text AS column_name,
                    c.data_type::text AS data_type,
                    c.is_nullable::text AS is_nullable,
                    col_description(
                        format('%I.%I', c.table_schema, c.table_name)::regclass,
                        c.ordinal_position::int
                    ) AS column_comment
                 FROM information_schema.columns c
                 WHERE c.table_schema = $1::text AND c.table_name = $2::text
                 ORDER BY c.ordinal_position",
                &[&schema, &table_name],
            )
            .await?;

        let primary_key = self
            .catalog_rows(
                "SELECT kcu.column_name::text AS column_name
                 FROM information_schema.table_constraints tc
                 JOIN information_schema.key_column_usage kcu
                   ON tc.constraint_name = kcu.constraint_name
                   AND tc.table_schema = kcu.table_schema
                 WHERE tc.constraint_type = 'PRIMARY KEY'
                   AND tc.table_schema = $1::text
                   AND tc.table_name = $2::text
                 ORDER BY kcu.ordinal_position",
                &[&schema, &table_name],
            )
            .await?;

        let foreign_keys = self
            .catalog_rows(
                "SELECT
                    kcu.column_name::text AS column_name,
                    ccu.table_name::text AS referenced_table,
                    ccu.column_name::text AS referenced_column
                 FROM information_schema.table_constraints AS tc
                 JOIN information_schema.key_column_usage AS kcu
                   ON tc.constraint_name = kcu.constraint_name
                   AND tc.table_schema = kcu.table_schema
                 JOIN information_schema.constraint_column_usage AS ccu
                   ON ccu.constraint_name = tc.constraint_name
                   AND ccu.table_schema = tc.table_schema
                 WHERE tc.constraint_type = 'FOREIGN KEY'
                   AND tc.table_schema = $1::text
                   AND tc.table_name = $2::text
                 ORDER BY tc.constraint_name, kcu.ordinal_position",
                &[&schema, &table_name],
            )
            .await?;

        catalog::build_table(table_name, &columns, &primary_key, &foreign_keys, ENGINE)
    }
}

impl DatabaseEngine for PostgresEngine {
    fn family(&self) -> EngineFamily {
        EngineFamily::Postgres
    }

    async fn introspect(&mut self) -> Result<SchemaInfo> {
        let schema_rows = self.catalog_rows("SELECT current_schema()::text AS schema_name", &[]).await?;
        let schema = schema_rows
            .first()
            .and_then(|row| catalog::text(row, "schema_name"))
            .ok_or_else(|| NlQueryError::introspection(ENGINE, "no current schema on search_path"))?;

        let table_rows = self
            .catalog_rows(
                "SELECT table_name::text AS table_name
                 FROM information_schema.tables
                 WHERE table_schema = $1::text
                 AND table_type = 'BASE TABLE'
                 ORDER BY table_name",
                &[&schema],
            )
            .await?;

        let mut tables = Vec::new();
        for table_name in catalog::table_names(&table_rows, ENGINE)? {
            tables.push(self.introspect_table(&schema, &table_name).await?);
        }

        debug!(engine = ENGINE, schema = %schema, tables = tables.len(), "Introspected schema");
        Ok(SchemaInfo::Relational { tables })
    }

    async fn execute(&mut self, statement: &str) -> Result<ResultSet> {
        let rows = self
            .client()?
            .query(statement, &[])
            .await
            .map_err(|e| NlQueryError::statement(describe_pg_error(&e)))?;

        rows.iter().map(row_to_json).collect()
    }

    async fn close(&mut self) {
        // Dropping the client ends the session; the task is aborted in case it is still draining
        self.client.take();
        if let Some(task) = self.connection_task.take() {
            task.abort();
        }
    }
}

/// Build `PostgreSQL` connection config from `ConnectionConfig`
fn build_pg_config(config: &ConnectionConfig) -> Result<Config> {
    let family = EngineFamily::Postgres;
    let host = ConnectionConfig::require(config.host.as_ref(), family, "host")?;
    let user = ConnectionConfig::require(config.user.as_ref(), family, "user")?;
    let password = ConnectionConfig::require(config.password.as_ref(), family, "password")?;
    let database = ConnectionConfig::require(config.database.as_ref(), family, "database")?;

    let mut pg_config = Config::new();
    pg_config
        .host(host)
        .port(config.port_or_default(family))
        .user(user)
        .password(password)
        .dbname(database)
        .application_name("nlquery");

    Ok(pg_config)
}

/// Prefer the server's message over the driver's generic "db error"
fn describe_pg_error(error: &tokio_postgres::Error) -> String {
    match error.as_db_error() {
        Some(db) => format!("{}: {}", db.code().code(), db.message()),
        None => error.to_string(),
    }
}

/// Convert a `PostgreSQL` row to a JSON object
fn row_to_json(row: &Row) -> Result<crate::engine::Row> {
    let mut map = crate::engine::Row::new();

    for (idx, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), postgres_value_to_json(row, idx)?);
    }

    Ok(map)
}

/// Read a nullable column of type `T` and convert it
fn nullable<'a, T, F>(row: &'a Row, idx: usize, convert: F) -> Result<serde_json::Value>
where
    T: FromSql<'a>,
    F: FnOnce(T) -> serde_json::Value,
{
    let value: Option<T> = row.try_get(idx).map_err(|e| {
        NlQueryError::statement(format!(
            "Failed to convert PostgreSQL type '{}' to JSON: {e}",
            row.columns()[idx].type_().name()
        ))
    })?;
    Ok(value.map_or(serde_json::Value::Null, convert))
}

fn float_to_json(v: f64) -> serde_json::Value {
    // NaN/Infinity become null
    serde_json::Number::from_f64(v).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

type DecodeError = Box<dyn std::error::Error + Sync + Send>;

/// NUMERIC decoded from the binary wire format into its decimal text
struct PgNumeric(String);

impl PgNumeric {
    const NEGATIVE: u16 = 0x4000;
    const NAN: u16 = 0xC000;

    fn into_json(self) -> serde_json::Value {
        if let Ok(i) = self.0.parse::<i64>() {
            return serde_json::Value::from(i);
        }
        match self.0.parse::<f64>() {
            Ok(v) if v.is_finite() => float_to_json(v),
            _ => serde_json::Value::String(self.0),
        }
    }
}

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, DecodeError> {
        let read = |offset: usize| -> std::result::Result<u16, DecodeError> {
            raw.get(offset..offset + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .ok_or_else(|| "truncated numeric".into())
        };

        let ndigits = usize::from(read(0)?);
        let weight = i32::from(read(2)? as i16);
        let sign = read(4)?;
        let dscale = usize::from(read(6)?);
        if sign == Self::NAN {
            return Ok(Self("NaN".to_string()));
        }

        // Base-10000 digit groups; group i sits at position weight - i
        let digits = (0..ndigits).map(|i| read(8 + i * 2)).collect::<std::result::Result<Vec<_>, _>>()?;
        let group = |position: i32| -> u16 {
            usize::try_from(weight - position)
                .ok()
                .and_then(|i| digits.get(i).copied())
                .unwrap_or(0)
        };

        let mut text = String::new();
        if sign == Self::NEGATIVE {
            text.push('-');
        }
        if weight < 0 {
            text.push('0');
        } else {
            text.push_str(&group(weight).to_string());
            for position in (0..weight).rev() {
                text.push_str(&format!("{:04}", group(position)));
            }
        }

        if dscale > 0 {
            let mut fraction = String::new();
            let mut position = -1;
            while fraction.len() < dscale {
                fraction.push_str(&format!("{:04}", group(position)));
                position -= 1;
            }
            fraction.truncate(dscale);
            text.push('.');
            text.push_str(&fraction);
        }

        Ok(Self(text))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// User-defined enum label (sent as its text in binary format)
struct PgEnumLabel(String);

impl<'a> FromSql<'a> for PgEnumLabel {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, DecodeError> {
        Ok(Self(String::from_utf8_lossy(raw).into_owned()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(row: &Row, idx: usize) -> Result<serde_json::Value> {
    use serde_json::Value;

    let ty = row.columns()[idx].type_();
    match *ty {
        Type::BOOL => nullable(row, idx, Value::Bool),
        Type::INT2 => nullable(row, idx, |v: i16| Value::from(v)),
        Type::INT4 => nullable(row, idx, |v: i32| Value::from(v)),
        Type::INT8 => nullable(row, idx, |v: i64| Value::from(v)),
        Type::OID => nullable(row, idx, |v: u32| Value::from(v)),
        Type::FLOAT4 => nullable(row, idx, |v: f32| float_to_json(f64::from(v))),
        Type::FLOAT8 => nullable(row, idx, float_to_json),
        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => nullable(row, idx, Value::String),
        Type::JSON | Type::JSONB => nullable(row, idx, |v: Value| v),
        Type::BYTEA => nullable(row, idx, |v: Vec<u8>| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(v))
        }),
        Type::TIMESTAMP => nullable(row, idx, |v: chrono::NaiveDateTime| {
            Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }),
        Type::TIMESTAMPTZ => {
            nullable(row, idx, |v: chrono::DateTime<chrono::Utc>| Value::String(v.to_rfc3339()))
        }
        Type::DATE => nullable(row, idx, |v: chrono::NaiveDate| {
            Value::String(v.format("%Y-%m-%d").to_string())
        }),
        Type::TIME => nullable(row, idx, |v: chrono::NaiveTime| {
            Value::String(v.format("%H:%M:%S%.f").to_string())
        }),
        Type::UUID => nullable(row, idx, |v: uuid::Uuid| Value::String(v.to_string())),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => nullable(row, idx, |v: Vec<Option<String>>| {
            Value::Array(v.into_iter().map(|s| s.map_or(Value::Null, Value::String)).collect())
        }),
        Type::INT4_ARRAY => nullable(row, idx, |v: Vec<Option<i32>>| {
            Value::Array(v.into_iter().map(|i| i.map_or(Value::Null, Value::from)).collect())
        }),
        Type::INT8_ARRAY => nullable(row, idx, |v: Vec<Option<i64>>| {
            Value::Array(v.into_iter().map(|i| i.map_or(Value::Null, Value::from)).collect())
        }),
        Type::NUMERIC => nullable(row, idx, PgNumeric::into_json),
        _ if matches!(ty.kind(), Kind::Enum(_)) => nullable(row, idx, |v: PgEnumLabel| Value::String(v.0)),
        // Anything else must be cast to text in the statement itself
        _ => nullable(row, idx, Value::String),
    }
}
