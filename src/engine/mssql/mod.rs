//! SQL Server Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for Microsoft SQL Server.
//!
//! # Implementation Notes
//! - Uses `tiberius` over a tokio `TcpStream` (via `tokio-util` compat)
//! - SQL Server authentication; the server certificate is trusted as presented
//! - Schema introspection via `INFORMATION_SCHEMA`, scoped to `SCHEMA_NAME()`
//! - Column comments come from the `MS_Description` extended property
//! - Only the first result set of a statement is returned

use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

use crate::engine::{
    catalog, ConnectionConfig, DatabaseEngine, EngineFamily, ResultSet, SchemaInfo, TableInfo,
};
use crate::error::{NlQueryError, Result};

const ENGINE: &str = "mssql";

type TdsClient = Client<Compat<TcpStream>>;

/// SQL Server database engine implementation
pub struct SqlServerEngine {
    client: Option<TdsClient>,
}

impl SqlServerEngine {
    /// Open a connection to the configured database
    pub async fn open(config: &ConnectionConfig) -> Result<Self> {
        let tds_config = build_tds_config(config)?;

        let tcp = TcpStream::connect(tds_config.get_addr()).await.map_err(|e| {
            NlQueryError::connection(ENGINE, format!("Failed to reach SQL Server: {e}"))
        })?;
        tcp.set_nodelay(true)
            .map_err(|e| NlQueryError::connection(ENGINE, format!("Failed to configure socket: {e}")))?;

        let client = Client::connect(tds_config, tcp.compat_write()).await.map_err(|e| {
            NlQueryError::connection(ENGINE, format!("Failed to connect to SQL Server: {e}"))
        })?;

        Ok(Self { client: Some(client) })
    }

    fn client(&mut self) -> Result<&mut TdsClient> {
        self.client
            .as_mut()
            .ok_or_else(|| NlQueryError::connection(ENGINE, "connection already closed"))
    }

    /// Run a catalog query bound to `@P1`/`@P2` and convert rows to JSON
    async fn catalog_rows(&mut self, query: &str, params: &[&dyn tiberius::ToSql]) -> Result<ResultSet> {
        let introspection_error =
            |e: tiberius::error::Error| NlQueryError::introspection(ENGINE, format!("Catalog query failed: {e}"));

        let rows = self
            .client()?
            .query(query, params)
            .await
            .map_err(introspection_error)?
            .into_first_result()
            .await
            .map_err(introspection_error)?;

        rows.into_iter()
            .map(row_to_json)
            .collect::<Result<_>>()
            .map_err(|e| NlQueryError::introspection(ENGINE, e.message()))
    }

    async fn introspect_table(&mut self, schema: &str, table_name: &str) -> Result<TableInfo> {
        let schema = schema.to_string();
        let table = table_name.to_string();

        let columns = self
            .catalog_rows(
                "SELECT
                    c.COLUMN_NAME AS column_name,
                    c.DATA_TYPE AS data_type,
                    c.IS_NULLABLE AS is_nullable,
                    CAST(ep.value AS NVARCHAR(4000)) AS column_comment
                 FROM INFORMATION_SCHEMA.COLUMNS c
                 LEFT JOIN sys.extended_properties ep
                   ON ep.class = 1
                   AND ep.name = 'MS_Description'
                   AND ep.major_id = OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME))
                   AND ep.minor_id = COLUMNPROPERTY(
                       OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)),
                       c.COLUMN_NAME,
                       'ColumnId'
                   )
                 WHERE c.TABLE_SCHEMA = @P1 AND c.TABLE_NAME = @P2
                 ORDER BY c.ORDINAL_POSITION",
                &[&schema, &table],
            )
            .await?;

        let primary_key = self
            .catalog_rows(
                "SELECT kcu.COLUMN_NAME AS column_name
                 FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                 JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
                   ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
                   AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA
                 WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
                   AND tc.TABLE_SCHEMA = @P1
                   AND tc.TABLE_NAME = @P2
                 ORDER BY kcu.ORDINAL_POSITION",
                &[&schema, &table],
            )
            .await?;

        let foreign_keys = self
            .catalog_rows(
                "SELECT
                    pc.name AS column_name,
                    rt.name AS referenced_table,
                    rc.name AS referenced_column
                 FROM sys.foreign_key_columns fkc
                 JOIN sys.tables pt ON pt.object_id = fkc.parent_object_id
                 JOIN sys.columns pc
                   ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id
                 JOIN sys.tables rt ON rt.object_id = fkc.referenced_object_id
                 JOIN sys.columns rc
                   ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id
                 WHERE SCHEMA_NAME(pt.schema_id) = @P1 AND pt.name = @P2
                 ORDER BY fkc.constraint_object_id, fkc.constraint_column_id",
                &[&schema, &table],
            )
            .await?;

        catalog::build_table(table_name, &columns, &primary_key, &foreign_keys, ENGINE)
    }
}

impl DatabaseEngine for SqlServerEngine {
    fn family(&self) -> EngineFamily {
        EngineFamily::SqlServer
    }

    async fn introspect(&mut self) -> Result<SchemaInfo> {
        let schema_rows = self.catalog_rows("SELECT SCHEMA_NAME() AS schema_name", &[]).await?;
        let schema = schema_rows
            .first()
            .and_then(|row| catalog::text(row, "schema_name"))
            .ok_or_else(|| NlQueryError::introspection(ENGINE, "no default schema for login"))?;

        let table_rows = self
            .catalog_rows(
                "SELECT TABLE_NAME AS table_name
                 FROM INFORMATION_SCHEMA.TABLES
                 WHERE TABLE_SCHEMA = @P1
                 AND TABLE_TYPE = 'BASE TABLE'
                 ORDER BY TABLE_NAME",
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
            .simple_query(statement)
            .await
            .map_err(|e| NlQueryError::statement(e.to_string()))?
            .into_first_result()
            .await
            .map_err(|e| NlQueryError::statement(e.to_string()))?;

        rows.into_iter().map(row_to_json).collect()
    }

    async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.close().await {
                warn!(engine = ENGINE, error = %e, "Failed to close connection cleanly");
            }
        }
    }
}

/// Build tiberius config from `ConnectionConfig`
fn build_tds_config(config: &ConnectionConfig) -> Result<Config> {
    let family = EngineFamily::SqlServer;
    let host = ConnectionConfig::require(config.host.as_ref(), family, "host")?;
    let user = ConnectionConfig::require(config.user.as_ref(), family, "user")?;
    let password = ConnectionConfig::require(config.password.as_ref(), family, "password")?;
    let database = ConnectionConfig::require(config.database.as_ref(), family, "database")?;

    let mut tds_config = Config::new();
    tds_config.host(host);
    tds_config.port(config.port_or_default(family));
    tds_config.database(database);
    tds_config.application_name("nlquery");
    tds_config.authentication(AuthMethod::sql_server(user, password));
    tds_config.trust_cert();

    Ok(tds_config)
}

/// Convert a SQL Server row to a JSON object
fn row_to_json(row: Row) -> Result<crate::engine::Row> {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let mut map = crate::engine::Row::new();

    for (name, data) in names.into_iter().zip(row) {
        map.insert(name, tds_value_to_json(&data)?);
    }

    Ok(map)
}

fn float_to_json(v: f64) -> serde_json::Value {
    // NaN/Infinity become null
    serde_json::Number::from_f64(v).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// Decode a temporal column through its chrono representation
fn temporal<'a, T>(
    data: &'a ColumnData<'static>,
    render: impl FnOnce(T) -> String,
) -> Result<serde_json::Value>
where
    T: FromSql<'a>,
{
    let value = T::from_sql(data)
        .map_err(|e| NlQueryError::statement(format!("Failed to convert SQL Server value: {e}")))?;
    Ok(value.map_or(serde_json::Value::Null, |v| serde_json::Value::String(render(v))))
}

/// Convert SQL Server value to JSON value
fn tds_value_to_json(data: &ColumnData<'static>) -> Result<serde_json::Value> {
    use serde_json::Value;

    let value = match data {
        ColumnData::U8(v) => v.map_or(Value::Null, Value::from),
        ColumnData::I16(v) => v.map_or(Value::Null, Value::from),
        ColumnData::I32(v) => v.map_or(Value::Null, Value::from),
        ColumnData::I64(v) => v.map_or(Value::Null, Value::from),
        ColumnData::F32(v) => v.map_or(Value::Null, |f| float_to_json(f64::from(f))),
        ColumnData::F64(v) => v.map_or(Value::Null, float_to_json),
        ColumnData::Bit(v) => v.map_or(Value::Null, Value::Bool),
        ColumnData::String(v) => v.as_ref().map_or(Value::Null, |s| Value::String(s.to_string())),
        ColumnData::Guid(v) => v.map_or(Value::Null, |g| Value::String(g.to_string())),
        ColumnData::Binary(v) => v.as_ref().map_or(Value::Null, |bytes| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }),
        ColumnData::Numeric(v) => v.as_ref().map_or(Value::Null, |n| numeric_to_json(n.value(), n.scale())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            return temporal(data, |v: chrono::NaiveDateTime| {
                v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
            });
        }
        ColumnData::DateTimeOffset(_) => {
            return temporal(data, |v: chrono::DateTime<chrono::Utc>| v.to_rfc3339());
        }
        ColumnData::Date(_) => {
            return temporal(data, |v: chrono::NaiveDate| v.format("%Y-%m-%d").to_string());
        }
        ColumnData::Time(_) => {
            return temporal(data, |v: chrono::NaiveTime| v.format("%H:%M:%S%.f").to_string());
        }
        other => Value::String(format!("{other:?}")),
    };

    Ok(value)
}

/// DECIMAL/NUMERIC arrive as a scaled integer
fn numeric_to_json(value: i128, scale: u8) -> serde_json::Value {
    if scale == 0 {
        if let Ok(v) = i64::try_from(value) {
            return serde_json::Value::from(v);
        }
    }
    #[allow(clippy::cast_precision_loss)]
    float_to_json(value as f64 / 10f64.powi(i32::from(scale)))
}
