//! Database Engine Traits and Core Types
//!
//! This module defines the core abstractions for database engines.
//! Each engine family (MySQL/MariaDB, `PostgreSQL`, SQL Server, Oracle, `MongoDB`)
//! has its own adapter module implementing the `DatabaseEngine` trait.
//!
//! # Scoped Connections
//! An adapter owns exactly one live connection, opened by `EngineConnector::open`
//! and released by `DatabaseEngine::close`. Closing is idempotent and never fails.
//!
//! # Engine Isolation
//! Each engine implementation runs its own catalog queries. The only shared code
//! is the row-shape assembly in [`catalog`], which reads catalog rows
//! case-insensitively.

use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::error::{NlQueryError, Result};

pub mod catalog;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mssql")]
pub mod mssql;

#[cfg(feature = "oracle")]
pub mod oracle;

#[cfg(feature = "mongodb")]
pub mod mongodb;

/// Supported database engine families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineFamily {
    /// `MySQL` database (includes `MariaDB`)
    MySql,
    /// `PostgreSQL` database
    Postgres,
    /// Microsoft SQL Server (and Azure SQL)
    #[serde(rename = "mssql")]
    SqlServer,
    /// Oracle database
    Oracle,
    /// `MongoDB` document store
    #[serde(rename = "mongodb")]
    MongoDb,
}

impl EngineFamily {
    /// Every supported family, in resolution order
    pub const ALL: [Self; 5] =
        [Self::MySql, Self::Postgres, Self::SqlServer, Self::Oracle, Self::MongoDb];

    /// Resolve a free-form engine name by case-insensitive substring match.
    ///
    /// Accepts names such as "MySQL", "MariaDB 10.11", "PostgreSQL",
    /// "Microsoft SQL Server", "Oracle 19c" or "MongoDB Atlas".
    pub fn resolve(name: &str) -> Result<Self> {
        let lowered = name.to_lowercase();

        let family = if lowered.contains("mysql") || lowered.contains("mariadb") {
            Self::MySql
        } else if lowered.contains("postgres") {
            Self::Postgres
        } else if lowered.contains("sql server")
            || lowered.contains("sqlserver")
            || lowered.contains("mssql")
        {
            Self::SqlServer
        } else if lowered.contains("oracle") {
            Self::Oracle
        } else if lowered.contains("mongo") {
            Self::MongoDb
        } else {
            return Err(NlQueryError::unsupported_engine(format!(
                "'{name}' is not a recognized engine family"
            )));
        };

        Ok(family)
    }

    /// Get the engine name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::SqlServer => "mssql",
            Self::Oracle => "oracle",
            Self::MongoDb => "mongodb",
        }
    }

    /// Human-facing product name, used in prompts
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
            Self::SqlServer => "Microsoft SQL Server",
            Self::Oracle => "Oracle",
            Self::MongoDb => "MongoDB",
        }
    }

    /// Whether this family is the schemaless document store
    #[must_use]
    pub const fn is_document_store(&self) -> bool {
        matches!(self, Self::MongoDb)
    }

    /// Conventional TCP port for the family
    #[must_use]
    pub const fn default_port(&self) -> u16 {
        match self {
            Self::MySql => 3306,
            Self::Postgres => 5432,
            Self::SqlServer => 1433,
            Self::Oracle => 1521,
            Self::MongoDb => 27017,
        }
    }
}

impl std::fmt::Display for EngineFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connection configuration for database engines
///
/// Immutable for the duration of one orchestration call. The `engine` field is
/// the free-form family name as stored by the connection registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Engine family name (resolved with [`EngineFamily::resolve`])
    pub engine: String,

    /// Hostname
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port number (defaults to the family's conventional port)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Username
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Password
    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Database name (service name for Oracle)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl ConnectionConfig {
    /// Create a connection config with every parameter set
    #[must_use]
    pub fn new(
        engine: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            engine: engine.into(),
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password: Some(password.into()),
            database: Some(database.into()),
        }
    }

    /// Create a config for `family` on its conventional port
    #[must_use]
    pub fn for_family(
        family: EngineFamily,
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self::new(family.as_str(), host, family.default_port(), user, password, database)
    }

    /// Resolve the engine family named by this config
    pub fn family(&self) -> Result<EngineFamily> {
        EngineFamily::resolve(&self.engine)
    }

    /// Port, falling back to the family default
    #[must_use]
    pub fn port_or_default(&self, family: EngineFamily) -> u16 {
        self.port.unwrap_or_else(|| family.default_port())
    }

    /// Fetch a required string parameter or fail with an engine-specific message
    pub(crate) fn require<'a>(
        value: Option<&'a String>,
        family: EngineFamily,
        parameter: &str,
    ) -> Result<&'a str> {
        value.map(String::as_str).ok_or_else(|| {
            NlQueryError::invalid_input(format!(
                "{} requires '{parameter}' parameter",
                family.display_name()
            ))
        })
    }
}

/// Introspected database structure
///
/// Rebuilt on every orchestration call; never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaInfo {
    /// Tables of a relational engine
    Relational { tables: Vec<TableInfo> },
    /// Collections of the document store
    Document { collections: Vec<CollectionInfo> },
}

impl SchemaInfo {
    /// Number of tables or collections
    #[must_use]
    pub fn object_count(&self) -> usize {
        match self {
            Self::Relational { tables } => tables.len(),
            Self::Document { collections } => collections.len(),
        }
    }
}

/// Table information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table name
    pub name: String,

    /// Columns in ordinal order
    pub columns: Vec<ColumnInfo>,

    /// Primary key columns in key order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_keys: Vec<String>,

    /// Foreign key edges
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyInfo>,
}

/// Column information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,

    /// Column data type (engine-specific)
    pub data_type: String,

    /// Whether column allows NULL values
    pub nullable: bool,

    /// Whether column is part of the primary key
    pub is_primary_key: bool,

    /// Stored column comment (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Foreign key edge (one per referencing column)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    /// Column in this table
    pub column: String,

    /// Referenced table name
    pub referenced_table: String,

    /// Referenced column name
    pub referenced_column: String,
}

/// Collection information (document store)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Collection name
    pub name: String,

    /// Fields observed in sampled documents, in first-seen order
    pub fields: Vec<FieldInfo>,
}

/// Field observed in sampled documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Field name
    pub name: String,

    /// Runtime type of the first sampled value
    pub inferred_type: String,

    /// `_id` by convention
    pub is_primary_key: bool,
}

/// One result row: column/field name to value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Homogeneous sequence of rows for every engine (documents are rows)
pub type ResultSet = Vec<Row>;

/// Database engine trait
///
/// An adapter wraps one live connection. All methods run against that
/// connection; `close` releases it and may be called more than once.
pub trait DatabaseEngine: Send {
    /// Family this adapter speaks
    fn family(&self) -> EngineFamily;

    /// Enumerate tables/collections with their columns/fields and keys
    ///
    /// Failures are reported as `SchemaIntrospection` errors.
    fn introspect(&mut self) -> impl Future<Output = Result<SchemaInfo>> + Send;

    /// Execute a statement in the engine's native query language
    ///
    /// Failures are reported as `StatementExecution` errors.
    fn execute(&mut self, statement: &str) -> impl Future<Output = Result<ResultSet>> + Send;

    /// Release the connection. Idempotent, swallows its own errors.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens adapters for a resolved engine family
pub trait EngineConnector: Send + Sync {
    /// Adapter type produced by this connector
    type Engine: DatabaseEngine;

    /// Open one connection. Failures are reported as `Connection` errors.
    fn open(
        &self,
        family: EngineFamily,
        config: &ConnectionConfig,
    ) -> impl Future<Output = Result<Self::Engine>> + Send;
}

/// Adapter over the native driver for each compiled-in family
pub enum EngineAdapter {
    #[cfg(feature = "mysql")]
    MySql(mysql::MySqlEngine),
    #[cfg(feature = "postgres")]
    Postgres(postgres::PostgresEngine),
    #[cfg(feature = "mssql")]
    SqlServer(mssql::SqlServerEngine),
    #[cfg(feature = "oracle")]
    Oracle(oracle::OracleEngine),
    #[cfg(feature = "mongodb")]
    MongoDb(mongodb::MongoEngine),
}

impl EngineAdapter {
    /// Open a native connection for `family`
    pub async fn open(family: EngineFamily, config: &ConnectionConfig) -> Result<Self> {
        match family {
            #[cfg(feature = "mysql")]
            EngineFamily::MySql => Ok(Self::MySql(mysql::MySqlEngine::open(config).await?)),
            #[cfg(feature = "postgres")]
            EngineFamily::Postgres => {
                Ok(Self::Postgres(postgres::PostgresEngine::open(config).await?))
            }
            #[cfg(feature = "mssql")]
            EngineFamily::SqlServer => {
                Ok(Self::SqlServer(mssql::SqlServerEngine::open(config).await?))
            }
            #[cfg(feature = "oracle")]
            EngineFamily::Oracle => Ok(Self::Oracle(oracle::OracleEngine::open(config).await?)),
            #[cfg(feature = "mongodb")]
            EngineFamily::MongoDb => Ok(Self::MongoDb(mongodb::MongoEngine::open(config).await?)),
            #[allow(unreachable_patterns)]
            other => Err(NlQueryError::unsupported_engine(format!(
                "{} support not compiled in",
                other.display_name()
            ))),
        }
    }
}

impl DatabaseEngine for EngineAdapter {
    fn family(&self) -> EngineFamily {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(engine) => engine.family(),
            #[cfg(feature = "postgres")]
            Self::Postgres(engine) => engine.family(),
            #[cfg(feature = "mssql")]
            Self::SqlServer(engine) => engine.family(),
            #[cfg(feature = "oracle")]
            Self::Oracle(engine) => engine.family(),
            #[cfg(feature = "mongodb")]
            Self::MongoDb(engine) => engine.family(),
            #[allow(unreachable_patterns)]
            _ => unreachable!("engine adapter without a compiled-in driver"),
        }
    }

    async fn introspect(&mut self) -> Result<SchemaInfo> {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(engine) => engine.introspect().await,
            #[cfg(feature = "postgres")]
            Self::Postgres(engine) => engine.introspect().await,
            #[cfg(feature = "mssql")]
            Self::SqlServer(engine) => engine.introspect().await,
            #[cfg(feature = "oracle")]
            Self::Oracle(engine) => engine.introspect().await,
            #[cfg(feature = "mongodb")]
            Self::MongoDb(engine) => engine.introspect().await,
            #[allow(unreachable_patterns)]
            _ => unreachable!("engine adapter without a compiled-in driver"),
        }
    }

    async fn execute(&mut self, statement: &str) -> Result<ResultSet> {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(engine) => engine.execute(statement).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(engine) => engine.execute(statement).await,
            #[cfg(feature = "mssql")]
            Self::SqlServer(engine) => engine.execute(statement).await,
            #[cfg(feature = "oracle")]
            Self::Oracle(engine) => engine.execute(statement).await,
            #[cfg(feature = "mongodb")]
            Self::MongoDb(engine) => engine.execute(statement).await,
            #[allow(unreachable_patterns)]
            _ => unreachable!("engine adapter without a compiled-in driver"),
        }
    }

    async fn close(&mut self) {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(engine) => engine.close().await,
            #[cfg(feature = "postgres")]
            Self::Postgres(engine) => engine.close().await,
            #[cfg(feature = "mssql")]
            Self::SqlServer(engine) => engine.close().await,
            #[cfg(feature = "oracle")]
            Self::Oracle(engine) => engine.close().await,
            #[cfg(feature = "mongodb")]
            Self::MongoDb(engine) => engine.close().await,
            #[allow(unreachable_patterns)]
            _ => unreachable!("engine adapter without a compiled-in driver"),
        }
    }
}

/// Connector backed by the native drivers
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

impl EngineConnector for NativeConnector {
    type Engine = EngineAdapter;

    async fn open(&self, family: EngineFamily, config: &ConnectionConfig) -> Result<EngineAdapter> {
        EngineAdapter::open(family, config).await
    }
}
