//! nlquery - Natural-Language Database Query Orchestrator
//!
//! nlquery answers free-text questions against a live database. It introspects
//! the schema, asks a completion engine for statements in the engine's native
//! query language, runs them, feeds results (or errors) back, and stops when
//! the completion engine gives a final answer or the iteration budget runs out.
//!
//! # Supported Engines
//! `MySQL`/`MariaDB`, `PostgreSQL`, Microsoft SQL Server, Oracle and `MongoDB`,
//! each behind its own cargo feature.
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`engine`] - Engine adapters, schema model and connection config
//! - [`prompt`] - System and running prompt rendering
//! - [`agent`] - Orchestration loop and reply parser
//! - [`completion`] - Completion engine trait and HTTP client
//! - [`cancellation`] - Post-hoc cancellation and usage settlement
//! - [`config`] - Settings and config file registry
//! - [`output`] - JSON output envelope types

pub mod agent;
pub mod cancellation;
pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod prompt;

pub use agent::parser::{parse_reply, ParsedAction};
pub use agent::{OrchestrationResult, Orchestrator, QueryAttempt, Termination, MAX_ITERATIONS};
pub use cancellation::{settle, CancellationRegistry, InMemoryCancellations, InMemoryUsage, Settlement, UsageLedger};
pub use completion::{CompletionEngine, CompletionRequest, HttpCompletionEngine};
pub use config::{AppConfig, CompletionOverrides, CompletionSettings, StoredCompletion, StoredConnection};
pub use engine::{
    CollectionInfo, ColumnInfo, ConnectionConfig, DatabaseEngine, EngineAdapter, EngineConnector, EngineFamily,
    FieldInfo, ForeignKeyInfo, NativeConnector, ResultSet, Row, SchemaInfo, TableInfo,
};
pub use error::{NlQueryError, Result};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use prompt::build_system_prompt;
