//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout nlquery.
//! All errors are structured and map to stable error codes for JSON output.
//!
//! # Error Categories
//! - `Connection`: the database connection could not be opened
//! - `UnsupportedEngine`: the engine family name was not recognized
//! - `SchemaIntrospection`: a metadata catalog query failed
//! - `CompletionEngine`: the completion engine failed or returned unusable output
//! - `StatementExecution`: a generated statement failed (the only recoverable error)
//! - `EmptyResponse`: the completion engine produced a blank reply
//! - `InvalidInput`: malformed connection parameters
//! - `Config`: configuration file or environment resolution errors

use thiserror::Error;

/// Main error type for nlquery operations
#[derive(Error, Debug)]
pub enum NlQueryError {
    /// Database connection could not be opened
    #[error("Connection failed ({engine}): {detail}")]
    Connection { engine: String, detail: String },

    /// Engine family not recognized (or not compiled in)
    #[error("Unsupported engine: {0}")]
    UnsupportedEngine(String),

    /// Metadata catalog query failed
    #[error("Schema introspection failed ({engine}): {detail}")]
    SchemaIntrospection { engine: String, detail: String },

    /// Completion call raised, timed out, or returned unusable output
    #[error("Completion engine error: {0}")]
    CompletionEngine(String),

    /// A generated statement failed against the database
    #[error("Statement execution failed: {0}")]
    StatementExecution(String),

    /// Completion engine produced a blank reply
    #[error("Completion engine returned an empty response")]
    EmptyResponse,

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error (file not found, invalid JSON, missing env var)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl NlQueryError {
    /// Convert error to error code string for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "CONNECTION_FAILED",
            Self::UnsupportedEngine(_) => "UNSUPPORTED_ENGINE",
            Self::SchemaIntrospection { .. } => "SCHEMA_INTROSPECTION_FAILED",
            Self::CompletionEngine(_) => "COMPLETION_ENGINE_FAILED",
            Self::StatementExecution(_) => "STATEMENT_FAILED",
            Self::EmptyResponse => "EMPTY_RESPONSE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Get human-readable error message (no credentials)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Whether this error ends an orchestration call.
    ///
    /// Statement failures are fed back to the completion engine instead.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::StatementExecution(_))
    }

    /// Create a connection error
    pub fn connection(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Connection { engine: engine.into(), detail: detail.into() }
    }

    /// Create an unsupported engine error
    pub fn unsupported_engine(message: impl Into<String>) -> Self {
        Self::UnsupportedEngine(message.into())
    }

    /// Create a schema introspection error
    pub fn introspection(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SchemaIntrospection { engine: engine.into(), detail: detail.into() }
    }

    /// Create a completion engine error
    pub fn completion(message: impl Into<String>) -> Self {
        Self::CompletionEngine(message.into())
    }

    /// Create a statement execution error
    pub fn statement(message: impl Into<String>) -> Self {
        Self::StatementExecution(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type alias for nlquery operations
pub type Result<T> = std::result::Result<T, NlQueryError>;
