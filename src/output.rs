//! JSON Output Envelope Types
//!
//! Every CLI command prints exactly one envelope to stdout.
//!
//! # Output Contract
//! - Success: `{"ok": true, "engine": "...", "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "engine": "...", "command": "...", "error": {"code": "...", "message": "..."}}`

use serde::{Deserialize, Serialize};

use crate::agent::OrchestrationResult;
use crate::error::NlQueryError;

/// Success envelope for command results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Engine family the command ran against
    pub engine: String,

    /// Command that was executed (ask, schema)
    pub command: String,

    /// Command-specific data
    pub data: T,

    /// Execution metadata
    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    /// Create a new success envelope
    pub fn new(engine: impl Into<String>, command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, engine: engine.into(), command: command.into(), data, meta }
    }
}

/// Error envelope for command failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Engine family (empty string if the failure happened before resolution)
    pub engine: String,

    /// Command that was attempted
    pub command: String,

    /// Error information
    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    /// Create a new error envelope
    pub fn new(engine: impl Into<String>, command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, engine: engine.into(), command: command.into(), error }
    }

    /// Create error envelope from `NlQueryError`
    pub fn from_error(engine: impl Into<String>, command: impl Into<String>, err: &NlQueryError) -> Self {
        Self::new(engine, command, ErrorInfo::new(err.error_code(), err.message()))
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "CONNECTION_FAILED", "COMPLETION_ENGINE_FAILED")
    pub code: String,

    /// Human-readable error message (no credentials)
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Wall-clock time of the whole command in milliseconds
    pub execution_ms: u64,

    /// Completion calls made (ask only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,

    /// Statements executed, failed ones included (ask only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queries_executed: Option<usize>,
}

impl Metadata {
    /// Create new metadata with just execution time
    #[must_use]
    pub fn new(execution_ms: u64) -> Self {
        Self { execution_ms, iterations: None, queries_executed: None }
    }

    /// Metadata for a finished orchestration call
    #[must_use]
    pub fn for_orchestration(execution_ms: u64, result: &OrchestrationResult) -> Self {
        Self {
            execution_ms,
            iterations: Some(result.iteration_count),
            queries_executed: Some(result.queries_executed_count),
        }
    }
}
