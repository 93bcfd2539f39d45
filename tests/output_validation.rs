//! Output Validation Tests
//!
//! This module validates that everything the CLI prints has a stable JSON shape:
//! - Success envelopes match the expected schema
//! - Error envelopes match the expected schema
//! - Orchestration results and schemas serialize to pure JSON
//! - Error codes come from a fixed set

mod common;

use common::{row, users_collection, users_schema};
use nlquery::{
    ErrorEnvelope, ErrorInfo, Metadata, NlQueryError, OrchestrationResult, QueryAttempt, SchemaInfo, SuccessEnvelope,
    Termination,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn top_level_keys(value: &Value) -> Vec<&str> {
    let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

fn answered_result() -> OrchestrationResult {
    OrchestrationResult {
        answer_text: "There are 42 active users.".to_string(),
        iteration_count: 3,
        queries_executed_count: 2,
        transcript: vec![
            QueryAttempt {
                statement: "SELECT COUNT(*) FROM users WHERE actve=1".to_string(),
                reasoning: Some("count active".to_string()),
                rows: None,
                error: Some("Unknown column 'actve'".to_string()),
                execution_ms: 3,
            },
            QueryAttempt {
                statement: "SELECT COUNT(*) AS count FROM users WHERE active=1".to_string(),
                reasoning: None,
                rows: Some(vec![row(&[("count", json!(42))])]),
                error: None,
                execution_ms: 2,
            },
        ],
        termination: Termination::Answered,
        error_tag: None,
    }
}

// ============================================================================
// Envelope Structure Tests
// ============================================================================

#[test]
fn test_success_envelope_structure() {
    let result = answered_result();
    let meta = Metadata::for_orchestration(120, &result);
    let envelope = SuccessEnvelope::new("mysql", "ask", result, meta);

    let json_value = serde_json::to_value(&envelope).expect("Should serialize");

    assert_eq!(top_level_keys(&json_value), vec!["command", "data", "engine", "meta", "ok"]);
    assert_eq!(json_value["ok"], true);
    assert_eq!(json_value["engine"], "mysql");
    assert_eq!(json_value["command"], "ask");
    assert_eq!(json_value["meta"], json!({"execution_ms": 120, "iterations": 3, "queries_executed": 2}));
}

#[test]
fn test_error_envelope_structure() {
    let envelope = ErrorEnvelope::new("oracle", "schema", ErrorInfo::new("TEST_ERROR", "Test error message"));

    let json_value = serde_json::to_value(&envelope).expect("Should serialize");

    assert_eq!(top_level_keys(&json_value), vec!["command", "engine", "error", "ok"]);
    assert_eq!(json_value["ok"], false);
    assert_eq!(json_value["error"], json!({"code": "TEST_ERROR", "message": "Test error message"}));
}

#[test]
fn test_error_envelope_carries_no_credentials() {
    let err = NlQueryError::connection("postgres", "password authentication failed for user \"app\"");
    let envelope = ErrorEnvelope::from_error("postgres", "ask", &err);

    let json_str = serde_json::to_string(&envelope).expect("Should serialize");
    assert!(json_str.contains("CONNECTION_FAILED"));
    assert!(!json_str.contains("secret"));
}

// ============================================================================
// Payload Serialization Tests
// ============================================================================

#[test]
fn test_orchestration_result_shape() {
    let json_value = serde_json::to_value(answered_result()).expect("Should serialize");

    assert_eq!(
        top_level_keys(&json_value),
        vec!["answer_text", "iteration_count", "queries_executed_count", "termination", "transcript"]
    );
    assert_eq!(json_value["termination"], "answered");

    let failed = &json_value["transcript"][0];
    assert_eq!(failed["error"], "Unknown column 'actve'");
    assert!(failed.get("rows").is_none());

    let succeeded = &json_value["transcript"][1];
    assert_eq!(succeeded["rows"], json!([{"count": 42}]));
    assert!(succeeded.get("error").is_none());
    assert!(succeeded.get("reasoning").is_none());
}

#[test]
fn test_failed_orchestration_reports_error_tag() {
    let mut result = answered_result();
    result.termination = Termination::IterationBudgetExhausted;
    result.error_tag = Termination::IterationBudgetExhausted.error_tag().map(str::to_string);

    let json_value = serde_json::to_value(&result).expect("Should serialize");
    assert_eq!(json_value["termination"], "iteration_budget_exhausted");
    assert_eq!(json_value["error_tag"], "iteration budget exhausted");
}

#[test]
fn test_schema_info_is_tagged_by_kind() {
    let relational = serde_json::to_value(users_schema()).expect("Should serialize");
    assert_eq!(relational["kind"], "relational");
    assert_eq!(relational["tables"][0]["name"], "users");
    assert_eq!(relational["tables"][0]["primary_keys"], json!(["id"]));

    let document = serde_json::to_value(users_collection()).expect("Should serialize");
    assert_eq!(document["kind"], "document");
    assert_eq!(document["collections"][0]["fields"][0]["name"], "_id");

    let round_trip: SchemaInfo = serde_json::from_value(relational).expect("Should deserialize");
    assert_eq!(round_trip, users_schema());
}

#[test]
fn test_result_rows_preserve_column_order() {
    let rows = vec![row(&[("zeta", json!(1)), ("alpha", json!(2)), ("mid", json!(null))])];
    let json_str = serde_json::to_string(&rows).expect("Should serialize");
    assert_eq!(json_str, r#"[{"zeta":1,"alpha":2,"mid":null}]"#);
}

// ============================================================================
// Error Code Tests
// ============================================================================

#[test]
fn test_all_error_codes_are_consistent() {
    let valid_codes = [
        "CONNECTION_FAILED",
        "UNSUPPORTED_ENGINE",
        "SCHEMA_INTROSPECTION_FAILED",
        "COMPLETION_ENGINE_FAILED",
        "STATEMENT_FAILED",
        "EMPTY_RESPONSE",
        "INVALID_INPUT",
        "CONFIG_ERROR",
    ];

    let errors = [
        NlQueryError::connection("mysql", "test"),
        NlQueryError::unsupported_engine("test"),
        NlQueryError::introspection("oracle", "test"),
        NlQueryError::completion("test"),
        NlQueryError::statement("test"),
        NlQueryError::EmptyResponse,
        NlQueryError::invalid_input("test"),
        NlQueryError::config_error("test"),
    ];

    for err in &errors {
        assert!(valid_codes.contains(&err.error_code()), "unexpected code {}", err.error_code());
    }
    assert_eq!(errors.iter().filter(|e| !e.is_fatal()).count(), 1);
}
