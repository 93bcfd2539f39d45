//! Orchestration Scenario Tests
//!
//! Drives the full loop with a scripted completion engine and in-memory
//! engines. Covers:
//! - End-to-end question/query/answer exchanges
//! - Statement failures fed back for self-correction
//! - The iteration cap
//! - Fatal terminations and their error tags
//! - Connection lifecycle on every exit path

mod common;

use common::{config_for, row, schema_for, users_schema, FakeConnector, ScriptedCompletion};
use nlquery::{
    settle, EngineFamily, InMemoryCancellations, InMemoryUsage, NlQueryError, Orchestrator, Settlement, Termination,
    MAX_ITERATIONS,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const COUNT_QUERY: &str = "ACTION: QUERY\nSQL: SELECT COUNT(*) FROM users WHERE active=1\nREASONING: count active";
const COUNT_ANSWER: &str = "ACTION: ANSWER\nRESPONSE: There are 42 active users.";

fn orchestrator(completion: &ScriptedCompletion, connector: &FakeConnector) -> Orchestrator<ScriptedCompletion, FakeConnector> {
    Orchestrator::with_connector(completion.clone(), connector.clone())
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[tokio::test]
async fn test_query_then_answer() {
    let completion = ScriptedCompletion::replies(&[COUNT_QUERY, COUNT_ANSWER]);
    let connector = FakeConnector::new(users_schema()).with_results(vec![Ok(vec![row(&[("count", json!(42))])])]);

    let result = orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::MySql), "How many active users are there?")
        .await
        .unwrap();

    assert_eq!(result.answer_text, "There are 42 active users.");
    assert_eq!(result.iteration_count, 2);
    assert_eq!(result.queries_executed_count, 1);
    assert_eq!(result.termination, Termination::Answered);
    assert_eq!(result.error_tag, None);

    assert_eq!(connector.executed(), vec!["SELECT COUNT(*) FROM users WHERE active=1".to_string()]);
    let attempt = &result.transcript[0];
    assert_eq!(attempt.reasoning.as_deref(), Some("count active"));
    assert_eq!(attempt.rows, Some(vec![row(&[("count", json!(42))])]));

    let second = completion.user_prompt(1);
    assert!(second.contains("[1] SQL: SELECT COUNT(*) FROM users WHERE active=1"));
    assert!(second.contains("Result (1 rows):"));
    assert!(second.contains(r#"{"count":42}"#));

    assert_eq!(connector.open_now(), 0);
}

#[tokio::test]
async fn test_immediate_answer() {
    let completion = ScriptedCompletion::replies(&["ACTION: ANSWER\nRESPONSE: The users table is empty."]);
    let connector = FakeConnector::new(users_schema());

    let result = orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::Postgres), "Are there any users?")
        .await
        .unwrap();

    assert_eq!(result.answer_text, "The users table is empty.");
    assert_eq!(result.iteration_count, 1);
    assert_eq!(result.queries_executed_count, 0);
    assert!(result.transcript.is_empty());
    assert!(connector.executed().is_empty());
    assert!(completion.user_prompt(0).contains("No queries have been run yet."));
}

#[tokio::test]
async fn test_iteration_budget_exhausted() {
    let completion = ScriptedCompletion::repeating(COUNT_QUERY);
    let connector = FakeConnector::new(users_schema());

    let result = orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::SqlServer), "How many active users are there?")
        .await
        .unwrap();

    assert_eq!(result.termination, Termination::IterationBudgetExhausted);
    assert_eq!(result.error_tag.as_deref(), Some("iteration budget exhausted"));
    assert_eq!(result.iteration_count, 10);
    assert_eq!(result.queries_executed_count, 10);
    assert_eq!(completion.calls(), MAX_ITERATIONS);
    assert_eq!(connector.open_now(), 0);
}

#[tokio::test]
async fn test_failed_statement_is_fed_back() {
    let completion = ScriptedCompletion::replies(&[
        "ACTION: QUERY\nSQL: SELECT COUNT(*) FROM users WHERE actve=1\nREASONING: count active",
        COUNT_ANSWER,
    ]);
    let connector =
        FakeConnector::new(users_schema()).with_results(vec![Err("Unknown column 'actve' in 'where clause'")]);

    let result = orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::MySql), "How many active users are there?")
        .await
        .unwrap();

    assert!(result.is_answered());
    assert_eq!(result.answer_text, "There are 42 active users.");
    assert_eq!(result.queries_executed_count, 1);

    let attempt = &result.transcript[0];
    assert!(!attempt.succeeded());
    assert_eq!(attempt.rows, None);
    assert_eq!(attempt.error.as_deref(), Some("Unknown column 'actve' in 'where clause'"));

    assert!(completion.user_prompt(1).contains("Error: Unknown column 'actve' in 'where clause'"));
}

// ============================================================================
// Loop bounds and prompt contents
// ============================================================================

#[tokio::test]
async fn test_never_exceeds_iteration_cap_with_failing_statements() {
    let completion = ScriptedCompletion::repeating("ACTION: QUERY\nSQL: SELECT nope FROM users");
    let connector = FakeConnector::new(users_schema())
        .with_results((0..20).map(|_| Err("Unknown column 'nope'")).collect());

    let result = orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::Oracle), "What is nope?")
        .await
        .unwrap();

    assert_eq!(completion.calls(), MAX_ITERATIONS);
    assert_eq!(result.queries_executed_count, MAX_ITERATIONS);
    assert!(result.transcript.iter().all(|attempt| !attempt.succeeded()));
}

#[tokio::test]
async fn test_prompts_track_remaining_turns() {
    let completion = ScriptedCompletion::repeating(COUNT_QUERY);
    let connector = FakeConnector::new(users_schema());

    orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::Postgres), "How many active users are there?")
        .await
        .unwrap();

    assert!(completion.user_prompt(0).contains("You have 10 turns left."));
    assert!(!completion.user_prompt(0).contains("last turn"));
    assert!(completion.user_prompt(9).contains("You have 1 turn left."));
    assert!(completion.user_prompt(9).contains("This is the last turn"));
    assert!(completion.user_prompt(9).contains("[9] SQL:"));
}

#[tokio::test]
async fn test_every_request_carries_schema_and_sampling_bounds() {
    let completion = ScriptedCompletion::replies(&[COUNT_QUERY, COUNT_ANSWER]);
    let connector = FakeConnector::new(users_schema());

    orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::MySql), "How many active users are there?")
        .await
        .unwrap();

    let requests = completion.requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert!(request.system_prompt.contains("Table: users"));
        assert!(request.system_prompt.contains("-- 1 when the account is enabled"));
        assert!((request.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(request.max_output_tokens, 2000);
        assert!(request.user_prompt.starts_with("Question: How many active users are there?"));
    }
    assert_eq!(requests[0].system_prompt, requests[1].system_prompt);
}

// ============================================================================
// Fatal terminations
// ============================================================================

#[tokio::test]
async fn test_completion_failure_keeps_partial_transcript() {
    let completion = ScriptedCompletion::outcomes(vec![Ok(COUNT_QUERY), Err("HTTP 503 Service Unavailable")]);
    let connector = FakeConnector::new(users_schema());

    let result = orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::Postgres), "How many active users are there?")
        .await
        .unwrap();

    assert_eq!(result.termination, Termination::CompletionFailed);
    assert_eq!(result.error_tag.as_deref(), Some("completion engine error"));
    assert_eq!(result.iteration_count, 2);
    assert_eq!(result.queries_executed_count, 1);
    assert!(result.answer_text.contains("HTTP 503"));
    assert_eq!(completion.calls(), 2);
    assert_eq!(connector.open_now(), 0);
}

#[tokio::test]
async fn test_empty_reply() {
    let completion = ScriptedCompletion::replies(&["  \n  "]);
    let connector = FakeConnector::new(users_schema());

    let result = orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::MySql), "How many users?")
        .await
        .unwrap();

    assert_eq!(result.termination, Termination::EmptyResponse);
    assert_eq!(result.error_tag.as_deref(), Some("empty response"));
    assert_eq!(result.iteration_count, 1);
    assert_eq!(completion.calls(), 1);
    assert_eq!(connector.opened(), 1);
    assert_eq!(connector.open_now(), 0);
}

#[tokio::test]
async fn test_unparseable_reply_is_returned_verbatim() {
    for reply in ["hmm", "ACTION: QUERY"] {
        let completion = ScriptedCompletion::replies(&[reply]);
        let connector = FakeConnector::new(users_schema());

        let result = orchestrator(&completion, &connector)
            .run(&config_for(EngineFamily::MySql), "How many users?")
            .await
            .unwrap();

        assert_eq!(result.termination, Termination::UnparseableResponse);
        assert_eq!(result.error_tag.as_deref(), Some("unparseable response"));
        assert_eq!(result.answer_text, reply);
        assert!(connector.executed().is_empty());
        assert_eq!(connector.open_now(), 0);
    }
}

#[tokio::test]
async fn test_free_text_reply_is_an_answer() {
    let completion = ScriptedCompletion::replies(&["Most of your users signed up in March."]);
    let connector = FakeConnector::new(users_schema());

    let result = orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::MySql), "When did users sign up?")
        .await
        .unwrap();

    assert!(result.is_answered());
    assert_eq!(result.answer_text, "Most of your users signed up in March.");
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test]
async fn test_connection_closed_for_every_family() {
    for family in EngineFamily::ALL {
        let completion = ScriptedCompletion::replies(&[COUNT_QUERY, COUNT_ANSWER]);
        let connector = FakeConnector::new(schema_for(family));

        let result = orchestrator(&completion, &connector)
            .run(&config_for(family), "How many active users are there?")
            .await
            .unwrap();

        assert!(result.is_answered(), "{family} did not answer");
        assert_eq!(connector.opened(), 1, "{family} opened more than one connection");
        assert_eq!(connector.open_now(), 0, "{family} left a connection open");
        assert!(completion.requests()[0].system_prompt.contains(family.display_name()));
    }
}

#[tokio::test]
async fn test_document_store_prompts_use_query_label() {
    let completion = ScriptedCompletion::replies(&[
        "ACTION: QUERY\nQUERY: db.users.countDocuments({\"active\": true})\nREASONING: count",
        COUNT_ANSWER,
    ]);
    let connector = FakeConnector::new(schema_for(EngineFamily::MongoDb))
        .with_results(vec![Ok(vec![row(&[("count", json!(42))])])]);

    let result = orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::MongoDb), "How many active users are there?")
        .await
        .unwrap();

    assert_eq!(connector.executed(), vec![r#"db.users.countDocuments({"active": true})"#.to_string()]);
    assert_eq!(result.queries_executed_count, 1);
    assert!(completion.requests()[0].system_prompt.contains("Collection: users"));
    assert!(completion.user_prompt(1).contains("[1] QUERY: db.users.countDocuments"));
}

#[tokio::test]
async fn test_unsupported_engine_opens_nothing() {
    let completion = ScriptedCompletion::replies(&[COUNT_ANSWER]);
    let connector = FakeConnector::new(users_schema());
    let mut config = config_for(EngineFamily::MySql);
    config.engine = "IBM DB2".to_string();

    let err = orchestrator(&completion, &connector).run(&config, "How many users?").await.unwrap_err();

    assert!(matches!(err, NlQueryError::UnsupportedEngine(_)));
    assert_eq!(connector.opened(), 0);
    assert_eq!(completion.calls(), 0);
}

#[tokio::test]
async fn test_connection_failure_is_an_error() {
    let completion = ScriptedCompletion::replies(&[COUNT_ANSWER]);
    let connector = FakeConnector::new(users_schema()).refusing_connections();

    let err = orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::Postgres), "How many users?")
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "CONNECTION_FAILED");
    assert_eq!(completion.calls(), 0);
}

#[tokio::test]
async fn test_introspection_failure_closes_connection() {
    let completion = ScriptedCompletion::replies(&[COUNT_ANSWER]);
    let connector = FakeConnector::new(users_schema()).failing_introspection("permission denied for schema public");

    let err = orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::Postgres), "How many users?")
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "SCHEMA_INTROSPECTION_FAILED");
    assert!(err.message().contains("permission denied"));
    assert_eq!(connector.opened(), 1);
    assert_eq!(connector.open_now(), 0);
    assert_eq!(completion.calls(), 0);
}

#[tokio::test]
async fn test_blank_question_is_rejected() {
    let completion = ScriptedCompletion::replies(&[COUNT_ANSWER]);
    let connector = FakeConnector::new(users_schema());

    let err = orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::MySql), "   ")
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "INVALID_INPUT");
    assert_eq!(connector.opened(), 0);
}

// ============================================================================
// Settlement
// ============================================================================

#[tokio::test]
async fn test_cancelled_thread_suppresses_answer() {
    let completion = ScriptedCompletion::replies(&[COUNT_QUERY, COUNT_ANSWER]);
    let connector = FakeConnector::new(users_schema());
    let cancellations = InMemoryCancellations::new();
    let usage = InMemoryUsage::new();

    let result = orchestrator(&completion, &connector)
        .run(&config_for(EngineFamily::MySql), "How many active users are there?")
        .await
        .unwrap();

    // Cancelled while the call was in flight; the loop ran to completion anyway.
    cancellations.cancel("thread-7");
    assert_eq!(result.iteration_count, 2);

    assert_eq!(settle(&result, "thread-7", "alice", &cancellations, &usage), Settlement::Suppressed);
    assert_eq!(usage.count("alice"), 0);

    assert_eq!(settle(&result, "thread-8", "alice", &cancellations, &usage), Settlement::Deliver { counted: true });
    assert_eq!(usage.count("alice"), 1);
}
