//! Orchestration Loop
//!
//! An orchestration call answers one natural-language question:
//!
//! 1. Resolve the engine family and open one connection.
//! 2. Introspect the schema and render the system prompt.
//! 3. Iterate at most [`MAX_ITERATIONS`] times: ask the completion engine,
//!    parse the reply, run the statement it proposes (recording the attempt
//!    in the transcript) or stop on an answer.
//! 4. Close the connection on every exit path.
//!
//! Connection, engine resolution and introspection failures are returned as
//! `Err`. Once the loop has started, every termination (including completion
//! failures) is an `Ok(OrchestrationResult)` carrying the partial transcript,
//! with [`OrchestrationResult::error_tag`] set for the failure cases.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::completion::{CompletionEngine, CompletionRequest};
use crate::engine::{ConnectionConfig, DatabaseEngine, EngineConnector, EngineFamily, NativeConnector, ResultSet};
use crate::error::{NlQueryError, Result};
use crate::prompt::{build_system_prompt, render_running_prompt};

pub mod parser;

use parser::{parse_reply, ParsedAction};

/// Completion calls allowed per orchestration call
pub const MAX_ITERATIONS: usize = 10;

/// Sampling temperature for every completion call
pub const COMPLETION_TEMPERATURE: f32 = 0.1;

/// Output token bound for every completion call
pub const MAX_OUTPUT_TOKENS: u32 = 2000;

/// One statement executed during an orchestration call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAttempt {
    /// Statement as sent to the database
    pub statement: String,

    /// Reasoning the completion engine gave for it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Rows returned (absent when the statement failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<ResultSet>,

    /// Database error message (absent when the statement succeeded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock execution time
    pub execution_ms: u64,
}

impl QueryAttempt {
    /// Whether the statement ran without error
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// How an orchestration call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The completion engine gave a final answer
    Answered,
    /// The reply could not be parsed; the raw reply is returned as the answer
    UnparseableResponse,
    /// No answer within the iteration budget
    IterationBudgetExhausted,
    /// The completion call failed
    CompletionFailed,
    /// The completion engine returned a blank reply
    EmptyResponse,
}

impl Termination {
    /// Error tag reported to the caller (`None` for a clean answer)
    #[must_use]
    pub const fn error_tag(&self) -> Option<&'static str> {
        match self {
            Self::Answered => None,
            Self::UnparseableResponse => Some("unparseable response"),
            Self::IterationBudgetExhausted => Some("iteration budget exhausted"),
            Self::CompletionFailed => Some("completion engine error"),
            Self::EmptyResponse => Some("empty response"),
        }
    }
}

/// Result of one orchestration call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestrationResult {
    /// Final answer, degraded reply, or failure explanation
    pub answer_text: String,

    /// Completion calls made
    pub iteration_count: usize,

    /// Statements executed, failed ones included
    pub queries_executed_count: usize,

    /// Every statement executed, in order
    pub transcript: Vec<QueryAttempt>,

    /// How the call ended
    pub termination: Termination,

    /// Set for every termination except a clean answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_tag: Option<String>,
}

impl OrchestrationResult {
    fn finish(
        termination: Termination,
        answer_text: impl Into<String>,
        iteration_count: usize,
        transcript: Vec<QueryAttempt>,
    ) -> Self {
        Self {
            answer_text: answer_text.into(),
            iteration_count,
            queries_executed_count: transcript.len(),
            transcript,
            termination,
            error_tag: termination.error_tag().map(str::to_string),
        }
    }

    /// Whether the call ended with a clean answer
    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.termination == Termination::Answered
    }
}

/// Drives the question/statement/answer loop
///
/// Holds no per-call state; one orchestrator can serve concurrent calls.
pub struct Orchestrator<C, K = NativeConnector> {
    completion: C,
    connector: K,
}

impl<C: CompletionEngine> Orchestrator<C> {
    /// Orchestrator over the native database drivers
    pub fn new(completion: C) -> Self {
        Self { completion, connector: NativeConnector }
    }
}

impl<C: CompletionEngine, K: EngineConnector> Orchestrator<C, K> {
    /// Orchestrator with a custom connector
    pub fn with_connector(completion: C, connector: K) -> Self {
        Self { completion, connector }
    }

    /// Answer `question` against the database described by `config`
    ///
    /// The connection is opened before introspection and closed after the
    /// loop, whichever way the call ends.
    pub async fn run(&self, config: &ConnectionConfig, question: &str) -> Result<OrchestrationResult> {
        if question.trim().is_empty() {
            return Err(NlQueryError::invalid_input("question must not be empty"));
        }

        let family = config.family()?;
        info!(engine = %family, question_chars = question.len(), "Starting orchestration");

        let mut engine = self.connector.open(family, config).await?;
        let outcome = self.run_with_engine(&mut engine, question).await;
        engine.close().await;

        match &outcome {
            Ok(result) => info!(
                engine = %family,
                termination = ?result.termination,
                iterations = result.iteration_count,
                queries = result.queries_executed_count,
                "Orchestration finished"
            ),
            Err(e) => error!(engine = %family, code = e.error_code(), error = %e, "Orchestration failed"),
        }

        outcome
    }

    /// Introspect and run the loop on an already-open engine
    ///
    /// The caller keeps ownership of the connection and must close it.
    pub async fn run_with_engine<E: DatabaseEngine>(
        &self,
        engine: &mut E,
        question: &str,
    ) -> Result<OrchestrationResult> {
        let family = engine.family();
        let schema = engine.introspect().await?;
        debug!(engine = %family, objects = schema.object_count(), "Schema ready");

        let system_prompt = build_system_prompt(&schema, family);
        Ok(self.converse(engine, family, &system_prompt, question).await)
    }

    async fn converse<E: DatabaseEngine>(
        &self,
        engine: &mut E,
        family: EngineFamily,
        system_prompt: &str,
        question: &str,
    ) -> OrchestrationResult {
        let mut transcript: Vec<QueryAttempt> = Vec::new();

        for iteration in 1..=MAX_ITERATIONS {
            let request = CompletionRequest {
                system_prompt: system_prompt.to_string(),
                user_prompt: render_running_prompt(question, &transcript, family, MAX_ITERATIONS - iteration + 1),
                temperature: COMPLETION_TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            };

            let reply = match self.completion.complete(&request).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!(iteration, error = %e, "Completion call failed");
                    return OrchestrationResult::finish(
                        Termination::CompletionFailed,
                        e.message(),
                        iteration,
                        transcript,
                    );
                }
            };

            match parse_reply(&reply) {
                ParsedAction::Query { statement, reasoning } => {
                    debug!(iteration, action = "query", "Parsed reply");
                    transcript.push(execute_attempt(engine, statement, reasoning).await);
                }
                ParsedAction::Answer { response } => {
                    debug!(iteration, action = "answer", "Parsed reply");
                    return OrchestrationResult::finish(Termination::Answered, response, iteration, transcript);
                }
                ParsedAction::Unparseable if reply.trim().is_empty() => {
                    error!(iteration, "Completion engine returned an empty reply");
                    return OrchestrationResult::finish(
                        Termination::EmptyResponse,
                        NlQueryError::EmptyResponse.message(),
                        iteration,
                        transcript,
                    );
                }
                ParsedAction::Unparseable => {
                    warn!(iteration, "Reply could not be parsed; returning it verbatim");
                    return OrchestrationResult::finish(
                        Termination::UnparseableResponse,
                        reply,
                        iteration,
                        transcript,
                    );
                }
            }
        }

        warn!(iterations = MAX_ITERATIONS, queries = transcript.len(), "Iteration budget exhausted");
        OrchestrationResult::finish(
            Termination::IterationBudgetExhausted,
            format!(
                "I could not reach a final answer within {MAX_ITERATIONS} steps. \
                 The queries I ran are listed in the transcript."
            ),
            MAX_ITERATIONS,
            transcript,
        )
    }
}

/// Run one statement and record the outcome; failures are not fatal
async fn execute_attempt<E: DatabaseEngine>(
    engine: &mut E,
    statement: String,
    reasoning: Option<String>,
) -> QueryAttempt {
    let start = Instant::now();
    let outcome = engine.execute(&statement).await;
    let execution_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match outcome {
        Ok(rows) => {
            debug!(statement = %statement, rows = rows.len(), execution_ms, "Statement executed");
            QueryAttempt { statement, reasoning, rows: Some(rows), error: None, execution_ms }
        }
        Err(e) => {
            let message = match e {
                NlQueryError::StatementExecution(detail) => detail,
                other => other.message(),
            };
            warn!(statement = %statement, error = %message, "Statement failed; feeding error back");
            QueryAttempt { statement, reasoning, rows: None, error: Some(message), execution_ms }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_tags() {
        assert_eq!(Termination::Answered.error_tag(), None);
        assert_eq!(Termination::UnparseableResponse.error_tag(), Some("unparseable response"));
        assert_eq!(Termination::IterationBudgetExhausted.error_tag(), Some("iteration budget exhausted"));
        assert_eq!(Termination::CompletionFailed.error_tag(), Some("completion engine error"));
        assert_eq!(Termination::EmptyResponse.error_tag(), Some("empty response"));
    }

    #[test]
    fn test_finish_counts_every_attempt() {
        let transcript = vec![
            QueryAttempt {
                statement: "SELECT actve FROM users".to_string(),
                reasoning: None,
                rows: None,
                error: Some("Unknown column".to_string()),
                execution_ms: 2,
            },
            QueryAttempt {
                statement: "SELECT active FROM users".to_string(),
                reasoning: None,
                rows: Some(Vec::new()),
                error: None,
                execution_ms: 1,
            },
        ];

        let result = OrchestrationResult::finish(Termination::Answered, "none", 3, transcript);
        assert_eq!(result.queries_executed_count, 2);
        assert!(!result.transcript[0].succeeded());
        assert!(result.transcript[1].succeeded());
        assert!(result.is_answered());
        assert_eq!(result.error_tag, None);
    }

    #[test]
    fn test_result_serialization() {
        let result = OrchestrationResult::finish(Termination::IterationBudgetExhausted, "gave up", 10, Vec::new());
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["termination"], "iteration_budget_exhausted");
        assert_eq!(json["error_tag"], "iteration budget exhausted");
        assert_eq!(json["iteration_count"], 10);
        assert_eq!(json["queries_executed_count"], 0);
    }
}
