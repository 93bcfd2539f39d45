//! Shared fixtures: a scripted completion engine and an in-memory engine
//! connector that tracks open connections.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nlquery::{
    CollectionInfo, ColumnInfo, CompletionEngine, CompletionRequest, ConnectionConfig, DatabaseEngine,
    EngineConnector, EngineFamily, FieldInfo, NlQueryError, ResultSet, Row, SchemaInfo, TableInfo,
};

// ============================================================================
// Scripted completion engine
// ============================================================================

#[derive(Default)]
struct Script {
    replies: VecDeque<Result<String, String>>,
    repeat: Option<String>,
    requests: Vec<CompletionRequest>,
}

/// Completion engine replaying canned replies in order
///
/// Clones share state, so a test can hand one clone to the orchestrator and
/// inspect the recorded requests through another.
#[derive(Clone, Default)]
pub struct ScriptedCompletion {
    script: Arc<Mutex<Script>>,
}

impl ScriptedCompletion {
    /// Reply with each string once, in order
    pub fn replies(replies: &[&str]) -> Self {
        let completion = Self::default();
        completion.script.lock().unwrap().replies = replies.iter().map(|r| Ok((*r).to_string())).collect();
        completion
    }

    /// Replay explicit outcomes; `Err` becomes a completion engine error
    pub fn outcomes(outcomes: Vec<Result<&str, &str>>) -> Self {
        let completion = Self::default();
        completion.script.lock().unwrap().replies =
            outcomes.into_iter().map(|o| o.map(str::to_string).map_err(str::to_string)).collect();
        completion
    }

    /// Reply with the same string forever
    pub fn repeating(reply: &str) -> Self {
        let completion = Self::default();
        completion.script.lock().unwrap().repeat = Some(reply.to_string());
        completion
    }

    /// Number of completion calls made
    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().requests.len()
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.script.lock().unwrap().requests.clone()
    }

    /// User prompt of the `n`th call (0-based)
    pub fn user_prompt(&self, n: usize) -> String {
        self.script.lock().unwrap().requests[n].user_prompt.clone()
    }
}

impl CompletionEngine for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> nlquery::Result<String> {
        let mut script = self.script.lock().unwrap();
        script.requests.push(request.clone());

        match script.replies.pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(NlQueryError::completion(message)),
            None => script
                .repeat
                .clone()
                .ok_or_else(|| NlQueryError::completion("script exhausted")),
        }
    }
}

// ============================================================================
// Fake engine connector
// ============================================================================

#[derive(Default)]
struct Database {
    results: VecDeque<Result<ResultSet, String>>,
    executed: Vec<String>,
}

/// Connector producing in-memory engines with scripted statement results
///
/// Statements beyond the script return an empty result set.
#[derive(Clone)]
pub struct FakeConnector {
    schema: Option<SchemaInfo>,
    introspection_error: Option<String>,
    refuse_connections: bool,
    database: Arc<Mutex<Database>>,
    opened: Arc<AtomicUsize>,
    open_now: Arc<AtomicUsize>,
}

impl FakeConnector {
    /// Connector whose engines report `schema`
    pub fn new(schema: SchemaInfo) -> Self {
        Self {
            schema: Some(schema),
            introspection_error: None,
            refuse_connections: false,
            database: Arc::default(),
            opened: Arc::default(),
            open_now: Arc::default(),
        }
    }

    /// Script the outcome of each executed statement, in order
    pub fn with_results(self, results: Vec<Result<ResultSet, &str>>) -> Self {
        self.database.lock().unwrap().results =
            results.into_iter().map(|r| r.map_err(str::to_string)).collect();
        self
    }

    /// Engines fail introspection with `detail`
    pub fn failing_introspection(mut self, detail: &str) -> Self {
        self.introspection_error = Some(detail.to_string());
        self
    }

    /// `open` always fails
    pub fn refusing_connections(mut self) -> Self {
        self.refuse_connections = true;
        self
    }

    /// Statements executed so far, across all engines
    pub fn executed(&self) -> Vec<String> {
        self.database.lock().unwrap().executed.clone()
    }

    /// Connections opened over the connector's lifetime
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Connections currently open
    pub fn open_now(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }
}

pub struct FakeEngine {
    family: EngineFamily,
    schema: Option<SchemaInfo>,
    introspection_error: Option<String>,
    database: Arc<Mutex<Database>>,
    open_now: Arc<AtomicUsize>,
    closed: bool,
}

impl EngineConnector for FakeConnector {
    type Engine = FakeEngine;

    async fn open(&self, family: EngineFamily, _config: &ConnectionConfig) -> nlquery::Result<FakeEngine> {
        if self.refuse_connections {
            return Err(NlQueryError::connection(family.as_str(), "connection refused"));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.open_now.fetch_add(1, Ordering::SeqCst);

        Ok(FakeEngine {
            family,
            schema: self.schema.clone(),
            introspection_error: self.introspection_error.clone(),
            database: Arc::clone(&self.database),
            open_now: Arc::clone(&self.open_now),
            closed: false,
        })
    }
}

impl DatabaseEngine for FakeEngine {
    fn family(&self) -> EngineFamily {
        self.family
    }

    async fn introspect(&mut self) -> nlquery::Result<SchemaInfo> {
        if let Some(detail) = &self.introspection_error {
            return Err(NlQueryError::introspection(self.family.as_str(), detail.clone()));
        }
        Ok(self.schema.clone().unwrap_or(SchemaInfo::Relational { tables: Vec::new() }))
    }

    async fn execute(&mut self, statement: &str) -> nlquery::Result<ResultSet> {
        let mut database = self.database.lock().unwrap();
        database.executed.push(statement.to_string());
        match database.results.pop_front() {
            Some(Ok(rows)) => Ok(rows),
            Some(Err(message)) => Err(NlQueryError::statement(message)),
            None => Ok(Vec::new()),
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_now.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// Fixture data
// ============================================================================

/// `users(id, active)`
pub fn users_schema() -> SchemaInfo {
    SchemaInfo::Relational {
        tables: vec![TableInfo {
            name: "users".to_string(),
            columns: vec![
                ColumnInfo {
                    name: "id".to_string(),
                    data_type: "int".to_string(),
                    nullable: false,
                    is_primary_key: true,
                    comment: None,
                },
                ColumnInfo {
                    name: "active".to_string(),
                    data_type: "tinyint".to_string(),
                    nullable: false,
                    is_primary_key: false,
                    comment: Some("1 when the account is enabled".to_string()),
                },
            ],
            primary_keys: vec!["id".to_string()],
            foreign_keys: Vec::new(),
        }],
    }
}

/// `users` collection with `_id` and `active`
pub fn users_collection() -> SchemaInfo {
    SchemaInfo::Document {
        collections: vec![CollectionInfo {
            name: "users".to_string(),
            fields: vec![
                FieldInfo { name: "_id".to_string(), inferred_type: "objectId".to_string(), is_primary_key: true },
                FieldInfo { name: "active".to_string(), inferred_type: "bool".to_string(), is_primary_key: false },
            ],
        }],
    }
}

/// Schema appropriate for `family`
pub fn schema_for(family: EngineFamily) -> SchemaInfo {
    if family.is_document_store() {
        users_collection()
    } else {
        users_schema()
    }
}

pub fn config_for(family: EngineFamily) -> ConnectionConfig {
    ConnectionConfig::for_family(family, "db.test", "app", "secret", "shop")
}

/// One-row result set
pub fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
}
