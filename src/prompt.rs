//! Prompt Construction
//!
//! Two renderers feed the completion engine:
//! - [`build_system_prompt`] describes the database and the reply grammar. It is
//!   rendered once per orchestration call from freshly introspected schema.
//! - [`render_running_prompt`] restates the question and the transcript so far.
//!   It is rendered again on every iteration.
//!
//! Both are pure functions of their inputs.

use crate::agent::QueryAttempt;
use crate::engine::{CollectionInfo, EngineFamily, SchemaInfo, TableInfo};

/// Rows of one attempt rendered back into the running prompt
pub const MAX_PROMPT_ROWS: usize = 50;

/// Label that introduces a statement in the reply grammar
#[must_use]
pub const fn statement_label(family: EngineFamily) -> &'static str {
    if family.is_document_store() {
        "QUERY"
    } else {
        "SQL"
    }
}

/// Build the system prompt for one orchestration call
#[must_use]
pub fn build_system_prompt(schema: &SchemaInfo, family: EngineFamily) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "You are a careful data analyst answering questions about a {} database.\n\
         You may run queries against the database to gather facts, one query per reply, \
         and you see each result before deciding what to do next. When you have enough \
         information, answer the question in plain language.\n\n",
        family.display_name()
    ));

    match schema {
        SchemaInfo::Relational { tables } => render_tables(&mut prompt, tables),
        SchemaInfo::Document { collections } => render_collections(&mut prompt, collections),
    }

    prompt.push_str(&response_grammar(family));
    prompt
}

fn render_tables(prompt: &mut String, tables: &[TableInfo]) {
    prompt.push_str("DATABASE SCHEMA\n");
    if tables.is_empty() {
        prompt.push_str("(no tables found)\n");
    }

    for table in tables {
        prompt.push_str(&format!("\nTable: {}\n", table.name));
        for column in &table.columns {
            let mut flags = Vec::new();
            if column.is_primary_key {
                flags.push("primary key");
            }
            flags.push(if column.nullable { "nullable" } else { "not null" });

            prompt.push_str(&format!("  - {} {} ({})", column.name, column.data_type, flags.join(", ")));
            if let Some(comment) = &column.comment {
                prompt.push_str(&format!(" -- {comment}"));
            }
            prompt.push('\n');
        }
    }

    prompt.push_str("\nRELATIONSHIPS\n");
    let mut any = false;
    for table in tables {
        for fk in &table.foreign_keys {
            any = true;
            prompt.push_str(&format!(
                "  - {}.{} -> {}.{}\n",
                table.name, fk.column, fk.referenced_table, fk.referenced_column
            ));
        }
    }
    if !any {
        prompt.push_str("(none)\n");
    }
    prompt.push('\n');
}

fn render_collections(prompt: &mut String, collections: &[CollectionInfo]) {
    prompt.push_str("DATABASE COLLECTIONS\n");
    prompt.push_str("Fields were inferred from a small sample of documents and may be incomplete.\n");
    if collections.is_empty() {
        prompt.push_str("(no collections found)\n");
    }

    for collection in collections {
        prompt.push_str(&format!("\nCollection: {}\n", collection.name));
        if collection.fields.is_empty() {
            prompt.push_str("  (empty collection)\n");
        }
        for field in &collection.fields {
            let marker = if field.is_primary_key { " (primary key)" } else { "" };
            prompt.push_str(&format!("  - {} {}{marker}\n", field.name, field.inferred_type));
        }
    }
    prompt.push('\n');
}

fn dialect_hints(family: EngineFamily) -> &'static str {
    match family {
        EngineFamily::MySql => "Use MySQL syntax: LIMIT n for row limits, backticks for quoting identifiers.",
        EngineFamily::Postgres => {
            "Use PostgreSQL syntax: LIMIT n for row limits, double quotes for quoting identifiers."
        }
        EngineFamily::SqlServer => {
            "Use T-SQL syntax: SELECT TOP n instead of LIMIT, square brackets for quoting identifiers."
        }
        EngineFamily::Oracle => {
            "Use Oracle SQL syntax: FETCH FIRST n ROWS ONLY instead of LIMIT, and do not end the statement with a semicolon."
        }
        EngineFamily::MongoDb => {
            "Write statements in shell syntax: db.<collection>.<operation>(<arguments>) where the operation is \
             find, findOne, aggregate, countDocuments or distinct. find may be followed by .sort({...}), \
             .limit(n) and .skip(n). Arguments must be strict JSON with double-quoted keys; use {\"$oid\": \"...\"} \
             for ObjectIds and {\"$date\": \"...\"} for dates."
        }
    }
}

fn response_grammar(family: EngineFamily) -> String {
    let label = statement_label(family);
    let statement = if family.is_document_store() { "document query" } else { "SQL statement" };

    format!(
        "RESPONSE FORMAT\n\
         Reply in exactly one of these two shapes and nothing else.\n\n\
         To run a query:\n\
         ACTION: QUERY\n\
         {label}: <one {statement}>\n\
         REASONING: <why this query helps answer the question>\n\n\
         To give the final answer:\n\
         ACTION: ANSWER\n\
         RESPONSE: <the answer in plain language>\n\n\
         Rules:\n\
         - Never wrap the {label} line in markdown code fences or backticks.\n\
         - Issue exactly one {statement} per reply.\n\
         - Base the answer only on results you have actually seen.\n\
         - {}\n",
        dialect_hints(family)
    )
}

/// Render the question and transcript for the next completion call
///
/// `remaining` counts the completion calls left, including the one this
/// prompt is for.
#[must_use]
pub fn render_running_prompt(
    question: &str,
    transcript: &[QueryAttempt],
    family: EngineFamily,
    remaining: usize,
) -> String {
    let mut prompt = format!("Question: {}\n", question.trim());

    if transcript.is_empty() {
        prompt.push_str("\nNo queries have been run yet.\n");
    } else {
        prompt.push_str("\nQueries run so far:\n");
        for (idx, attempt) in transcript.iter().enumerate() {
            render_attempt(&mut prompt, idx + 1, attempt, family);
        }
    }

    let turns = if remaining == 1 { "turn" } else { "turns" };
    prompt.push_str(&format!(
        "\nYou have {remaining} {turns} left. Reply with another query or with the final answer.\n"
    ));
    if remaining == 1 {
        prompt.push_str("This is the last turn: give the final answer now.\n");
    }

    prompt
}

fn render_attempt(prompt: &mut String, number: usize, attempt: &QueryAttempt, family: EngineFamily) {
    prompt.push_str(&format!("\n[{number}] {}: {}\n", statement_label(family), attempt.statement));
    if let Some(reasoning) = &attempt.reasoning {
        prompt.push_str(&format!("Reasoning: {reasoning}\n"));
    }

    match (&attempt.rows, &attempt.error) {
        (_, Some(error)) => prompt.push_str(&format!("Error: {error}\n")),
        (Some(rows), None) => {
            prompt.push_str(&format!("Result ({} rows):\n", rows.len()));
            for row in rows.iter().take(MAX_PROMPT_ROWS) {
                let line = serde_json::to_string(row).unwrap_or_else(|_| "{}".to_string());
                prompt.push_str(&line);
                prompt.push('\n');
            }
            if rows.len() > MAX_PROMPT_ROWS {
                prompt.push_str(&format!("({} more rows omitted)\n", rows.len() - MAX_PROMPT_ROWS));
            }
        }
        (None, None) => prompt.push_str("Result: (no rows)\n"),
    }
}
