//! Completion Reply Parser
//!
//! The completion engine is asked to follow a two-shape grammar
//! (`ACTION: QUERY` + `SQL:`/`QUERY:` + `REASONING:`, or `ACTION: ANSWER` +
//! `RESPONSE:`) but drifts from it often. Parsing is therefore a set of
//! ordered strategy lists. Each strategy is a plain `fn(&str) -> Option<T>`
//! and the first one that yields a value wins.
//!
//! 1. Action: explicit `ACTION:` tag, bare `QUERY`/`ANSWER` keyword,
//!    statement-like content, long free text.
//! 2. Statement: labeled block, fenced code block, bare statement fragment.
//! 3. Reasoning: labeled block.
//! 4. Answer: `RESPONSE:` block, text after `ACTION: ANSWER`, whole reply.

use once_cell::sync::Lazy;
use regex::Regex;

/// Replies at least this long (trimmed) with no other signal are answers
pub const MIN_IMPLICIT_ANSWER_CHARS: usize = 20;

/// Outcome of parsing one completion reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedAction {
    /// Run a statement against the database
    Query { statement: String, reasoning: Option<String> },
    /// Final answer text
    Answer { response: String },
    /// Nothing usable could be extracted
    Unparseable,
}

/// Action kind, before any payload is extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Query,
    Answer,
}

/// One extraction strategy
pub type Strategy<T> = fn(&str) -> Option<T>;

/// Action detection, most explicit first
pub const ACTION_STRATEGIES: &[Strategy<ActionKind>] =
    &[explicit_action_tag, bare_action_keyword, statement_content, long_free_text];

/// Statement extraction, most explicit first
pub const STATEMENT_STRATEGIES: &[Strategy<String>] = &[labeled_statement, fenced_block, bare_statement];

/// Answer extraction, most explicit first
pub const ANSWER_STRATEGIES: &[Strategy<String>] = &[labeled_response, text_after_answer_tag, whole_reply];

static ACTION_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bACTION\**\s*:\s*\**\s*(QUERY|ANSWER)\b").expect("valid regex"));

static BARE_ACTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(QUERY|ANSWER)\b").expect("valid regex"));

static STATEMENT_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)\b(?:SELECT|INSERT|UPDATE|DELETE|CREATE|DROP|ALTER)\b|(?i:^\s*(?:select|with)\s)|\bdb\.[\w.$]+\s*\(",
    )
    .expect("valid regex")
});

static STATEMENT_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*\**(?:SQL|QUERY)\**\s*:\**\s*(.*)$").expect("valid regex"));

static REASONING_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*\**REASONING\**\s*:\**\s*(.*)$").expect("valid regex"));

static RESPONSE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*\**(?:RESPONSE|ANSWER)\**\s*:\**\s*(.*)$").expect("valid regex"));

/// Lines that end a labeled statement or reasoning block
static ANY_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*\**(?:REASONING|ACTION|RESPONSE|SQL|QUERY)\**\s*:").expect("valid regex")
});

/// Lines that end a labeled response block
static ACTION_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*\**ACTION\**\s*:").expect("valid regex"));

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("valid regex"));

static FENCE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:[A-Za-z0-9_+-]*[ \t]*\r?\n)?").expect("valid regex"));

static STATEMENT_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:SELECT|WITH|INSERT|UPDATE|DELETE|CREATE|DROP|ALTER)\b|\bdb\.[\w.$]+\s*\(")
        .expect("valid regex")
});

static LABEL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\**(?:SQL|QUERY)\**\s*:\**\s*").expect("valid regex"));

/// Parse a completion reply into an action
#[must_use]
pub fn parse_reply(reply: &str) -> ParsedAction {
    if reply.trim().is_empty() {
        return ParsedAction::Unparseable;
    }

    match first_match(ACTION_STRATEGIES, reply) {
        Some(ActionKind::Query) => match extract_statement(reply) {
            Some(statement) => ParsedAction::Query { statement, reasoning: extract_reasoning(reply) },
            None => ParsedAction::Unparseable,
        },
        Some(ActionKind::Answer) => first_match(ANSWER_STRATEGIES, reply)
            .map_or(ParsedAction::Unparseable, |response| ParsedAction::Answer { response }),
        None => ParsedAction::Unparseable,
    }
}

/// Run strategies in order; the first `Some` wins
pub fn first_match<T>(strategies: &[Strategy<T>], reply: &str) -> Option<T> {
    strategies.iter().find_map(|strategy| strategy(reply))
}

/// Statement body with fences and label prefix removed
#[must_use]
pub fn extract_statement(reply: &str) -> Option<String> {
    STATEMENT_STRATEGIES
        .iter()
        .filter_map(|strategy| strategy(reply))
        .find_map(|raw| clean_statement(&raw))
}

/// Text of the `REASONING:` block
#[must_use]
pub fn extract_reasoning(reply: &str) -> Option<String> {
    labeled_block(reply, &REASONING_LABEL, &ANY_LABEL)
}

// Action strategies

/// `ACTION: QUERY` / `ACTION: ANSWER`
pub fn explicit_action_tag(reply: &str) -> Option<ActionKind> {
    ACTION_TAG.captures(reply).map(|c| action_kind(&c[1]))
}

/// A bare upper-case `QUERY` or `ANSWER` keyword
pub fn bare_action_keyword(reply: &str) -> Option<ActionKind> {
    BARE_ACTION.captures(reply).map(|c| action_kind(&c[1]))
}

/// SQL keywords or document-query call syntax imply a query
pub fn statement_content(reply: &str) -> Option<ActionKind> {
    STATEMENT_HINT.is_match(reply).then_some(ActionKind::Query)
}

/// Non-trivial free text is taken as the answer
pub fn long_free_text(reply: &str) -> Option<ActionKind> {
    (reply.trim().chars().count() >= MIN_IMPLICIT_ANSWER_CHARS).then_some(ActionKind::Answer)
}

fn action_kind(tag: &str) -> ActionKind {
    if tag.eq_ignore_ascii_case("ANSWER") {
        ActionKind::Answer
    } else {
        ActionKind::Query
    }
}

// Statement strategies

/// `SQL:` or `QUERY:` block up to the next label
pub fn labeled_statement(reply: &str) -> Option<String> {
    labeled_block(reply, &STATEMENT_LABEL, &ANY_LABEL)
}

/// Contents of the first fenced code block
pub fn fenced_block(reply: &str) -> Option<String> {
    FENCED_BLOCK
        .captures(reply)
        .map(|c| c[1].trim().to_string())
        .filter(|body| !body.is_empty())
}

/// Statement-keyword-led fragment, up to a `;`, a blank line or a label
pub fn bare_statement(reply: &str) -> Option<String> {
    let start = STATEMENT_START.find(reply)?.start();

    let mut lines = Vec::new();
    for (idx, line) in reply[start..].lines().enumerate() {
        if idx > 0 && (line.trim().is_empty() || ANY_LABEL.is_match(line)) {
            break;
        }
        lines.push(line);
    }

    let fragment = lines.join("\n");
    let fragment = fragment[..terminator(&fragment)].trim();
    (!fragment.is_empty()).then(|| fragment.to_string())
}

/// Byte offset of the first `;` outside a quoted literal, or the length
fn terminator(fragment: &str) -> usize {
    let mut quote = None;
    for (idx, ch) in fragment.char_indices() {
        match (quote, ch) {
            (None, '\'' | '"') => quote = Some(ch),
            (None, ';') => return idx,
            (Some(open), _) if ch == open => quote = None,
            _ => {}
        }
    }
    fragment.len()
}

// Answer strategies

/// `RESPONSE:` block up to the next `ACTION:` tag
pub fn labeled_response(reply: &str) -> Option<String> {
    labeled_block(reply, &RESPONSE_LABEL, &ACTION_LABEL)
}

/// Everything after `ACTION: ANSWER`
pub fn text_after_answer_tag(reply: &str) -> Option<String> {
    ACTION_TAG
        .captures_iter(reply)
        .find(|c| c[1].eq_ignore_ascii_case("ANSWER"))
        .and_then(|c| c.get(0))
        .map(|m| reply[m.end()..].trim().to_string())
        .filter(|text| !text.is_empty())
}

/// The whole reply, trimmed
pub fn whole_reply(reply: &str) -> Option<String> {
    let trimmed = reply.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Text after the first line matching `label`, up to a line matching `stop`
fn labeled_block(reply: &str, label: &Regex, stop: &Regex) -> Option<String> {
    let mut lines = reply.lines();
    let first = lines.by_ref().find_map(|line| {
        label.captures(line).and_then(|c| c.get(1)).map(|m| m.as_str())
    })?;

    let mut block = vec![first];
    block.extend(lines.take_while(|line| !stop.is_match(line)));

    let text = block.join("\n");
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Strip code fences, a leftover label prefix and enclosing backtick pairs
fn clean_statement(raw: &str) -> Option<String> {
    let unfenced = FENCE_MARKER.replace_all(raw.trim(), "");
    let unlabeled = LABEL_PREFIX.replace(unfenced.trim(), "");

    // Quoted identifiers keep their backticks; only a pair wrapping the whole statement goes
    let mut statement = unlabeled.trim();
    while let Some(inner) = statement.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
        statement = inner.trim();
    }
    (!statement.is_empty()).then(|| statement.to_string())
}
