//! nlquery CLI Entry Point
//!
//! Subcommands:
//! - `ask` - answer a natural-language question against a database
//! - `schema` - print the introspected schema (or the rendered system prompt)
//! - `cancel` - mark a conversation thread cancelled
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nlquery::config::{self, AppConfig};
use nlquery::{
    build_system_prompt, settle, CancellationRegistry, CompletionOverrides, ConnectionConfig, DatabaseEngine,
    EngineAdapter, ErrorEnvelope, HttpCompletionEngine, InMemoryUsage, Metadata, NlQueryError, OrchestrationResult,
    Orchestrator, SchemaInfo, Settlement, SuccessEnvelope,
};

/// nlquery - ask questions of a database in plain language
#[derive(Parser)]
#[command(name = "nlquery")]
#[command(about = "Answer natural-language questions against MySQL, PostgreSQL, SQL Server, Oracle or MongoDB")]
#[command(version)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = "NLQUERY_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question against a database
    Ask(AskArgs),

    /// Print the introspected schema
    Schema(SchemaArgs),

    /// Mark a conversation thread cancelled
    Cancel {
        /// Thread identifier
        thread: String,
    },
}

#[derive(Args)]
struct AskArgs {
    /// The question to answer
    question: String,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(flatten)]
    completion: CompletionArgs,

    /// Conversation thread; enables cancellation and usage settlement
    #[arg(long)]
    thread: Option<String>,

    /// User the answer is accounted to
    #[arg(long, default_value = "local")]
    user_id: String,
}

#[derive(Args)]
struct SchemaArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Print the rendered system prompt instead of the schema
    #[arg(long)]
    prompt: bool,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Named connection from the config file (default connection if omitted)
    #[arg(long, conflicts_with = "engine")]
    connection: Option<String>,

    /// Engine family for an ad-hoc connection (e.g. "postgres", "MariaDB", "sql server")
    #[arg(long)]
    engine: Option<String>,

    #[arg(long, requires = "engine")]
    host: Option<String>,

    #[arg(long, requires = "engine")]
    port: Option<u16>,

    #[arg(long, requires = "engine")]
    user: Option<String>,

    #[arg(long, env = "NLQUERY_DB_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Database name (service name for Oracle)
    #[arg(long, requires = "engine")]
    database: Option<String>,
}

impl ConnectionArgs {
    fn resolve(&self, config: &AppConfig) -> nlquery::Result<ConnectionConfig> {
        match &self.engine {
            Some(engine) => Ok(ConnectionConfig {
                engine: engine.clone(),
                host: self.host.clone(),
                port: self.port,
                user: self.user.clone(),
                password: self.password.clone(),
                database: self.database.clone(),
            }),
            None => config.connection(self.connection.as_deref()),
        }
    }
}

#[derive(Args)]
struct CompletionArgs {
    /// OpenAI-compatible API base URL
    #[arg(long, env = "NLQUERY_BASE_URL")]
    base_url: Option<String>,

    /// Model identifier
    #[arg(long, env = "NLQUERY_MODEL")]
    model: Option<String>,

    /// API key (overrides completion.api_key_env)
    #[arg(long, env = "NLQUERY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

impl From<CompletionArgs> for CompletionOverrides {
    fn from(args: CompletionArgs) -> Self {
        Self { base_url: args.base_url, model: args.model, api_key: args.api_key }
    }
}

#[derive(Serialize)]
struct AskOutput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    settlement: Option<Settlement>,

    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a OrchestrationResult>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum SchemaOutput {
    Schema(SchemaInfo),
    Prompt { prompt: String },
}

/// Cancellation marks kept as files under `.nlquery/cancelled/`
struct MarkerCancellations {
    dir: PathBuf,
}

impl MarkerCancellations {
    fn in_current_dir() -> nlquery::Result<Self> {
        let local = config::local_config_path()?;
        let root = local.parent().map(PathBuf::from).unwrap_or_default();
        Ok(Self { dir: root.join("cancelled") })
    }

    fn marker(&self, thread_id: &str) -> nlquery::Result<PathBuf> {
        let valid = !thread_id.is_empty()
            && thread_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(NlQueryError::invalid_input(format!("invalid thread id '{thread_id}'")));
        }
        Ok(self.dir.join(thread_id))
    }

    fn cancel(&self, thread_id: &str) -> anyhow::Result<()> {
        let marker = self.marker(thread_id)?;
        fs::create_dir_all(&self.dir).with_context(|| format!("creating {}", self.dir.display()))?;
        fs::write(&marker, b"").with_context(|| format!("writing {}", marker.display()))?;
        Ok(())
    }
}

impl CancellationRegistry for MarkerCancellations {
    fn is_cancelled(&self, thread_id: &str) -> bool {
        self.marker(thread_id).is_ok_and(|marker| marker.exists())
    }
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        subscriber.with(fmt::layer().with_target(true).with_writer(std::io::stderr)).init();
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{json}");
    Ok(())
}

fn emit_error(engine: &str, command: &str, err: &NlQueryError) -> anyhow::Result<ExitCode> {
    print_json(&ErrorEnvelope::from_error(engine, command, err))?;
    Ok(ExitCode::FAILURE)
}

/// Engine label for envelopes; the raw name when it does not resolve
fn engine_label(connection: &ConnectionConfig) -> String {
    connection.family().map_or_else(|_| connection.engine.clone(), |family| family.to_string())
}

async fn ask(args: AskArgs) -> anyhow::Result<ExitCode> {
    let start = Instant::now();

    let prepared = config::load_with_precedence().and_then(|file| {
        let connection = args.connection.resolve(&file)?;
        let settings = file.completion.resolve(args.completion.into())?;
        Ok((connection, settings))
    });
    let (connection, settings) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => return emit_error("", "ask", &e),
    };

    let engine = engine_label(&connection);
    let completion = match HttpCompletionEngine::new(&settings) {
        Ok(completion) => completion,
        Err(e) => return emit_error(&engine, "ask", &e),
    };

    let result = match Orchestrator::new(completion).run(&connection, &args.question).await {
        Ok(result) => result,
        Err(e) => return emit_error(&engine, "ask", &e),
    };
    let meta = Metadata::for_orchestration(elapsed_ms(start), &result);

    let output = match args.thread.as_deref() {
        Some(thread_id) => {
            let cancellations = match MarkerCancellations::in_current_dir() {
                Ok(cancellations) => cancellations,
                Err(e) => return emit_error(&engine, "ask", &e),
            };
            let settlement = settle(&result, thread_id, &args.user_id, &cancellations, &InMemoryUsage::new());
            AskOutput {
                thread_id: Some(thread_id),
                settlement: Some(settlement),
                result: (settlement != Settlement::Suppressed).then_some(&result),
            }
        }
        None => AskOutput { thread_id: None, settlement: None, result: Some(&result) },
    };

    print_json(&SuccessEnvelope::new(engine, "ask", output, meta))?;
    Ok(ExitCode::SUCCESS)
}

async fn schema(args: SchemaArgs) -> anyhow::Result<ExitCode> {
    let start = Instant::now();

    let connection = match config::load_with_precedence().and_then(|file| args.connection.resolve(&file)) {
        Ok(connection) => connection,
        Err(e) => return emit_error("", "schema", &e),
    };
    let engine = engine_label(&connection);

    let family = match connection.family() {
        Ok(family) => family,
        Err(e) => return emit_error(&engine, "schema", &e),
    };
    let mut adapter = match EngineAdapter::open(family, &connection).await {
        Ok(adapter) => adapter,
        Err(e) => return emit_error(&engine, "schema", &e),
    };
    let introspected = adapter.introspect().await;
    adapter.close().await;

    let schema = match introspected {
        Ok(schema) => schema,
        Err(e) => return emit_error(&engine, "schema", &e),
    };

    let data = if args.prompt {
        SchemaOutput::Prompt { prompt: build_system_prompt(&schema, family) }
    } else {
        SchemaOutput::Schema(schema)
    };

    print_json(&SuccessEnvelope::new(engine, "schema", data, Metadata::new(elapsed_ms(start))))?;
    Ok(ExitCode::SUCCESS)
}

fn cancel(thread: &str) -> anyhow::Result<ExitCode> {
    let start = Instant::now();
    let outcome = MarkerCancellations::in_current_dir().map_err(anyhow::Error::from).and_then(|m| m.cancel(thread));

    match outcome {
        Ok(()) => {
            let data = serde_json::json!({ "thread_id": thread, "cancelled": true });
            print_json(&SuccessEnvelope::new("", "cancel", data, Metadata::new(elapsed_ms(start))))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => match e.downcast_ref::<NlQueryError>() {
            Some(err) => emit_error("", "cancel", err),
            None => Err(e),
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Ask(args) => ask(args).await,
        Commands::Schema(args) => schema(args).await,
        Commands::Cancel { thread } => cancel(&thread),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("nlquery: {e:#}");
            ExitCode::from(2)
        }
    }
}
