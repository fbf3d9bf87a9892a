//! Schemata CLI
//!
//! Usage:
//!   schemata check-config <schemata.toml>
//!   schemata plan --schema <fixture.json> --intent <intent.json> [--dialect <dialect>] [--output <format>]
//!   schemata check-schema --config <schemata.toml> [--database <name>]
//!
//! Examples:
//!   schemata check-config ./schemata.toml
//!   schemata plan --schema shop.json --intent monthly_revenue.json --output verbose
//!   schemata check-schema --config ./schemata.toml --database shop

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use schemata::config::EngineSettings;
use schemata::engine::{BuildOptions, EngineState};
use schemata::planner::QueryIntent;
use schemata::provider::{MemoryConnector, MemoryProvider, WorkerConnector};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schemata")]
#[command(about = "Schemata - business terms to validated SQL over a live schema")]
#[command(version)]
struct Cli {
    /// Log at debug level (overridden by SCHEMATA_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a settings file
    CheckConfig {
        /// Path to the TOML settings file
        file: PathBuf,
    },

    /// Build SQL for an intent against a JSON schema fixture, offline
    Plan {
        /// Schema fixture: {"databases": [{"name": ..., "tables": [...]}]}
        #[arg(long)]
        schema: PathBuf,

        /// Query intent as JSON
        #[arg(long)]
        intent: PathBuf,

        /// SQL dialect to generate
        #[arg(short, long, default_value = "mysql")]
        dialect: DialectArg,

        /// Output format
        #[arg(short, long, default_value = "sql")]
        output: OutputFormat,
    },

    /// Diff the live schema against the stored baseline through the worker provider
    CheckSchema {
        /// Path to the TOML settings file
        #[arg(short, long)]
        config: PathBuf,

        /// Check one database instead of every monitored one
        #[arg(short, long)]
        database: Option<String>,
    },
}

#[derive(Clone, ValueEnum)]
enum DialectArg {
    Mysql,
    Ansi,
}

impl DialectArg {
    fn as_str(&self) -> &'static str {
        match self {
            DialectArg::Mysql => "mysql",
            DialectArg::Ansi => "ansi",
        }
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// SQL only
    Sql,
    /// SQL with joins, hints and alternatives
    Verbose,
    /// The whole generated query as JSON
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("SCHEMATA_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::CheckConfig { file } => cmd_check_config(&file),
        Commands::Plan {
            schema,
            intent,
            dialect,
            output,
        } => cmd_plan(&schema, &intent, dialect, output).await,
        Commands::CheckSchema { config, database } => cmd_check_schema(&config, database.as_deref()).await,
    }
}

fn cmd_check_config(file: &Path) -> ExitCode {
    match EngineSettings::from_file(file) {
        Ok(settings) => {
            println!("OK: {} is valid", file.display());
            println!("  dialect: {}", settings.query.dialect);
            println!("  cache capacity: {}", settings.cache.capacity);
            println!("  detector poll: {}s", settings.detector.poll_interval_seconds);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn cmd_plan(schema: &Path, intent: &Path, dialect: DialectArg, output: OutputFormat) -> ExitCode {
    let schema_json = match fs::read_to_string(schema) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", schema.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let intent_json = match fs::read_to_string(intent) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", intent.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let provider = match MemoryProvider::from_json(&schema_json) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            eprintln!("Invalid schema fixture '{}': {}", schema.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let intent: QueryIntent = match serde_json::from_str(&intent_json) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("Invalid intent '{}': {}", intent.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let mut settings = EngineSettings::default();
    settings.store.in_memory = true;
    settings.detector.enabled = false;
    settings.query.dialect = dialect.as_str().to_string();

    let connector = Arc::new(MemoryConnector::new("fixture", provider));
    let engine = match EngineState::init(settings, connector, None).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Engine error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = engine.build(&intent, &BuildOptions::default()).await;
    engine.shutdown().await;

    let query = match result {
        Ok(query) => query,
        Err(e) => {
            eprintln!("Planning error [{:?}]: {}", e.kind(), e);
            return ExitCode::FAILURE;
        }
    };

    match output {
        OutputFormat::Sql => println!("{}", query.sql),
        OutputFormat::Json => match serde_json::to_string_pretty(&query) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing query: {}", e);
                return ExitCode::FAILURE;
            }
        },
        OutputFormat::Verbose => {
            println!("-- Schemata generated SQL");
            println!("-- Dialect: {:?}", query.dialect);
            println!("-- Confidence: {:.2}", query.confidence);
            for mapping in &query.mappings {
                println!(
                    "-- {} -> {} ({}, {:.2})",
                    mapping.term, mapping.path, mapping.method, mapping.confidence
                );
            }
            for join in &query.joins {
                println!(
                    "-- join {}({}) -> {}({})",
                    join.left_table,
                    join.left_columns.join(", "),
                    join.right_table,
                    join.right_columns.join(", ")
                );
            }
            println!("-- Cost: {:?}", query.hints.cost_class);
            for hint in &query.hints.suggested_indexes {
                println!("-- Suggested: {}", hint.suggestion);
            }
            println!();
            println!("{}", query.sql);
            for (i, alt) in query.alternatives.iter().enumerate() {
                println!();
                println!("-- Alternative {} (confidence {:.2})", i + 1, alt.confidence);
                println!("{}", alt.sql);
            }
        }
    }
    ExitCode::SUCCESS
}

async fn cmd_check_schema(config: &Path, database: Option<&str>) -> ExitCode {
    let mut settings = match EngineSettings::from_file(config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    settings.detector.enabled = false;

    let connector = match WorkerConnector::from_settings(&settings.provider) {
        Ok(connector) => Arc::new(connector),
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let engine = match EngineState::init(settings, connector, None).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Engine error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match database {
        Some(db) => engine.detector().check_database(db).await,
        None => engine.detector().check_all().await,
    };
    engine.shutdown().await;

    match result {
        Ok(changes) if changes.is_empty() => {
            println!("No schema changes (a first check records the baseline)");
            ExitCode::SUCCESS
        }
        Ok(changes) => {
            for change in &changes {
                println!("{}", change);
                println!("  impact: {}", change.impact.summary());
                for step in &change.migration {
                    println!("  - {}", step);
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Schema check failed [{:?}]: {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}
