use std::path::PathBuf;

use clap::{Parser, Subcommand};
use companion_memory::config::{Config, StorageSettings};
use companion_memory::db::{ensure_parent_dir, run_migrations};
use companion_memory::error::{CompanionError, Result};
use companion_memory::{BehavioralSignal, CompanionEngine};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "companion-ingest")]
#[command(about = "Feeds behavioral signals into the companion memory engine")]
struct Cli {
    /// JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database path; overrides the config file.
    #[arg(long, env = "COMPANION_MEMORY_DB")]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or upgrade the database schema.
    Migrate,
    /// Ingest JSON lines of `{"user_id": .., "event": {..}, "memory": {..}}`.
    Ingest {
        /// Input file; stdin when omitted.
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Delete a user and everything derived from them.
    PurgeUser {
        #[arg(long)]
        user_id: i32,
    },
}

#[derive(Deserialize)]
struct IngestRequest {
    user_id: i32,
    #[serde(flatten)]
    signal: BehavioralSignal,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,companion_memory=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(db) = &cli.db {
        let mut storage = config.storage.take().unwrap_or_default();
        storage.sqlite_path = Some(db.clone());
        config.storage = Some(storage);
    }

    match cli.command {
        Command::Migrate => {
            let settings = StorageSettings::from_config(&config)?;
            ensure_parent_dir(&settings.sqlite_path)?;
            run_migrations(&settings.sqlite_path).await?;
            tracing::info!(path = %settings.sqlite_path, "migrations applied");
            Ok(())
        }
        Command::Ingest { input } => {
            let engine = CompanionEngine::open(config).await?;
            match input {
                Some(path) => {
                    let file = tokio::fs::File::open(&path)
                        .await
                        .map_err(|e| CompanionError::Runtime(e.to_string()))?;
                    ingest_lines(&engine, BufReader::new(file)).await
                }
                None => ingest_lines(&engine, BufReader::new(tokio::io::stdin())).await,
            }
        }
        Command::PurgeUser { user_id } => {
            let engine = CompanionEngine::open(config).await?;
            let report = engine.delete_user(user_id).await?;
            println!("{}", serde_json::to_string(&report)?);
            Ok(())
        }
    }
}

async fn ingest_lines<R>(engine: &CompanionEngine, reader: BufReader<R>) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stdout = tokio::io::stdout();
    let mut line_no = 0usize;
    let (mut ok, mut failed) = (0usize, 0usize);

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| CompanionError::Runtime(e.to_string()))?
    {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let report = match serde_json::from_str::<IngestRequest>(&line) {
            Ok(request) => match engine.ingest(request.user_id, request.signal).await {
                Ok(outcome) => {
                    ok += 1;
                    json!({ "line": line_no, "status": "ok", "outcome": outcome })
                }
                Err(err) => {
                    failed += 1;
                    error_report(line_no, &err)
                }
            },
            Err(parse_err) => {
                failed += 1;
                let err = CompanionError::Validation(parse_err.to_string());
                engine.audit_failure("ingest", None, &err, json!({ "line": line_no }));
                error_report(line_no, &err)
            }
        };
        let mut out = serde_json::to_string(&report)?;
        out.push('\n');
        stdout
            .write_all(out.as_bytes())
            .await
            .map_err(|e| CompanionError::Runtime(e.to_string()))?;
    }
    stdout
        .flush()
        .await
        .map_err(|e| CompanionError::Runtime(e.to_string()))?;
    tracing::info!(ok, failed, "ingest finished");
    Ok(())
}

fn error_report(line_no: usize, err: &CompanionError) -> serde_json::Value {
    json!({
        "line": line_no,
        "status": "error",
        "kind": err.kind(),
        "error": err.to_string(),
    })
}
