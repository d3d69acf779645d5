#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod config;
mod error;
mod ingest;
mod models;
mod resource_limits;
mod storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use config::ShikuConfig;
use error::ShikuError;
use ingest::{
    loader, spawn_progress_logger, IngestReport, Ingestor, PipelineError, StatsSnapshot,
    Transformer,
};
use models::{IngestRun, ScriptMode};
use resource_limits::ResourceProfile;
use storage::SqliteStorage;

#[derive(Parser)]
#[command(name = "shiku")]
#[command(about = "Classical Chinese poetry ingestion pipeline", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level filter (e.g. debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Config file (defaults to ./shiku.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a dataset file or directory of JSON poem files
    Ingest(IngestArgs),

    /// Show table counts and recent runs
    Status {
        /// Database file (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Print one stored poem with its author
    Show {
        /// Poem id
        id: i64,
        /// Database file (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Manage configuration (shiku.toml)
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Args)]
struct IngestArgs {
    /// Dataset file or directory
    path: PathBuf,
    /// Database file (overrides config)
    #[arg(long)]
    db: Option<PathBuf>,
    /// Convert to traditional characters instead of simplified
    #[arg(long)]
    traditional: bool,
    /// Number of worker tasks
    #[arg(short, long)]
    workers: Option<usize>,
    /// Medium-pressure batch size
    #[arg(short, long)]
    batch_size: Option<i64>,
    /// Dynasty for files whose name names none
    #[arg(long)]
    dynasty: Option<String>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Create default shiku.toml
    Init,
    /// Show path to the config file
    Path,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let code = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

/// Text logs by default, JSON with SHIKU_LOG_JSON=1. Logs go to stderr;
/// stdout carries command output.
fn init_tracing(level: &str) {
    let json_logging = std::env::var("SHIKU_LOG_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("shiku={}", level).into());

    if json_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn run(cli: Cli) -> Result<(), ShikuError> {
    let config_path = config::config_path(cli.config.as_deref());

    match cli.command {
        Commands::Config { action } => Ok(handle_config(action, &config_path)?),
        Commands::Ingest(args) => {
            let config = config::load_config(&config_path);
            build_runtime()?.block_on(handle_ingest(args, config))
        }
        Commands::Status { db } => {
            let config = config::load_config(&config_path);
            build_runtime()?.block_on(handle_status(db.unwrap_or(config.storage.db_path)))
        }
        Commands::Show { id, db } => {
            let config = config::load_config(&config_path);
            build_runtime()?.block_on(handle_show(id, db.unwrap_or(config.storage.db_path)))
        }
    }
}

fn build_runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    let num_cpus = num_cpus::get();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus.max(2))
        .max_blocking_threads(num_cpus.max(4))
        .thread_name("shiku-worker")
        .enable_all()
        .build()?;
    Ok(rt)
}

async fn open_storage(db_path: &Path) -> Result<SqliteStorage, ShikuError> {
    let storage = SqliteStorage::new(&db_path.to_string_lossy()).await?;
    storage.migrate().await?;
    Ok(storage)
}

// === Ingest ===

async fn handle_ingest(args: IngestArgs, config: ShikuConfig) -> Result<(), ShikuError> {
    let db_path = args.db.unwrap_or(config.storage.db_path);
    let requested = if args.traditional {
        ScriptMode::Traditional
    } else {
        config.pipeline.mode
    };
    let dynasty = args.dynasty.unwrap_or(config.loader.default_dynasty);

    // Parsing is CPU-bound (rayon); keep it off the async workers.
    let path = args.path;
    let items = tokio::task::spawn_blocking(move || loader::load_path(&path, &dynasty))
        .await
        .map_err(anyhow::Error::from)??;
    let total = items.len();

    let storage = open_storage(&db_path).await?;
    let transformer = Transformer::builtin(requested);
    let mode = transformer.mode();
    let profile = ResourceProfile::detect();

    let mut ingestor = Ingestor::new(Arc::new(storage.clone()), transformer, profile);
    if let Some(n) = args.workers.or(config.pipeline.workers) {
        ingestor.set_workers(n);
    }
    if let Some(n) = args.batch_size.or(config.pipeline.batch_size) {
        ingestor.set_batch_size(n);
    }
    ingestor.set_transaction_size(config.storage.transaction_size);
    let bounds = ingestor.batch_bounds();

    let run_id = Uuid::new_v4();
    tracing::info!(
        "Run {}: ingesting {} poems into {} ({}, {:?} tier, {} CPUs, batch {}..{})",
        run_id,
        total,
        db_path.display(),
        mode.as_str(),
        profile.tier,
        profile.cpus,
        bounds.min,
        bounds.max
    );

    let started_at = chrono::Utc::now().timestamp();
    let progress_cancel = CancellationToken::new();
    let progress = spawn_progress_logger(
        ingestor.stats(),
        total,
        Duration::from_secs(config.pipeline.progress_interval_secs.max(1)),
        progress_cancel.clone(),
    );

    let result = ingestor.process(run_id, items).await;

    progress_cancel.cancel();
    let _ = progress.await;

    let (writes, slow_writes, write_ms) = storage.metrics().get_stats();
    tracing::debug!(
        "SQLite: {} batch writes ({} slow), {}ms total",
        writes,
        slow_writes,
        write_ms
    );

    let snapshot = ingestor.stats().snapshot();
    let run = run_record(run_id, started_at, &result, &snapshot);
    if let Err(e) = storage.record_run(&run).await {
        tracing::warn!("Failed to record run {}: {}", run.id, e);
    }

    let summary = json!({
        "run_id": run.id,
        "status": run.status,
        "db": db_path.display().to_string(),
        "mode": mode.as_str(),
        "batch": bounds,
        "stats": snapshot,
    });
    println!("{}", serde_json::to_string_pretty(&summary).map_err(anyhow::Error::from)?);

    let report = result?;
    report.log_summary();
    report.into_result()?;
    Ok(())
}

/// Row for `ingest_runs`. The id is the one the run logged under, whatever
/// the outcome.
fn run_record(
    run_id: Uuid,
    started_at: i64,
    result: &Result<IngestReport, PipelineError>,
    snapshot: &StatsSnapshot,
) -> IngestRun {
    let status = match result {
        Ok(report) if report.is_success() => "ok",
        Ok(_) => "partial",
        Err(_) => "failed",
    };
    IngestRun {
        id: run_id.to_string(),
        started_at,
        finished_at: chrono::Utc::now().timestamp(),
        dispatched: snapshot.dispatched as i64,
        succeeded: snapshot.succeeded as i64,
        failed: snapshot.failed as i64,
        written: snapshot.rows_written as i64,
        status: status.to_string(),
    }
}

// === Status ===

async fn handle_status(db_path: PathBuf) -> Result<(), ShikuError> {
    let storage = open_storage(&db_path).await?;
    let counts = storage.counts().await?;
    let runs = storage.recent_runs(5).await?;

    let status = json!({
        "db": db_path.display().to_string(),
        "counts": counts,
        "recent_runs": runs,
    });
    println!("{}", serde_json::to_string_pretty(&status).map_err(anyhow::Error::from)?);
    Ok(())
}

// === Show ===

async fn handle_show(id: i64, db_path: PathBuf) -> Result<(), ShikuError> {
    let storage = open_storage(&db_path).await?;
    let view = poem_view(&storage, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Poem {} not found in {}", id, db_path.display()))?;
    println!("{}", serde_json::to_string_pretty(&view).map_err(anyhow::Error::from)?);
    Ok(())
}

async fn poem_view(storage: &SqliteStorage, id: i64) -> Result<Option<serde_json::Value>, ShikuError> {
    let Some(poem) = storage.get_poem(id).await? else {
        return Ok(None);
    };
    let author = storage.get_author(poem.author_id).await?;
    if author.is_none() {
        tracing::warn!("Poem {} references missing author {}", poem.id, poem.author_id);
    }

    Ok(Some(json!({
        "id": poem.id,
        "title": poem.title,
        "title_pinyin": poem.title_pinyin,
        "author": author,
        "rhythmic": poem.rhythmic,
        "paragraphs": poem.paragraphs(),
        "source": poem.source,
    })))
}

// === Config ===

fn handle_config(action: Option<ConfigAction>, config_path: &Path) -> anyhow::Result<()> {
    match action {
        Some(ConfigAction::Path) => {
            println!("{}", config_path.display());
        }
        Some(ConfigAction::Init) => {
            if config_path.exists() {
                eprintln!("Config already exists: {}", config_path.display());
                return Ok(());
            }
            if let Some(parent) = config_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(config_path, config::DEFAULT_CONFIG)?;
            println!("Created: {}", config_path.display());
        }
        None => {
            // Show effective config
            let config = config::load_config(config_path);
            println!("# Effective config ({})\n", config_path.display());
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
