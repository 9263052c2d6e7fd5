//! schema_catalog CLI
//!
//! Usage:
//!   schema_catalog --config catalog.toml discover [--resume] [--snapshot <file>]
//!                  [--diagram <file>] [--context <dir>]

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use schema_catalog::progress::{BroadcastProgress, ProgressEvent};
use schema_catalog::utils::logging::init_logging;
use schema_catalog::{CatalogEngine, InMemoryStore, RunReport, RunStatus};

#[derive(Parser)]
#[command(name = "schema_catalog")]
#[command(about = "Discover, profile and relate the tables of a database")]
#[command(version)]
struct Cli {
    /// Path to the TOML or YAML configuration file
    #[arg(short, long, default_value = "catalog.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one discovery pass over the configured data source
    Discover {
        /// Skip tables completed by a previous cancelled run
        #[arg(long)]
        resume: bool,

        /// Catalog snapshot to load before and save after the run
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Write the diagram descriptor as JSON
        #[arg(long)]
        diagram: Option<PathBuf>,

        /// Write one JSON context file per table into this directory
        #[arg(long)]
        context: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(report) if report.is_partial() => ExitCode::from(2),
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<RunReport> {
    let config_path = cli.config.to_string_lossy().to_string();
    let config = schema_catalog::config::load_from_file(&config_path)
        .with_context(|| format!("loading {config_path}"))?;
    init_logging(&config.logging)?;

    let Commands::Discover {
        resume,
        snapshot,
        diagram,
        context,
    } = cli.command;

    let store = Arc::new(match &snapshot {
        Some(path) => InMemoryStore::open(path).await?,
        None => InMemoryStore::new(),
    });

    let (sink, mut events) = BroadcastProgress::new(256);
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ProgressEvent::TableFailed { table, reason, counts } = &event {
                warn!(table = %table, reason = %reason, failed = counts.failed, "Table failed");
            }
        }
    });

    let engine = CatalogEngine::new(config, store.clone())?.with_progress(Arc::new(sink));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, finishing in-flight tables");
            on_interrupt.cancel();
        }
    });

    let report = engine.run(resume, &cancel).await?;

    if let Some(path) = &snapshot {
        store.save_snapshot(path).await?;
    }
    if report.status == RunStatus::Completed {
        if let Some(path) = &diagram {
            write_json(path, &engine.diagram().await?).await?;
        }
        if let Some(dir) = &context {
            tokio::fs::create_dir_all(dir).await?;
            for table in engine.context().await? {
                write_json(&dir.join(format!("{}.json", table.qualified_name)), &table).await?;
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report)
}

async fn write_json(path: &Path, value: &impl serde::Serialize) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))
}
