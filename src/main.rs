use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use syntheo::query::SearchOptions;
use syntheo::workspace::{clear_workspace, workspace_status, SyntheoWorkspace};

#[derive(Parser)]
#[command(name = "syntheo")]
#[command(about = "Local-first semantic code search", long_about = None)]
#[command(version)]
struct Cli {
    /// Workspace root (defaults to the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the workspace into the search index
    Index {
        /// Re-ingest every file, ignoring the change-detection cache
        #[arg(long)]
        force: bool,
    },
    /// Query the index
    Search {
        query: String,

        #[arg(long)]
        limit: Option<usize>,

        /// Exact-match language filter (e.g. "python")
        #[arg(long)]
        language: Option<String>,

        /// Exact-match block type filter (e.g. "function_definition")
        #[arg(long = "type")]
        block_type: Option<String>,

        #[arg(long)]
        min_score: Option<f32>,

        /// Use only the dense vector channel
        #[arg(long)]
        semantic_only: bool,

        /// Use only the keyword channel
        #[arg(long)]
        keyword_only: bool,

        /// Skip the second scoring pass over the top results
        #[arg(long)]
        no_rerank: bool,
    },
    /// Watch the workspace and re-index changed files
    Watch,
    /// Show index totals
    Status,
    /// Delete all on-disk index state
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("syntheo=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let root = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Index { force } => {
            let ws = SyntheoWorkspace::initialize(&root).await?;
            let ingestor = Arc::new(ws.ingestor());

            // SIGINT drains running per-file tasks, then everything persists.
            let shutdown = ingestor.shutdown_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, finishing current batch");
                    shutdown.store(true, Ordering::SeqCst);
                }
            });

            let report = ingestor.index_workspace(force).await?;
            println!(
                "indexed {} files ({} skipped, {} errors, {} blocks)",
                report.indexed, report.skipped, report.errors, report.blocks
            );
            if report.embedder_down {
                return Ok(ExitCode::from(1));
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Search {
            query,
            limit,
            language,
            block_type,
            min_score,
            semantic_only,
            keyword_only,
            no_rerank,
        } => {
            let ws = SyntheoWorkspace::initialize(&root).await?;
            let options = SearchOptions {
                limit,
                language,
                block_type,
                min_score,
                semantic_only,
                keyword_only,
                rerank: if no_rerank { Some(false) } else { None },
                ..Default::default()
            };
            let results = ws.retriever().search(&query, &options).await?;

            if results.is_empty() {
                println!("no results");
            }
            for (i, result) in results.iter().enumerate() {
                let symbol = result
                    .block
                    .symbol_name
                    .as_deref()
                    .unwrap_or("(anonymous)");
                println!(
                    "{:2}. {:.3}  {}:{}-{}  {}  [{}]",
                    i + 1,
                    result.score,
                    result.block.file_path,
                    result.block.start_line,
                    result.block.end_line,
                    symbol,
                    result.block.block_type,
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Watch => {
            let ws = SyntheoWorkspace::initialize(&root).await?;
            if !ws.config.watch.enabled {
                println!("watching is disabled in config.json");
                return Ok(ExitCode::SUCCESS);
            }

            // Catch up before watching.
            let ingestor = Arc::new(ws.ingestor());
            ingestor.index_workspace(false).await?;

            let shutdown = ingestor.shutdown_flag();
            {
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("interrupt received, shutting down watcher");
                        shutdown.store(true, Ordering::SeqCst);
                    }
                });
            }

            syntheo::watch::watch_workspace(ws.root.clone(), &ws.config, ingestor, shutdown)
                .await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Status => {
            let status = workspace_status(&root)?;
            println!("files:   {}", status.total_files);
            println!("blocks:  {}", status.total_blocks);
            println!("vectors: {}", status.total_vectors);
            if !status.model_name.is_empty() {
                println!("model:   {} ({} dims)", status.model_name, status.dimensions);
            }
            if !status.languages.is_empty() {
                let mut languages: Vec<_> = status.languages.iter().collect();
                languages.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
                let summary: Vec<String> = languages
                    .iter()
                    .map(|(lang, count)| format!("{lang}:{count}"))
                    .collect();
                println!("languages: {}", summary.join(", "));
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Clear => {
            clear_workspace(&root)?;
            println!("index cleared");
            Ok(ExitCode::SUCCESS)
        }
    }
}
