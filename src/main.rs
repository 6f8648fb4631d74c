//! CodePlane CLI - repository-local hybrid code index.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use codeplane::daemon::DaemonFiles;
use codeplane::{
    BackgroundIndexer, Config, FileWatcher, IndexCoordinator, MapRepoRequest, ScopePreference,
    SearchMode,
};

/// CodePlane - hybrid code index control plane for coding agents
#[derive(Parser)]
#[command(name = "codeplane")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Repository root (defaults to the current directory)
    #[arg(short, long, global = true)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliSearchMode {
    Lexical,
    Symbol,
    References,
    Definitions,
}

impl From<CliSearchMode> for SearchMode {
    fn from(mode: CliSearchMode) -> Self {
        match mode {
            CliSearchMode::Lexical => SearchMode::Lexical,
            CliSearchMode::Symbol => SearchMode::Symbol,
            CliSearchMode::References => SearchMode::References,
            CliSearchMode::Definitions => SearchMode::Definitions,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Discover contexts and build the full index
    Init,

    /// Reindex specific paths (or the whole tree with --full)
    Reindex {
        /// Repo-relative paths to reconcile
        paths: Vec<String>,

        /// Reconcile the entire tree
        #[arg(long)]
        full: bool,
    },

    /// Search the index
    Search {
        /// The search query
        query: String,

        /// Search mode
        #[arg(short, long, value_enum, default_value = "lexical")]
        mode: CliSearchMode,

        /// Maximum number of results
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Restrict to one context
        #[arg(short, long)]
        context: Option<i64>,
    },

    /// Summarize repository structure, languages and layout
    Map,

    /// Read the enclosing scope around a line
    Read {
        /// Repo-relative file path
        path: String,

        /// 1-indexed line number
        line: u32,
    },

    /// Show index status
    Status,

    /// Run the daemon: watcher + background indexer
    Daemon,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let repo_root = match cli.repo {
        Some(path) => path.canonicalize()?,
        None => std::env::current_dir()?,
    };
    let config = Config::load(&repo_root)?;
    let coordinator = Arc::new(IndexCoordinator::open(&repo_root, config.clone())?);

    if let Some(warning) = coordinator.take_integrity_warning() {
        eprintln!("warning: {warning}");
    }

    match cli.command {
        Commands::Init => {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("  {spinner:.green} {msg}")
                    .expect("Invalid spinner template"),
            );
            spinner.set_message("Discovering contexts and indexing...");
            spinner.enable_steady_tick(Duration::from_millis(100));

            let result = coordinator.initialize().await?;
            spinner.finish_and_clear();

            println!(
                "Indexed {} files across {} contexts ({} valid, {} failed)",
                result.files_indexed,
                result.contexts_discovered,
                result.contexts_valid,
                result.contexts_failed,
            );
            for error in &result.errors {
                println!("  note: {error}");
            }
        }

        Commands::Reindex { paths, full } => {
            let stats = if full || paths.is_empty() {
                coordinator.reindex_full().await?
            } else {
                coordinator.reindex_incremental(paths).await?
            };
            println!(
                "{} added, {} updated, {} removed in {:.2}s (epoch {})",
                stats.files_added,
                stats.files_updated,
                stats.files_removed,
                stats.duration_seconds,
                stats.epoch_id,
            );
        }

        Commands::Search {
            query,
            mode,
            limit,
            context,
        } => {
            let response = coordinator.search(&query, mode.into(), limit, context)?;
            if let Some(reason) = &response.fallback_reason {
                println!("(fallback: {reason})");
            }
            for result in &response.results {
                let column = result
                    .column
                    .map(|c| format!(":{c}"))
                    .unwrap_or_default();
                println!(
                    "{}:{}{}  [{:.2}]\n  {}",
                    result.path,
                    result.line,
                    column,
                    result.score,
                    result.snippet.lines().next().unwrap_or(""),
                );
            }
            if response.truncated {
                println!("(results truncated by time budget)");
            }
        }

        Commands::Map => {
            let result = coordinator.map_repo(&MapRepoRequest::default())?;
            if let Some(languages) = &result.languages {
                println!("languages:");
                for share in languages {
                    println!(
                        "  {} {:.1}%  {} files",
                        share.language, share.percentage, share.file_count
                    );
                }
            }
            if let Some(structure) = &result.structure {
                println!("structure ({} files):", structure.file_count);
                for line in &structure.tree {
                    println!("  {line}");
                }
            }
            if let Some(deps) = &result.dependencies {
                println!(
                    "dependencies: {} ({} imports)",
                    deps.external_modules.join(", "),
                    deps.import_count
                );
            }
            if let Some(tests) = &result.test_layout {
                println!("tests: {} files", tests.test_count);
            }
            if let Some(entry_points) = &result.entry_points {
                for ep in entry_points {
                    println!("entry: {} {}  {}", ep.kind, ep.name, ep.path);
                }
            }
        }

        Commands::Read { path, line } => {
            let region = coordinator.read_scope(&path, line, ScopePreference::Function)?;
            println!(
                "{path}:{}-{} ({}{})",
                region.start_line,
                region.end_line,
                region.kind,
                if region.resolved { "" } else { ", fallback" },
            );
            println!("{}", region.content);
        }

        Commands::Status => {
            let epoch = coordinator.get_current_epoch()?;
            let (lexical_docs, storage_files) = coordinator.doc_counts()?;
            println!("epoch: {epoch}");
            println!("files: {storage_files} (lexical docs: {lexical_docs})");
            let report = coordinator.verify_integrity()?;
            println!("integrity: {}", if report.passed { "ok" } else { "FAILED" });
            for issue in &report.issues {
                println!("  {} ({}): {}", issue.category, issue.count, issue.message);
            }
        }

        Commands::Daemon => {
            let state_dir = config.state_dir(&repo_root);
            let daemon_files = DaemonFiles::write(&state_dir, config.server.port)?;

            info!("initial index build");
            coordinator.initialize().await?;

            let indexer = BackgroundIndexer::new(
                coordinator.clone(),
                Duration::from_secs_f64(config.server.debounce_sec),
            );

            let sink_indexer = indexer.clone();
            let watcher = FileWatcher::start(
                &repo_root,
                config.ignore.respect_gitignore,
                Duration::from_secs_f64(config.server.poll_interval_sec),
                Arc::new(move |events| {
                    sink_indexer.queue_paths(events.into_iter().map(|e| e.path));
                }),
            );

            info!(port = config.server.port, "daemon running; ctrl-c to stop");
            tokio::signal::ctrl_c().await?;

            info!("shutting down");
            watcher.stop().await;
            indexer.stop().await;
            daemon_files.remove();
        }
    }

    Ok(())
}
