//! # tree-mirror CLI (`tmirror`)
//!
//! Mirrors a local directory tree into a remote content store, honouring
//! `.gitignore` and `.mirrorignore` files the way git does.
//!
//! ## Usage
//!
//! ```bash
//! tmirror --config ./config/tmirror.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tmirror sync [PATH]` | One reconciliation pass |
//! | `tmirror watch [PATH]` | Baseline pass, then mirror changes live |
//! | `tmirror files [PATH]` | List the files that would be mirrored |
//! | `tmirror status` | Show the remote store and its record count |
//!
//! ## Examples
//!
//! ```bash
//! # Preview what a sync would do
//! tmirror sync ~/projects/site --dry-run
//!
//! # Sync with a lower in-flight ceiling and an extra pattern
//! tmirror sync . --concurrency 16 --ignore 'fixtures/'
//!
//! # Keep the store in step until Ctrl-C
//! tmirror watch . --verbose
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use tree_mirror::config::{self, Config};
use tree_mirror::error::SyncError;
use tree_mirror::git::Git;
use tree_mirror::ignore::IgnoreResolver;
use tree_mirror::progress::{summary_line, ProgressMode};
use tree_mirror::reconcile::ReconciliationEngine;
use tree_mirror::snapshot::RemoteSnapshot;
use tree_mirror::store::{create_store, StoreError};
use tree_mirror::walker::Walker;
use tree_mirror::watch::WatchPipeline;

/// tree-mirror: keep a remote content store in step with a local tree.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without one, a local file-backed store in `.tmirror-store` is used.
#[derive(Parser)]
#[command(
    name = "tmirror",
    about = "Mirror a local directory tree into a remote content store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tmirror.toml")]
    config: PathBuf,

    /// Remote container name; overrides `store.name`.
    #[arg(long, global = true)]
    store: Option<String>,

    /// Debug logging, and per-event output in `watch`.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass.
    ///
    /// Uploads new and changed files, deletes remote records whose local
    /// file is gone or now ignored, and prints a summary.
    Sync {
        /// Root of the tree to mirror.
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Report what would change without touching the remote store.
        #[arg(long)]
        dry_run: bool,

        /// Maximum simultaneous uploads/deletes.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Extra ignore pattern; may be repeated.
        #[arg(long = "ignore", value_name = "PATTERN")]
        ignore: Vec<String>,

        /// Progress output on stderr. Defaults to `human` on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Reconcile once, then mirror filesystem changes until Ctrl-C.
    Watch {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Run the baseline pass as a dry run and exit.
        #[arg(long)]
        dry_run: bool,

        #[arg(long = "ignore", value_name = "PATTERN")]
        ignore: Vec<String>,
    },

    /// Print every file that would be mirrored, one per line.
    Files {
        #[arg(default_value = ".")]
        path: PathBuf,

        #[arg(long = "ignore", value_name = "PATTERN")]
        ignore: Vec<String>,
    },

    /// Show the configured store and how many records it holds.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut cfg = config::load_or_default(&cli.config)?;
    if let Some(name) = &cli.store {
        cfg.store.name = name.clone();
    }

    match cli.command {
        Commands::Sync {
            path,
            dry_run,
            concurrency,
            ignore,
            progress,
        } => {
            if let Some(n) = concurrency {
                cfg.sync.concurrency = n;
            }
            cfg.validate()?;
            let root = canonical_root(&path)?;
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let engine = build_engine(&cfg, &ignore)?
                .dry_run(dry_run)
                .progress(mode.reporter());

            if let Err(e) = engine.ensure_store().await {
                fail(e);
            }
            let outcome = match engine.sync(&root).await {
                Ok(outcome) => outcome,
                Err(e) => fail(e),
            };
            let verb = if dry_run { "Scanned" } else { "Synced" };
            println!("{}", summary_line(verb, &outcome.result, dry_run));
            report_errors(outcome.result.errors);
        }
        Commands::Watch {
            path,
            dry_run,
            ignore,
        } => {
            cfg.validate()?;
            let root = canonical_root(&path)?;
            let engine = build_engine(&cfg, &ignore)?.dry_run(dry_run);
            let pipeline = WatchPipeline::new(engine, &root, &cfg.watch).verbose(cli.verbose);

            if !dry_run {
                println!("Watching {} (Ctrl-C to stop)", root.display());
            }
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let report = match pipeline.run(shutdown).await {
                Ok(report) => report,
                Err(e) => fail(e),
            };
            report_errors(report.initial.errors + report.events.errors);
        }
        Commands::Files { path, ignore } => {
            let root = canonical_root(&path)?;
            let resolver = build_resolver(&cfg, &ignore);
            let walker = Walker::new(&root, resolver).with_vcs(Arc::new(Git::new()));
            for file in walker.files() {
                println!("{}", file.display());
            }
        }
        Commands::Status => {
            let remote = create_store(&cfg.store)?;
            println!("store: {} ({:?} backend)", cfg.store.name, cfg.store.backend);
            match remote.retrieve(&cfg.store.name).await {
                Ok(_) => {
                    let snapshot = RemoteSnapshot::fetch(remote.as_ref(), &cfg.store.name)
                        .await
                        .context("Failed to list remote files")?;
                    println!("  exists: yes");
                    println!("  records: {}", snapshot.len());
                }
                Err(StoreError::NotFound(_)) => {
                    println!("  exists: no (created on first sync)");
                }
                Err(e) => return Err(anyhow::Error::new(e).context("Failed to retrieve store")),
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) -> Result<()> {
    let directive: Directive = if verbose {
        "tree_mirror=debug".parse()?
    } else {
        Level::INFO.into()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn canonical_root(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path)
        .with_context(|| format!("Sync root not found: {}", path.display()))
}

fn build_resolver(cfg: &Config, extra: &[String]) -> Arc<IgnoreResolver> {
    let patterns: Vec<String> = cfg
        .sync
        .ignore_patterns
        .iter()
        .chain(extra.iter())
        .cloned()
        .collect();
    Arc::new(IgnoreResolver::new(cfg.sync.ignore_file.clone(), &patterns))
}

fn build_engine(cfg: &Config, extra: &[String]) -> Result<ReconciliationEngine> {
    let remote = create_store(&cfg.store)?;
    Ok(
        ReconciliationEngine::new(remote, cfg.store.name.clone(), build_resolver(cfg, extra))
            .with_vcs(Arc::new(Git::new()))
            .identifier(cfg.sync.identifier)
            .concurrency(cfg.sync.concurrency),
    )
}

/// Print a fatal pass error and exit non-zero.
fn fail(err: SyncError) -> ! {
    if let SyncError::QuotaExceeded(msg) = &err {
        eprintln!("Error: the remote store's quota is exhausted ({}).", msg);
        eprintln!("Free space in the store or raise its limit, then run the sync again.");
        std::process::exit(2);
    }
    eprintln!("Error: {:#}", anyhow::Error::new(err));
    std::process::exit(1);
}

fn report_errors(errors: u64) {
    if errors > 0 {
        println!(
            "{} files could not be synced; rerun with --verbose for details",
            errors
        );
    }
}
