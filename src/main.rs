//! Ripple-Fetch main entry point
//!
//! This is the command-line interface for the Ripple-Fetch dispatcher.

use anyhow::Context;
use clap::Parser;
use ripple_fetch::config::{load_config_with_hash, Config};
use ripple_fetch::storage::{open_storage, record_item, SqliteStorage};
use ripple_fetch::{Dispatcher, Settings};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Ripple-Fetch: a concurrency-bounded fetch dispatcher
///
/// Fetches every task URL with a bounded number of concurrent requests,
/// retrying failures, and stores each fetched body in a SQLite database.
#[derive(Parser, Debug)]
#[command(name = "ripple-fetch")]
#[command(version)]
#[command(about = "A concurrency-bounded fetch dispatcher", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Extra task URL (repeatable)
    #[arg(long = "task", value_name = "URL")]
    tasks: Vec<String>,

    /// File with one task URL per line (`#` starts a comment)
    #[arg(long, value_name = "PATH")]
    tasks_file: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be fetched without fetching
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let tasks = collect_tasks(&config, &cli.tasks, cli.tasks_file.as_deref())?;

    if cli.dry_run {
        handle_dry_run(&config, &tasks);
        return Ok(());
    }

    handle_fetch(&config, tasks).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ripple_fetch=info,warn"),
            1 => EnvFilter::new("ripple_fetch=debug,info"),
            2 => EnvFilter::new("ripple_fetch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Gathers tasks from the config, then `--task` flags, then `--tasks-file`
fn collect_tasks(
    config: &Config,
    extra: &[String],
    tasks_file: Option<&Path>,
) -> anyhow::Result<Vec<String>> {
    let mut tasks = config.tasks.clone();
    tasks.extend(extra.iter().cloned());

    if let Some(path) = tasks_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tasks file {}", path.display()))?;
        tasks.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }

    Ok(tasks)
}

/// Handles the --dry-run mode: prints the effective settings and tasks
fn handle_dry_run(config: &Config, tasks: &[String]) {
    let settings = Settings::from(config);

    println!("=== Ripple-Fetch Dry Run ===\n");

    println!("Dispatcher:");
    println!("  Concurrency: {}", settings.concurrency);
    println!("  Retries: {}", settings.retries);
    println!("  Delay: {}ms", settings.delay.as_millis());
    println!("  Retry backoff: {}ms", settings.retry_backoff.as_millis());
    println!("  Poll interval: {}ms", settings.poll_interval.as_millis());

    println!("\nRequest:");
    println!("  Timeout: {}s", settings.timeout.as_secs());
    println!("  Proxy: {}", settings.proxy);
    println!("  Cookies: {}", if settings.cookies.is_empty() { "(none)" } else { "(set)" });
    for (name, value) in &settings.headers {
        println!("  Header: {}: {}", name, value);
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nTasks ({}):", tasks.len());
    for task in tasks {
        println!("  - {}", task);
    }

    println!("\n✓ Configuration is valid");
}

/// Runs the dispatcher until the queue drains or Ctrl-C is pressed
async fn handle_fetch(config: &Config, tasks: Vec<String>) -> anyhow::Result<()> {
    let database_path = Path::new(&config.output.database_path);
    let storage = open_storage(database_path)
        .with_context(|| format!("Failed to open database {}", database_path.display()))?;
    let storage: Arc<Mutex<SqliteStorage>> = Arc::new(Mutex::new(storage));

    let fetched = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel::<()>();

    let dispatcher = Dispatcher::with_settings(Settings::from(config));

    let item_storage = storage.clone();
    let item_count = fetched.clone();
    let error_count = failed.clone();
    dispatcher
        .on_item(move |content, id| {
            let mut storage = item_storage.lock().unwrap_or_else(PoisonError::into_inner);
            match record_item(&mut *storage, id, &content) {
                Ok(_) => {
                    item_count.fetch_add(1, Ordering::Relaxed);
                    tracing::info!("Fetched {} ({} bytes)", id, content.len());
                }
                Err(e) => tracing::error!("Failed to store {}: {}", id, e),
            }
        })
        .on_error(move |error, id| {
            error_count.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Giving up on {}: {}", id, error);
        })
        .on_end(move || {
            let _ = ended_tx.send(());
        })
        .add_tasks(tasks);

    tracing::info!("Queued {} tasks", dispatcher.task_count());
    dispatcher.start();

    loop {
        tokio::select! {
            ended = ended_rx.recv() => {
                if ended.is_none() || dispatcher.is_idle() {
                    break;
                }
                tracing::debug!(
                    "Queue empty; waiting on {} in flight and {} pending retries",
                    dispatcher.in_flight(),
                    dispatcher.pending_retries()
                );
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                tracing::warn!(
                    "Interrupted; abandoning {} queued tasks and {} in flight",
                    dispatcher.task_count(),
                    dispatcher.in_flight()
                );
                break;
            }
        }
    }

    dispatcher.stop();
    tracing::info!(
        "Done: {} fetched, {} failed",
        fetched.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed)
    );

    Ok(())
}
