//! Sumi-Ingest main entry point
//!
//! This is the command-line interface for the Sumi-Ingest document ingest engine.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sumi_ingest::config::{load_config_with_hash, Config};
use sumi_ingest::crawler::{Coordinator, RootOptions};
use sumi_ingest::progress::print_report;
use sumi_ingest::queue::JobQueue;
use sumi_ingest::storage::{self, Storage};
use sumi_ingest::{IngestError, ParallelismMode};
use tracing_subscriber::EnvFilter;

/// How often a running crawl logs a progress line
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Sumi-Ingest: a polite document ingest engine
///
/// Sumi-Ingest fetches a root document and the best-scoring pages it links to,
/// skips content that has not changed since its last analysis, and feeds the
/// rest through an analyzer in adaptively sized batches. All work lives in a
/// persistent job queue, so an interrupted run resumes where it stopped.
#[derive(Parser, Debug)]
#[command(name = "sumi-ingest")]
#[command(version = "0.1.0")]
#[command(about = "A polite document ingest engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Root document to ingest; without it, pending work from earlier runs is resumed
    #[arg(long, value_name = "URL")]
    root: Option<String>,

    /// Override the configured maximum crawl depth
    #[arg(long, value_name = "N")]
    max_depth: Option<u32>,

    /// Override the configured minimum link score
    #[arg(long, value_name = "F")]
    min_score: Option<f64>,

    /// Override the parallelism mode (sequential, async, process, hybrid)
    #[arg(long, value_name = "MODE")]
    mode: Option<ParallelismMode>,

    /// Override the worker concurrency
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Analyze every fetched document, even if unchanged
    #[arg(long)]
    force: bool,

    /// Return dead-lettered jobs to the queue before running
    #[arg(long)]
    requeue_dead: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would run without fetching anything
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show queue statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    apply_overrides(&mut config, &cli)?;

    if cli.dry_run {
        handle_dry_run(&config, &cli);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_ingest(config, config_hash, &cli).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_ingest=info,warn"),
            1 => EnvFilter::new("sumi_ingest=debug,info"),
            2 => EnvFilter::new("sumi_ingest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_file(false)
        .init();
}

fn apply_overrides(config: &mut Config, cli: &Cli) -> anyhow::Result<()> {
    if let Some(depth) = cli.max_depth {
        config.crawler.max_depth = depth;
    }
    if let Some(score) = cli.min_score {
        if !(0.0..=1.0).contains(&score) {
            bail!("--min-score must be between 0.0 and 1.0, got {}", score);
        }
        config.crawler.min_score = score;
    }
    if let Some(mode) = cli.mode {
        config.workers.mode = mode;
    }
    if let Some(concurrency) = cli.concurrency {
        if concurrency == 0 {
            bail!("--concurrency must be at least 1");
        }
        config.workers.concurrency = concurrency;
    }
    Ok(())
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config, cli: &Cli) {
    println!("=== Sumi-Ingest Dry Run ===\n");

    println!("Crawler:");
    println!("  Max depth: {}", config.crawler.max_depth);
    println!("  Min score: {}", config.crawler.min_score);
    println!("  Max links per page: {}", config.crawler.max_links_per_page);
    println!("  Requests/sec per host: {}", config.crawler.requests_per_second);
    println!("  Respect robots.txt: {}", config.crawler.respect_robots);
    if !config.crawler.keywords.is_empty() {
        println!("  Keywords: {}", config.crawler.keywords.join(", "));
    }

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nQueue:");
    println!("  Max attempts: {}", config.queue.max_attempts);
    println!("  Lease: {}ms", config.queue.lease_ms);
    println!(
        "  Backoff: {}ms .. {}ms",
        config.queue.backoff_base_ms, config.queue.backoff_max_ms
    );
    println!("  Retention: {}h", config.queue.retention_hours);

    println!("\nBatching:");
    println!(
        "  Initial size: {} (max {})",
        config.batch.initial_size, config.batch.max_batch_size
    );
    println!("  Max wait: {}ms", config.batch.max_wait_ms);

    println!("\nWorkers:");
    println!(
        "  Mode: {} x{}",
        config.workers.mode, config.workers.concurrency
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\n✓ Configuration is valid");
    match &cli.root {
        Some(root) => println!("✓ Would ingest {}{}", root, if cli.force { " (forced)" } else { "" }),
        None => println!("✓ Would resume pending work"),
    }
}

/// Handles the --stats mode: shows queue statistics without touching any job
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = storage::open_storage(Path::new(&config.output.database_path))?;
    let queue = JobQueue::new(storage.clone(), &config.queue)?;
    print_report(&queue.progress().snapshot());

    let crawls = storage::lock(&storage)?.list_crawls(10)?;
    if !crawls.is_empty() {
        println!("\nRecent Crawls:");
        for crawl in crawls {
            println!(
                "  {} {} (depth {}, {}) started {}",
                crawl.id,
                crawl.root_url,
                crawl.max_depth,
                crawl.status.to_db_string(),
                crawl.started_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    Ok(())
}

/// Handles the main ingest operation
async fn handle_ingest(config: Config, config_hash: String, cli: &Cli) -> anyhow::Result<()> {
    let options = RootOptions {
        max_depth: config.crawler.max_depth,
        min_score: config.crawler.min_score,
        force_reprocess: cli.force,
    };

    let coordinator = Coordinator::open(config, config_hash)?;

    if cli.requeue_dead {
        let requeued = coordinator.requeue_dead_letters()?;
        tracing::info!("Requeued {} dead-lettered job(s)", requeued);
    }

    let crawl_id = match &cli.root {
        Some(root) => match coordinator.submit_root_with(root, options) {
            Ok(id) => Some(id),
            Err(IngestError::DuplicateJob { existing }) => {
                bail!("{} is already being ingested (job {})", root, existing)
            }
            Err(e) => return Err(e.into()),
        },
        None => {
            tracing::info!("No root given; resuming pending work");
            None
        }
    };

    coordinator.start().await?;

    let outcome = tokio::select! {
        result = run_until_done(&coordinator, crawl_id) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; letting in-flight jobs finish");
            Ok(())
        }
    };

    coordinator.stop().await?;
    outcome?;

    println!();
    print_report(&coordinator.progress());
    Ok(())
}

async fn run_until_done(
    coordinator: &Coordinator,
    crawl_id: Option<sumi_ingest::JobId>,
) -> anyhow::Result<()> {
    if let Some(id) = crawl_id {
        let crawl = coordinator.wait_for_crawl(id, Some(REPORT_INTERVAL)).await?;
        tracing::info!("Crawl of {} completed", crawl.root_url);
        return Ok(());
    }

    // Resume: run until the queue holds nothing pending or running
    let mut ticks: u32 = 0;
    loop {
        let report = coordinator.progress();
        if report.pending == 0 && report.running == 0 {
            tracing::info!("Queue drained");
            return Ok(());
        }

        ticks += 1;
        if ticks % 10 == 0 {
            tracing::info!("{}", report.summary_line());
        }
        tokio::time::sleep(REPORT_INTERVAL / 10).await;
    }
}
