//! Harvest-Ripple main entry point
//!
//! This is the command-line interface for the Harvest-Ripple page harvester.

use anyhow::Context;
use clap::Parser;
use harvest_ripple::config::{load_config_with_hash, Config};
use harvest_ripple::output::{export_jsonl, load_statistics, print_statistics, print_summary};
use harvest_ripple::{Harvester, RunSummary, Sink, SqliteSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Runs shown by --stats
const RECENT_RUNS: usize = 10;

/// Harvest-Ripple: a page-by-page web harvester
///
/// Harvest-Ripple walks listing (index) pages and detail pages of a site,
/// extracts structured records with CSS selector rules, and stores records
/// and image artifacts in a SQLite database.
#[derive(Parser, Debug)]
#[command(name = "harvest-ripple")]
#[command(version)]
#[command(about = "A page-by-page web harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be harvested without fetching anything
    #[arg(long, conflicts_with_all = ["stats", "export"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export"])]
    stats: bool,

    /// Write all stored records to PATH as JSON Lines and exit
    #[arg(long, value_name = "PATH", conflicts_with_all = ["dry_run", "stats"])]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if let Some(path) = &cli.export {
        handle_export(&config, path)?;
    } else {
        handle_harvest(config, &config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("harvest_ripple=info,warn"),
            1 => EnvFilter::new("harvest_ripple=debug,info"),
            2 => EnvFilter::new("harvest_ripple=trace,debug"),
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

/// Handles the --dry-run mode: shows the validated plan
fn handle_dry_run(config: &Config) {
    println!("=== Harvest-Ripple Dry Run ===\n");

    let harvest = &config.harvest;
    println!("Budgets:");
    println!("  Max pages: {}", harvest.max_pages);
    println!("  Max records: {}", harvest.max_records);
    println!("  Max depth: {}", harvest.max_depth);
    println!("  Workers: {}", harvest.worker_count);
    println!("  Request delay: {}ms", harvest.request_delay_ms);

    let fetch = &config.fetch;
    println!("\nFetching:");
    println!("  User agent: {}", fetch.user_agent);
    println!(
        "  Retries: {} ({:?} backoff from {}ms)",
        fetch.max_retries, fetch.backoff, fetch.retry_backoff_ms
    );
    println!("  Timeout: {}ms", fetch.timeout_ms);
    for (name, value) in &fetch.headers {
        println!("  Header {}: {}", name, value);
    }

    let extract = &config.extract;
    println!("\nExtraction:");
    println!("  Link selector: {}", extract.link_selector);
    if let Some(next) = &extract.next_page_selector {
        println!("  Next page selector: {}", next);
    }
    if let Some(item) = &extract.item_selector {
        println!("  Item selector: {}", item);
    }
    for field in &extract.fields {
        println!("  Field '{}': {}", field.name, field.selector);
    }
    if let Some(images) = &extract.images {
        println!(
            "  Images: {}[{}], up to {} per page",
            images.selector, images.attribute, images.max_per_page
        );
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nSeeds ({}):", harvest.seed_urls.len());
    for seed in &harvest.seed_urls {
        println!("  - [{}] {}", extract.label_for_seed(seed), seed);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let sink = SqliteSink::new(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&sink, RECENT_RUNS)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --export mode: writes stored records as JSON Lines
fn handle_export(config: &Config, path: &Path) -> anyhow::Result<()> {
    let sink = SqliteSink::new(Path::new(&config.output.database_path))?;
    let written = export_jsonl(&sink, path)
        .with_context(|| format!("failed to export records to {}", path.display()))?;

    println!("✓ Exported {} records to: {}", written, path.display());
    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, config_hash: &str) -> anyhow::Result<()> {
    let sink = Arc::new(SqliteSink::new(Path::new(&config.output.database_path))?);
    let run_id = sink.begin_run(config_hash)?;
    tracing::info!("Starting run {}", run_id);

    let summary = match run_harvest(config, &sink).await {
        Ok(summary) => summary,
        Err(e) => {
            if let Err(mark_err) = sink.abort_run(run_id) {
                tracing::error!("Failed to mark run {} aborted: {}", run_id, mark_err);
            }
            return Err(e);
        }
    };
    sink.finish_run(run_id, &summary)?;

    print_summary(&summary);
    Ok(())
}

/// Runs the harvester until a terminal state; Ctrl-C cancels the run
async fn run_harvest(config: Config, sink: &Arc<SqliteSink>) -> anyhow::Result<RunSummary> {
    let harvester = Harvester::new(config, Arc::clone(sink) as Arc<dyn Sink>)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight pages");
            on_interrupt.cancel();
        }
    });

    Ok(harvester.run(cancel).await?)
}
