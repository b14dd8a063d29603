//! cc-harvest main entry point
//!
//! This is the command-line interface for the CommonCrawl harvester.

use anyhow::Context;
use cc_harvest::config::{load_config_with_hash, Config};
use cc_harvest::pipeline::{harvest, HarvestOptions};
use cc_harvest::IndexAggregator;
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// cc-harvest: CommonCrawl index aggregator and page extractor
///
/// cc-harvest looks up captures of the configured targets in CommonCrawl's CDX
/// indexes, downloads the archived pages and streams extracted documents to disk.
#[derive(Parser, Debug)]
#[command(name = "cc-harvest")]
#[command(version = "1.0.0")]
#[command(about = "CommonCrawl index aggregator and page extractor", long_about = None)]
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

    /// Validate config and show which shards would be queried without fetching any index pages
    #[arg(long, conflicts_with_all = ["stats", "records_only"])]
    dry_run: bool,

    /// Show statistics from the ledger and exit
    #[arg(long, conflicts_with_all = ["dry_run", "records_only"])]
    stats: bool,

    /// Write the index records themselves instead of downloading pages
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    records_only: bool,

    /// Stop after this many index records (overrides the config)
    #[arg(long, value_name = "N")]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config).await
    } else if cli.stats {
        handle_stats(&config)
    } else {
        let options = HarvestOptions {
            config_hash,
            limit: cli.limit,
            records_only: cli.records_only,
            ..HarvestOptions::default()
        };
        handle_harvest(&config, options).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("cc_harvest=info,warn"),
            1 => EnvFilter::new("cc_harvest=debug,info"),
            2 => EnvFilter::new("cc_harvest=trace,debug"),
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

/// Handles the --dry-run mode: resolves shards and prints the work plan
async fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== cc-harvest Dry Run ===\n");

    println!("Index Query:");
    println!("  Match type: {}", config.aggregator.match_type);
    println!("  Since: {}", display_date(config.aggregator.since));
    println!("  To: {}", display_date(config.aggregator.to));
    println!("  Limit: {}", config.aggregator.limit.map_or("none".to_string(), |l| l.to_string()));
    println!("  Prefetch size: {}", config.aggregator.prefetch_size);
    println!("  Filters: {:?}", config.aggregator.filters);

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nOutput:");
    println!("  Directory: {}", config.output.directory);
    println!("  Format: {:?}", config.output.format);
    println!("  Ledger: {}", config.output.ledger_path.as_deref().unwrap_or("disabled"));

    println!("\nExtractors ({}):", config.extractors.len());
    for extractor in &config.extractors {
        println!("  - {} ({} fields)", extractor.name, extractor.fields.len());
    }

    println!("\nRoutes ({}):", config.routes.len());
    for route in &config.routes {
        println!("  - {} -> {}", route.pattern, route.extractor);
    }

    let aggregator = IndexAggregator::from_config(config)
        .await
        .context("Failed to resolve index shards")?;
    let plan = aggregator.work_plan();

    let mut in_window: Vec<&str> = plan.iter().map(|(_, shard)| shard.url.as_str()).collect();
    in_window.sort_unstable();
    in_window.dedup();

    println!(
        "\nShards ({} resolved, {} in window):",
        aggregator.shards().len(),
        in_window.len()
    );
    for (target, shard) in &plan {
        println!("  - {} @ {}", target, shard);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would query {} target x shard pairs", plan.len());

    Ok(())
}

fn display_date(date: Option<chrono::DateTime<chrono::Utc>>) -> String {
    date.map_or("unbounded".to_string(), |d| d.to_rfc3339())
}

/// Handles the --stats mode: shows statistics from the ledger
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use cc_harvest::output::{load_statistics, print_statistics};
    use cc_harvest::storage::open_storage;

    let ledger_path = config
        .output
        .ledger_path
        .as_deref()
        .context("No ledger-path configured in [output]")?;

    println!("Ledger: {}\n", ledger_path);

    let storage = open_storage(Path::new(ledger_path))
        .with_context(|| format!("Failed to open ledger {}", ledger_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(config: &Config, options: HarvestOptions) -> anyhow::Result<()> {
    tracing::info!(
        "Targets: {}, Extractors: {}, Routes: {}",
        config.targets.len(),
        config.extractors.len(),
        config.routes.len()
    );

    let shutdown: CancellationToken = options.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after in-flight downloads");
            shutdown.cancel();
        }
    });

    match harvest(config, &options).await {
        Ok(summary) => {
            tracing::info!(
                "Harvest completed: {} records found, {} documents streamed ({:.1}% downloads succeeded)",
                summary.records_found,
                summary.streamed,
                summary.download_success_rate()
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}
