use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use podingest::config::Config;
use podingest::feed::{build_client, load_feed_urls};
use podingest::ingest::{self, deadline_token, RunSummary};
use podingest::storage::{Database, DatabaseError};
use podingest::util::HostPolicy;

/// Get the config directory path (~/.config/podingest/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("podingest"))
}

#[derive(Parser, Debug)]
#[command(
    name = "podingest",
    version,
    about = "Fetch podcast feeds and sync them into a SQLite catalogue"
)]
struct Args {
    /// JSON file containing an array of feed URLs
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Config file (default: ~/.config/podingest/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Feeds per batch (overrides the config file)
    #[arg(long, value_name = "N")]
    batch_size: Option<usize>,

    /// Feeds processed in parallel (overrides the config file)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Accept feed URLs on loopback and private networks
    #[arg(long)]
    allow_private: bool,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "podingest=debug" } else { "podingest=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_summary(summary: &RunSummary, podcasts: i64, episodes: i64) {
    println!();
    println!(
        "Feeds: {} total, {} fetched, {} failed to fetch, {} failed to store",
        summary.feeds_total, summary.fetched, summary.fetch_failed, summary.reconcile_failed
    );
    println!(
        "Podcasts: {} new, {} updated. Episodes: {} new ({} items without iTunes metadata skipped)",
        summary.podcasts_inserted,
        summary.podcasts_updated,
        summary.episodes_inserted,
        summary.items_skipped
    );
    if summary.cancelled {
        println!(
            "Run cancelled before completion: {} feeds not processed",
            summary.unprocessed
        );
    }
    println!("Catalogue now holds {podcasts} podcasts and {episodes} episodes");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));

    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(database) = &args.database {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        config.override_database(database, &cwd);
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    config.validate()?;

    let policy = if args.allow_private {
        HostPolicy::AllowPrivate
    } else {
        HostPolicy::PublicOnly
    };
    let urls = load_feed_urls(&args.input, policy)
        .await
        .context("Failed to load feed list")?;
    println!("Loaded {} feeds from {}", urls.len(), args.input.display());

    let db_path = config.database_path(&config_dir);
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another ingest run appears to hold the database. Wait for it to finish and try again.");
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let settings = config.pipeline_settings();
    let client = build_client(&config.user_agent, Duration::from_secs(config.fetch_timeout_secs))
        .context("Failed to build HTTP client")?;

    let cancel = deadline_token(config.run_timeout());
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling remaining feeds");
            interrupt.cancel();
        }
    });

    let summary = ingest::run(&db, &client, urls, &settings, cancel).await?;

    let podcasts = db.count_podcasts().await.context("Failed to count podcasts")?;
    let episodes = db.count_episodes().await.context("Failed to count episodes")?;
    print_summary(&summary, podcasts, episodes);

    Ok(())
}
