use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use isjh_core::Platform;
use isjh_storage::{HttpFetcher, OrganizationFilter, PgStore, TokioPacer};
use isjh_sync::{LivenessMethod, RunOptions, SyncConfig, SyncPipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "isjh-cli")]
#[command(about = "International school job harvester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Find ATS accounts, websites and career pages for organizations without an identity
    Discover {
        #[command(flatten)]
        common: CommonArgs,
        /// Pause between probe attempts, in milliseconds
        #[arg(long)]
        probe_delay: Option<u64>,
    },
    /// Harvest postings from confirmed sources into the store
    Harvest {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long)]
        max_pages: Option<usize>,
        #[arg(long)]
        max_postings: Option<usize>,
    },
    /// Re-check live harvested postings and take down stale ones
    CheckLiveness {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Pause between batches, in milliseconds
        #[arg(long)]
        batch_delay: Option<u64>,
        /// `head` or `get`
        #[arg(long)]
        method: Option<LivenessMethod>,
        /// Consecutive failures before a posting is taken down
        #[arg(long)]
        threshold: Option<u32>,
    },
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Read and fetch everything but write nothing
    #[arg(long)]
    dry_run: bool,
    /// ISO 3166-1 alpha-2 country code
    #[arg(long)]
    country: Option<String>,
    #[arg(long)]
    platform: Option<Platform>,
    #[arg(long, default_value_t = 0)]
    offset: usize,
    #[arg(long)]
    limit: Option<usize>,
}

impl CommonArgs {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run,
            filter: OrganizationFilter {
                country_code: self.country.clone(),
                platform: self.platform,
                offset: self.offset,
                limit: self.limit,
                ..Default::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,isjh_sync=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();

    let options = match &cli.command {
        Commands::Discover { common, probe_delay } => {
            if let Some(ms) = probe_delay {
                config.probe_delay = Duration::from_millis(*ms);
            }
            common.run_options()
        }
        Commands::Harvest {
            common,
            max_pages,
            max_postings,
        } => {
            config.max_pages = max_pages.unwrap_or(config.max_pages);
            config.max_postings = max_postings.unwrap_or(config.max_postings);
            common.run_options()
        }
        Commands::CheckLiveness {
            dry_run,
            batch_size,
            batch_delay,
            method,
            threshold,
        } => {
            let liveness = &mut config.liveness;
            liveness.batch_size = batch_size.unwrap_or(liveness.batch_size);
            if let Some(ms) = batch_delay {
                liveness.batch_delay = Duration::from_millis(*ms);
            }
            liveness.method = method.unwrap_or(liveness.method);
            liveness.failure_threshold = threshold.unwrap_or(liveness.failure_threshold);
            RunOptions {
                dry_run: *dry_run,
                ..Default::default()
            }
        }
    };

    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to the job store")?;
    let fetcher = HttpFetcher::new(config.http_client_config()).context("building http client")?;
    let pipeline = SyncPipeline::new(config, Arc::new(store), Arc::new(fetcher), Arc::new(TokioPacer));

    let record = match cli.command {
        Commands::Discover { .. } => pipeline.run_discovery(&options).await?,
        Commands::Harvest { .. } => pipeline.run_harvest(&options).await?,
        Commands::CheckLiveness { .. } => pipeline.run_liveness_check(&options).await?,
    };
    tracing::info!(run_id = %record.id, run_type = record.run_type.as_str(), "run complete");
    println!("{}", serde_json::to_string_pretty(&record)?);

    Ok(())
}
