//! deal-ingest binary entrypoint.
//! `fetch` submits one ingestion job; `serve` runs the HTTP trigger (and an
//! optional periodic scheduler).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use deal_ingest::api::{self, AppState};
use deal_ingest::config::{self, IngestConfig};
use deal_ingest::ingest::scheduler::{spawn_scheduler, IngestSchedulerCfg};
use deal_ingest::ingest::types::ProviderSelector;
use deal_ingest::logging::{self, LogFormat};
use deal_ingest::metrics::Metrics;

#[derive(Parser, Debug)]
#[command(name = "deal-ingest", version, about = "Fetch travel deals from external providers into the deal store")]
struct Cli {
    /// Config file (defaults to $DEAL_INGEST_CONFIG, then config/ingest.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, env = "LOG_FORMAT", default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit one ingestion job
    Fetch {
        /// all, flight-provider or hotel-provider
        #[arg(long, default_value = "all", value_parser = parse_selector)]
        source: ProviderSelector,
    },
    /// Run the HTTP trigger API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
        /// Submit a job every N seconds (overrides config; 0 disables)
        #[arg(long)]
        every_secs: Option<u64>,
    },
}

fn parse_selector(s: &str) -> Result<ProviderSelector, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn load_config(path: Option<&PathBuf>) -> Result<IngestConfig> {
    match path {
        Some(p) => config::load_config_from(p),
        None => config::load_config_default(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logging::init(cli.log_format);

    let res = match cli.command {
        Command::Fetch { source } => fetch(cli.config.as_ref(), source).await,
        Command::Serve { bind, every_secs } => serve(cli.config.as_ref(), bind, every_secs).await,
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error fetching deals: {e:#}");
            tracing::error!(error = ?e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn fetch(config_path: Option<&PathBuf>, source: ProviderSelector) -> Result<()> {
    println!("Fetching deals from {source} source...");

    let cfg = load_config(config_path)?;
    let (queue, _pipeline) = deal_ingest::start_queue(&cfg)?;
    let job_id = queue.submit(source).context("submitting ingestion job")?;
    println!("Deals fetching job dispatched to the queue (job {job_id}).");

    // The queue lives in this process: stay up until the job is done. Its
    // outcome is reported through logs only.
    let _ = queue.wait(job_id).await;
    Ok(())
}

async fn serve(
    config_path: Option<&PathBuf>,
    bind: SocketAddr,
    every_secs: Option<u64>,
) -> Result<()> {
    let cfg = load_config(config_path)?;
    let metrics = Metrics::init(&cfg.rate_limit)?;
    let (queue, _pipeline) = deal_ingest::start_queue(&cfg)?;

    let interval_secs = every_secs.unwrap_or(cfg.scheduler.interval_secs);
    if interval_secs > 0 {
        let selector = cfg
            .scheduler
            .source
            .parse::<ProviderSelector>()
            .context("scheduler.source")?;
        spawn_scheduler(
            queue.clone(),
            IngestSchedulerCfg {
                interval_secs,
                selector,
            },
        );
    }

    let app = api::router_with_metrics(AppState { queue }, &metrics);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, "trigger API listening");
    axum::serve(listener, app).await.context("http server")?;
    Ok(())
}
