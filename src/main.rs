//! gemscout daemon entry point.
//!
//! Wires REST provider adapters, the alerted set, and the pipeline
//! controller together, then runs scan cycles over a discovery snapshot
//! produced by the source connectors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gemscout::config::{
    EngineConfig, PROVIDER_METADATA, PROVIDER_OHLCV, PROVIDER_SEARCH, PROVIDER_SECURITY,
};
use gemscout::models::DiscoveryRecord;
use gemscout::pipeline::{CoreContext, PipelineController};
use gemscout::providers::{ProviderRegistry, RestProviderAdapter, RestProviderConfig};
use gemscout::storage::{AlertedSet, MemoryAlertedSet, SqliteAlertedSet};

#[derive(Parser)]
#[command(name = "gemscout", about = "Early-stage token discovery and ranking engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scan cycle over a discovery snapshot and exit.
    Scan {
        /// JSON file of discovery records.
        #[arg(long)]
        discovery: PathBuf,
    },
    /// Re-run scan cycles on an interval.
    Daemon {
        /// JSON file of discovery records, re-read each cycle.
        #[arg(long)]
        discovery: PathBuf,
        /// Seconds between cycle starts.
        #[arg(long, default_value_t = 300)]
        interval_secs: u64,
    },
}

fn build_registry(config: &EngineConfig) -> Result<ProviderRegistry> {
    // (name, default base, key env var, batch, batch ohlcv)
    let specs = [
        (
            PROVIDER_OHLCV,
            "https://public-api.birdeye.so",
            "BIRDEYE_API_KEY",
            true,
            true,
        ),
        (
            PROVIDER_METADATA,
            "https://solana-gateway.moralis.io",
            "MORALIS_API_KEY",
            true,
            false,
        ),
        (
            PROVIDER_SEARCH,
            "https://api.dexscreener.com",
            "DEXSCREENER_API_KEY",
            false,
            false,
        ),
        (
            PROVIDER_SECURITY,
            "https://api.rugcheck.xyz",
            "RUGCHECK_API_KEY",
            false,
            false,
        ),
    ];

    let mut registry = ProviderRegistry::new();
    for (name, default_base, key_var, supports_batch, supports_ohlcv_batch) in specs {
        let base_var = format!("GEMSCOUT_{}_BASE_URL", name.to_uppercase());
        let base_url = std::env::var(&base_var).unwrap_or_else(|_| default_base.to_string());
        let api_key = std::env::var(key_var).ok();
        let limits = config.limits(name);

        let adapter = RestProviderAdapter::new(RestProviderConfig {
            name: name.to_string(),
            base_url,
            api_key,
            timeout: limits.timeout,
            supports_batch,
            supports_ohlcv_batch,
        })
        .with_context(|| format!("failed to build adapter for {name}"))?;
        registry.register(Arc::new(adapter));
    }
    Ok(registry)
}

fn build_alerted_set() -> Result<Arc<dyn AlertedSet>> {
    match std::env::var("GEMSCOUT_DB") {
        Ok(path) => {
            let set = SqliteAlertedSet::open(&path)
                .with_context(|| format!("failed to open alerted db at {path}"))?;
            let _ = set.prune();
            Ok(Arc::new(set))
        }
        Err(_) => Ok(Arc::new(MemoryAlertedSet::new())),
    }
}

fn load_discovery(path: &Path) -> Result<Vec<DiscoveryRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read discovery snapshot {path:?}"))?;
    serde_json::from_str(&raw).context("failed to decode discovery snapshot")
}

async fn run_once(
    controller: &PipelineController,
    alerted: &Arc<dyn AlertedSet>,
    discovery_path: &Path,
    alert_ttl: Duration,
) -> Result<()> {
    let discovery = load_discovery(discovery_path)?;
    info!(records = discovery.len(), "starting scan cycle");

    let output = controller.run_cycle(discovery).await;

    for candidate in &output.ranked_candidates {
        info!(
            token = %candidate.token_key,
            symbol = %candidate.symbol,
            source = candidate.source.as_str(),
            score = candidate.final_score.unwrap_or(0.0),
            quality = candidate.data_quality.as_str(),
            "candidate"
        );
        alerted.add(&candidate.token_key, alert_ttl);
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&output.cost_report)
            .context("failed to serialize cost report")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gemscout=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    let alert_ttl = config.alert_ttl;

    let registry = build_registry(&config)?;
    let alerted = build_alerted_set()?;
    let controller = PipelineController::new(
        CoreContext::new(config, registry),
        alerted.clone(),
    );

    match cli.command {
        Command::Scan { discovery } => {
            run_once(&controller, &alerted, &discovery, alert_ttl).await?;
        }
        Command::Daemon {
            discovery,
            interval_secs,
        } => {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = run_once(&controller, &alerted, &discovery, alert_ttl).await {
                    warn!(error = %e, "scan cycle failed");
                }
            }
        }
    }

    Ok(())
}
