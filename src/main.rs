//! Hyperliquid Copy-Trading Reconciler
//!
//! Mirrors a target account's positions and resting orders onto the
//! controller account at a fixed copy ratio.

mod api;
mod bot;
mod error;
mod history;
mod models;
mod trading;
mod venue;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{is_mainnet_url, MAINNET_API_URL};
use crate::bot::Copier;
use crate::history::{
    HistoryRecorder, HistoryTable, HistoryTracker, SqliteRecorder, TracingRecorder,
};
use crate::models::InstrumentClass;
use crate::trading::{CopyConfig, SyncMode};
use crate::venue::{ExecutionIdentity, LiveVenue, SimulatedVenue, Venue};

/// Hyperliquid copy-trading CLI.
#[derive(Parser)]
#[command(name = "hlcopier")]
#[command(about = "Mirror a Hyperliquid account's positions and orders", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Venue API base URL
    #[arg(long, env = "HL_API_URL", default_value = MAINNET_API_URL)]
    api_url: String,

    /// SQLite URL for target history (logs only when unset)
    #[arg(short, long, env = "DATABASE_URL")]
    database: Option<String>,

    #[command(flatten)]
    copy: CopyArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CopyArgs {
    /// Address to mirror
    #[arg(long, env = "TARGET_ADDRESS", default_value = "")]
    target: String,

    /// Scale applied to every target size
    #[arg(long, env = "COPY_RATIO", default_value = "0.1")]
    copy_ratio: Decimal,

    /// Max slippage for market adjustments (0.02 = 2%)
    #[arg(long, env = "SLIPPAGE", default_value = "0.02")]
    slippage: Decimal,

    /// full (mirror absolute sizes) or order (follow changes from startup)
    #[arg(long, env = "SYNC_MODE", default_value = "full")]
    sync_mode: SyncMode,

    /// Seconds between ticks
    #[arg(long, env = "POLL_INTERVAL", default_value = "5")]
    poll_interval: u64,

    /// Comma separated instrument classes (perp, spot)
    #[arg(long, env = "INSTRUMENT_CLASSES", value_delimiter = ',', default_value = "perp,spot")]
    instrument_classes: Vec<InstrumentClass>,

    /// Minimum notional of a position adjustment in USD
    #[arg(long, env = "USD_THRESHOLD", default_value = "10")]
    usd_threshold: Decimal,

    /// Pause between order placements in milliseconds
    #[arg(long, env = "ORDER_DELAY_MS", default_value = "100")]
    order_delay_ms: u64,

    /// Signing key of the controller account
    #[arg(long, env = "MY_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Simulate execution for this address when no key is configured
    #[arg(long, env = "DRY_RUN_ADDRESS")]
    dry_run_address: Option<String>,

    /// Resting notional the dry-run ledger accepts before refusing orders for margin
    #[arg(long, env = "DRY_RUN_MARGIN_BUDGET")]
    dry_run_margin_budget: Option<Decimal>,
}

impl CopyArgs {
    fn to_config(&self) -> CopyConfig {
        CopyConfig {
            target_address: self.target.trim().to_lowercase(),
            copy_ratio: self.copy_ratio,
            max_slippage: self.slippage,
            sync_mode: self.sync_mode,
            poll_interval_secs: self.poll_interval,
            instrument_classes: self.instrument_classes.clone(),
            usd_threshold: self.usd_threshold,
            order_delay_ms: self.order_delay_ms,
            ..CopyConfig::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the copy loop
    Run,

    /// Print one normalized snapshot of an address
    State {
        /// Account address
        address: String,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = cli.copy.to_config();

    match cli.command {
        Commands::Run => {
            config.validate().context("Invalid configuration")?;

            let identity = ExecutionIdentity::select(
                cli.copy.private_key.as_deref(),
                cli.copy.dry_run_address.as_deref(),
            )
            .context("No way to execute orders")?;

            let venue =
                build_venue(&cli.api_url, &identity, cli.copy.dry_run_margin_budget).await?;
            let recorder = build_recorder(cli.database.as_deref()).await?;
            let history = HistoryTracker::new(config.target_address.clone(), recorder);

            let mut copier = Copier::new(config, venue, history);
            copier.run().await?;
        }

        Commands::State { address } => {
            let venue = LiveVenue::read_only(&cli.api_url).await?;
            let state = venue
                .fetch_state(&address.to_lowercase(), &InstrumentClass::ALL)
                .await
                .context("Failed to fetch account state")?;

            println!("\n=== Account: {} ===", address);
            println!("\n--- Positions ({}) ---", state.positions.len());
            println!("{:<12} {:<6} {:>16} {:>14} {:>5}", "COIN", "CLASS", "SIZE", "ENTRY", "LEV");
            for p in state.positions.values() {
                println!(
                    "{:<12} {:<6} {:>16} {:>14} {:>4}x",
                    p.instrument, p.class, p.signed_size, p.entry_price, p.leverage
                );
            }

            println!("\n--- Open Orders ({}) ---", state.open_orders.len());
            println!("{:<12} {:<5} {:>14} {:>16} {:>14}", "COIN", "SIDE", "PRICE", "SIZE", "OID");
            for o in &state.open_orders {
                println!(
                    "{:<12} {:<5} {:>14} {:>16} {:>14}",
                    o.instrument, o.side, o.limit_price, o.size, o.order_id
                );
            }
        }

        Commands::Config => {
            let classes: Vec<&str> = config.instrument_classes.iter().map(|c| c.as_str()).collect();

            println!("\n=== Copy Configuration ===\n");
            println!("  API URL:              {}", cli.api_url);
            println!("  Network:              {}", if is_mainnet_url(&cli.api_url) { "mainnet" } else { "testnet" });
            println!("  Target:               {}", display_or_unset(&config.target_address));
            println!("  Copy Ratio:           {}", config.copy_ratio);
            println!("  Max Slippage:         {}%", config.max_slippage * Decimal::from(100));
            println!("  Sync Mode:            {}", config.sync_mode);
            println!("  Poll Interval:        {}s", config.poll_interval_secs);
            println!("  Instrument Classes:   {}", classes.join(","));
            println!("  USD Threshold:        ${}", config.usd_threshold);
            println!("  Order Delay:          {}ms", config.order_delay_ms);
            println!("  History Database:     {}", cli.database.as_deref().unwrap_or("(log only)"));

            let identity = ExecutionIdentity::select(
                cli.copy.private_key.as_deref(),
                cli.copy.dry_run_address.as_deref(),
            );
            let execution = match &identity {
                Ok(ExecutionIdentity::Live { .. }) => "live (signing key configured)".to_string(),
                Ok(ExecutionIdentity::DryRun { address }) => format!("dry run as {}", address),
                Err(e) => format!("unavailable ({})", e),
            };
            println!("  Execution:            {}", execution);

            if let Err(e) = config.validate() {
                println!("\nConfiguration is invalid: {}", e);
            }
        }
    }

    Ok(())
}

/// Pick the execution adapter once for the lifetime of the process.
async fn build_venue(
    api_url: &str,
    identity: &ExecutionIdentity,
    margin_budget: Option<Decimal>,
) -> Result<Arc<dyn Venue>> {
    match identity {
        ExecutionIdentity::Live { private_key } => {
            let venue = LiveVenue::connect(api_url, private_key, is_mainnet_url(api_url))
                .await
                .context("Failed to initialize live venue")?;
            Ok(Arc::new(venue))
        }
        ExecutionIdentity::DryRun { address } => {
            warn!(address = %address, "No signing key configured; running in dry-run mode");
            let upstream = LiveVenue::read_only(api_url)
                .await
                .context("Failed to initialize market data")?;
            let registry = upstream.instruments().clone();
            let mut venue = SimulatedVenue::new(address.to_lowercase(), registry)
                .with_upstream(Arc::new(upstream));
            if let Some(budget) = margin_budget {
                venue = venue.with_margin_budget(budget);
            }
            Ok(Arc::new(venue))
        }
    }
}

async fn build_recorder(database_url: Option<&str>) -> Result<Box<dyn HistoryRecorder>> {
    match database_url {
        Some(url) => {
            let recorder = SqliteRecorder::new(url).await?;
            let orders = recorder.count(HistoryTable::Orders).await?;
            let positions = recorder.count(HistoryTable::Positions).await?;
            let trades = recorder.count(HistoryTable::Trades).await?;
            info!(
                database = %url,
                orders,
                positions,
                trades,
                "Recording target history to SQLite"
            );
            Ok(Box::new(recorder))
        }
        None => Ok(Box::new(TracingRecorder)),
    }
}

fn display_or_unset(s: &str) -> &str {
    if s.is_empty() {
        "(unset)"
    } else {
        s
    }
}
