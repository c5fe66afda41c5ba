//! Signal-driven strategy execution and capital accounting for
//! copy-trading prediction-market positions.

mod backtest;
mod db;
mod engine;
mod models;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use backtest::{BacktestEngine, HistoricalSignal};
use db::Database;
use engine::{ExecutionEngine, StrategyConfig};
use models::{MarketResolution, OrderStatus, RawTradeEvent, TradeSignal, TraderStats};

#[derive(Parser)]
#[command(name = "polycopy", about = "Copy-trading strategy execution engine")]
struct Cli {
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite://polycopy.db?mode=rwc",
        global = true
    )]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a strategy from a JSON config file
    Add {
        /// Path to a StrategyConfig JSON file
        file: PathBuf,
    },

    /// List registered strategies
    List,

    /// Stop a strategy from taking new signals
    Pause { strategy_id: String },

    /// Resume a paused strategy
    Resume { strategy_id: String },

    /// Paper-run a signal feed through all active strategies
    Run {
        /// Raw trade events, one JSON object per line
        signals: PathBuf,

        /// Market resolutions, one JSON object per line
        #[arg(long)]
        resolutions: Option<PathBuf>,
    },

    /// Replay historical signals against strategy configs
    Backtest {
        /// Historical signals, one JSON object per line
        signals: PathBuf,

        /// Strategy configs, one JSON object per line
        #[arg(long)]
        configs: PathBuf,

        /// Entry slippage as a fraction, e.g. 0.01
        #[arg(long, default_value = "0")]
        slippage: Decimal,
    },

    /// Rebuild ledgers from order history and report drift
    Reconcile {
        /// Strategy to reconcile; all strategies when omitted
        strategy_id: Option<String>,

        /// Overwrite drifted ledgers with the recomputed values
        #[arg(long)]
        apply: bool,
    },

    /// Show per-strategy capital and order counts
    Status,

    /// Load trader statistics snapshots from a JSONL file
    ImportStats { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Add { file } => {
            let db = Arc::new(Database::new(&cli.database_url).await?);
            let mut engine = ExecutionEngine::new(db).await?;

            let json = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let config: StrategyConfig =
                serde_json::from_str(&json).context("Failed to parse strategy config")?;
            let strategy_id = config.strategy_id.clone();
            engine.add_strategy(config).await?;
            println!("Registered strategy '{strategy_id}'");
        }

        Command::List => {
            let db = Database::new(&cli.database_url).await?;
            let strategies = db.get_strategies().await?;
            if strategies.is_empty() {
                println!("No strategies registered");
                return Ok(());
            }

            println!(
                "{:<20} {:<12} {:>10} {:>10} {:>8}",
                "STRATEGY", "METHOD", "CAPITAL", "BET", "STATE"
            );
            for config in strategies {
                let state = if !config.is_active {
                    "inactive"
                } else if config.is_paused {
                    "paused"
                } else {
                    "active"
                };
                println!(
                    "{:<20} {:<12} {:>10} {:>10} {:>8}",
                    config.strategy_id,
                    format!("{:?}", config.allocation_method).to_lowercase(),
                    format!("${}", config.starting_capital),
                    format!("${}", config.bet_size),
                    state
                );
            }
        }

        Command::Pause { strategy_id } => {
            let db = Arc::new(Database::new(&cli.database_url).await?);
            let mut engine = ExecutionEngine::new(db).await?;
            if engine.set_paused(&strategy_id, true).await? {
                println!("Paused '{strategy_id}'");
            } else {
                println!("No such strategy: '{strategy_id}'");
            }
        }

        Command::Resume { strategy_id } => {
            let db = Arc::new(Database::new(&cli.database_url).await?);
            let mut engine = ExecutionEngine::new(db).await?;
            if engine.set_paused(&strategy_id, false).await? {
                println!("Resumed '{strategy_id}'");
            } else {
                println!("No such strategy: '{strategy_id}'");
            }
        }

        Command::Run {
            signals,
            resolutions,
        } => {
            let db = Arc::new(Database::new(&cli.database_url).await?);
            let engine = ExecutionEngine::new(db).await?;
            run_feed(&engine, &signals, resolutions.as_deref()).await?;

            for strategy_id in engine.strategy_ids() {
                if let Some(ledger) = engine.ledger_snapshot(&strategy_id).await {
                    println!(
                        "{:<20} cash ${:.2}  locked ${:.2}  pnl ${:+.2}",
                        strategy_id,
                        ledger.available_cash,
                        ledger.locked_capital,
                        ledger.realized_pnl
                    );
                }
            }
        }

        Command::Backtest {
            signals,
            configs,
            slippage,
        } => {
            let signals: Vec<HistoricalSignal> = read_jsonl(&signals)?;
            let configs: Vec<StrategyConfig> = read_jsonl(&configs)?;

            let results = BacktestEngine::new(slippage).run(&configs, &signals)?;
            for result in results {
                println!("{result}\n");
            }
        }

        Command::Reconcile { strategy_id, apply } => {
            let db = Arc::new(Database::new(&cli.database_url).await?);
            let engine = ExecutionEngine::new(db).await?;

            let targets = match strategy_id {
                Some(id) => vec![id],
                None => engine.strategy_ids(),
            };

            for id in targets {
                match engine.reconcile(&id, apply).await? {
                    None => println!("{id}: clean"),
                    Some(drift) => {
                        println!("{drift}");
                        if apply {
                            println!("{id}: ledger rebuilt");
                        }
                    }
                }
            }
        }

        Command::Status => {
            let db = Database::new(&cli.database_url).await?;
            let strategies = db.get_strategies().await?;
            if strategies.is_empty() {
                println!("No strategies registered");
                return Ok(());
            }

            println!(
                "{:<20} {:>10} {:>10} {:>10} {:>8} {:>8} {:>8}",
                "STRATEGY", "CASH", "LOCKED", "PNL", "OPEN", "SETTLED", "REJECTED"
            );
            for config in strategies {
                let Some(ledger) = db.get_ledger(&config.strategy_id).await? else {
                    continue;
                };
                let counts = db.get_order_counts(&config.strategy_id).await?;
                println!(
                    "{:<20} {:>10.2} {:>10.2} {:>+10.2} {:>8} {:>8} {:>8}",
                    config.strategy_id,
                    ledger.available_cash,
                    ledger.locked_capital,
                    ledger.realized_pnl,
                    counts.open,
                    counts.settled,
                    counts.rejected
                );
            }
        }

        Command::ImportStats { file } => {
            let db = Database::new(&cli.database_url).await?;
            let stats: Vec<TraderStats> = read_jsonl(&file)?;
            let count = stats.len();
            for snapshot in stats {
                db.save_trader_stats(&snapshot).await?;
            }
            println!("Imported {count} trader snapshots");
        }
    }

    Ok(())
}

/// Feed a recorded signal file through the live pipeline with immediate
/// full paper fills, then apply any resolutions.
async fn run_feed(
    engine: &ExecutionEngine,
    signals_path: &Path,
    resolutions_path: Option<&Path>,
) -> Result<()> {
    let raw_events: Vec<RawTradeEvent> = read_jsonl(signals_path)?;
    let mut signals: Vec<TradeSignal> = Vec::with_capacity(raw_events.len());
    for raw in raw_events {
        match raw.normalize() {
            Ok(signal) => signals.push(signal),
            Err(e) => warn!("Dropping malformed event: {e}"),
        }
    }
    signals.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.signal_id.cmp(&b.signal_id))
    });

    info!(count = signals.len(), "Processing signal feed");

    for signal in &signals {
        for order in engine.process_signal(signal).await? {
            if order.status == OrderStatus::Pending {
                engine
                    .record_fill(&order.order_id, order.signal_size_usd, signal.price)
                    .await?;
            }
        }
    }

    if let Some(path) = resolutions_path {
        let mut resolutions: Vec<MarketResolution> = read_jsonl(path)?;
        resolutions.sort_by(|a, b| {
            a.resolved_at
                .cmp(&b.resolved_at)
                .then_with(|| a.market_id.cmp(&b.market_id))
        });

        info!(count = resolutions.len(), "Applying resolutions");

        for resolution in &resolutions {
            engine.apply_resolution(resolution).await?;
        }
    }

    Ok(())
}

/// Read a newline-delimited JSON file, skipping blank lines.
fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let mut items = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(line)
            .with_context(|| format!("Bad JSON at {}:{}", path.display(), lineno + 1))?;
        items.push(item);
    }
    Ok(items)
}
