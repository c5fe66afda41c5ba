//! Database persistence for engine state.
//!
//! Stores everything the engine needs to resume and to audit:
//! - Strategy configurations with active/paused flags
//! - Per-strategy capital ledgers
//! - Full order history (the reconciliation fold's source of truth)
//! - Seen signals (durable dedup set)
//! - Applied market resolutions
//! - Trader statistics snapshots (refreshed by an external pipeline)

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::engine::{CapitalLedger, StrategyConfig};
use crate::models::{
    MarketResolution, Order, OrderOutcome, OrderStatus, RejectReason, Side, TraderStats,
};

/// Database connection pool with engine state management.
pub struct Database {
    pool: SqlitePool,
}

/// Stored order row; converted to [`Order`] at the boundary.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderRow {
    pub order_id: String,
    pub strategy_id: String,
    pub signal_id: String,
    pub market_id: String,
    pub outcome_side: String,
    pub signal_size_usd: f64,
    pub executed_size_usd: f64,
    pub executed_price: f64,
    pub shares_bought: f64,
    pub fill_rate: f64,
    pub status: String,
    pub outcome: String,
    pub rejection_reason: Option<String>,
    pub pnl_usd: Option<f64>,
    pub order_placed_at: String,
    pub resolved_at: Option<String>,
}

/// Stored ledger row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerRow {
    pub strategy_id: String,
    pub starting_capital: f64,
    pub available_cash: f64,
    pub locked_capital: f64,
    pub realized_pnl: f64,
    pub peak_equity: f64,
    pub current_drawdown_pct: f64,
    pub daily_spent: f64,
    pub daily_loss: f64,
}

/// Per-strategy order counts for status reporting.
#[derive(Debug, Clone, Default)]
pub struct OrderCounts {
    pub total: i64,
    pub open: i64,
    pub settled: i64,
    pub rejected: i64,
}

fn dec(v: f64) -> Decimal {
    Decimal::try_from(v).unwrap_or(Decimal::ZERO)
}

fn f64_of(v: Decimal) -> f64 {
    v.to_f64().unwrap_or(0.0)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("bad timestamp '{s}'"))
}

impl OrderRow {
    pub fn into_order(self) -> Result<Order> {
        let outcome_side = Side::parse(&self.outcome_side)
            .ok_or_else(|| anyhow!("bad outcome_side '{}'", self.outcome_side))?;
        let status = OrderStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("bad status '{}'", self.status))?;
        let outcome = OrderOutcome::parse(&self.outcome)
            .ok_or_else(|| anyhow!("bad outcome '{}'", self.outcome))?;

        Ok(Order {
            order_id: self.order_id,
            strategy_id: self.strategy_id,
            signal_id: self.signal_id,
            market_id: self.market_id,
            outcome_side,
            signal_size_usd: dec(self.signal_size_usd),
            executed_size_usd: dec(self.executed_size_usd),
            executed_price: dec(self.executed_price),
            shares_bought: dec(self.shares_bought),
            fill_rate: dec(self.fill_rate),
            status,
            outcome,
            rejection_reason: self.rejection_reason.as_deref().and_then(RejectReason::parse),
            pnl_usd: self.pnl_usd.map(dec),
            order_placed_at: parse_time(&self.order_placed_at)?,
            resolved_at: self.resolved_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

impl LedgerRow {
    pub fn into_ledger(self) -> CapitalLedger {
        CapitalLedger {
            starting_capital: dec(self.starting_capital),
            available_cash: dec(self.available_cash),
            locked_capital: dec(self.locked_capital),
            realized_pnl: dec(self.realized_pnl),
            peak_equity: dec(self.peak_equity),
            current_drawdown_pct: self.current_drawdown_pct,
            daily_spent: dec(self.daily_spent),
            daily_loss: dec(self.daily_loss),
        }
    }
}

impl Database {
    /// Create a new database connection and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategies (
                strategy_id TEXT PRIMARY KEY,
                config TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                is_paused INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledgers (
                strategy_id TEXT PRIMARY KEY,
                starting_capital REAL NOT NULL,
                available_cash REAL NOT NULL,
                locked_capital REAL NOT NULL DEFAULT 0,
                realized_pnl REAL NOT NULL DEFAULT 0,
                peak_equity REAL NOT NULL,
                current_drawdown_pct REAL NOT NULL DEFAULT 0,
                daily_spent REAL NOT NULL DEFAULT 0,
                daily_loss REAL NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (strategy_id) REFERENCES strategies(strategy_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                strategy_id TEXT NOT NULL,
                signal_id TEXT NOT NULL,
                market_id TEXT NOT NULL,
                outcome_side TEXT NOT NULL,
                signal_size_usd REAL NOT NULL,
                executed_size_usd REAL NOT NULL DEFAULT 0,
                executed_price REAL NOT NULL DEFAULT 0,
                shares_bought REAL NOT NULL DEFAULT 0,
                fill_rate REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                outcome TEXT NOT NULL DEFAULT 'OPEN',
                rejection_reason TEXT,
                pnl_usd REAL,
                order_placed_at TEXT NOT NULL,
                resolved_at TEXT,
                UNIQUE(strategy_id, signal_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen_signals (
                signal_id TEXT PRIMARY KEY,
                trader_id TEXT NOT NULL,
                market_id TEXT NOT NULL,
                seen_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resolutions (
                market_id TEXT PRIMARY KEY,
                winning_side TEXT,
                closed INTEGER NOT NULL,
                resolved_at TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trader_stats (
                trader_id TEXT PRIMARY KEY,
                win_rate REAL NOT NULL,
                roi REAL NOT NULL,
                avg_trade_size REAL NOT NULL,
                sample_count INTEGER NOT NULL,
                refreshed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_strategy ON orders(strategy_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_orders_market_open ON orders(market_id, outcome)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Strategies ====================

    /// Save or update a strategy configuration.
    pub async fn save_strategy(&self, config: &StrategyConfig) -> Result<()> {
        let json = serde_json::to_string(config).context("Failed to serialize strategy")?;

        sqlx::query(
            r#"
            INSERT INTO strategies (strategy_id, config, is_active, is_paused)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(strategy_id) DO UPDATE SET
                config = excluded.config,
                is_active = excluded.is_active,
                is_paused = excluded.is_paused,
                updated_at = datetime('now')
            "#,
        )
        .bind(&config.strategy_id)
        .bind(json)
        .bind(config.is_active)
        .bind(config.is_paused)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load all strategy configurations.
    pub async fn get_strategies(&self) -> Result<Vec<StrategyConfig>> {
        let rows: Vec<(String, bool, bool)> =
            sqlx::query_as("SELECT config, is_active, is_paused FROM strategies")
                .fetch_all(&self.pool)
                .await?;

        let mut configs = Vec::with_capacity(rows.len());
        for (json, is_active, is_paused) in rows {
            let mut config: StrategyConfig =
                serde_json::from_str(&json).context("Failed to parse stored strategy")?;
            // Flags are toggled via pause/resume without rewriting the JSON.
            config.is_active = is_active;
            config.is_paused = is_paused;
            configs.push(config);
        }

        Ok(configs)
    }

    /// Flip a strategy's paused flag.
    pub async fn set_strategy_paused(&self, strategy_id: &str, paused: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE strategies SET is_paused = ?, updated_at = datetime('now') WHERE strategy_id = ?",
        )
        .bind(paused)
        .bind(strategy_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Ledgers ====================

    /// Save or update a strategy's ledger.
    pub async fn save_ledger(&self, strategy_id: &str, ledger: &CapitalLedger) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ledgers (
                strategy_id, starting_capital, available_cash, locked_capital,
                realized_pnl, peak_equity, current_drawdown_pct, daily_spent, daily_loss
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(strategy_id) DO UPDATE SET
                starting_capital = excluded.starting_capital,
                available_cash = excluded.available_cash,
                locked_capital = excluded.locked_capital,
                realized_pnl = excluded.realized_pnl,
                peak_equity = excluded.peak_equity,
                current_drawdown_pct = excluded.current_drawdown_pct,
                daily_spent = excluded.daily_spent,
                daily_loss = excluded.daily_loss,
                updated_at = datetime('now')
            "#,
        )
        .bind(strategy_id)
        .bind(f64_of(ledger.starting_capital))
        .bind(f64_of(ledger.available_cash))
        .bind(f64_of(ledger.locked_capital))
        .bind(f64_of(ledger.realized_pnl))
        .bind(f64_of(ledger.peak_equity))
        .bind(ledger.current_drawdown_pct)
        .bind(f64_of(ledger.daily_spent))
        .bind(f64_of(ledger.daily_loss))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load a strategy's ledger, if one has been persisted.
    pub async fn get_ledger(&self, strategy_id: &str) -> Result<Option<CapitalLedger>> {
        let row: Option<LedgerRow> =
            sqlx::query_as("SELECT * FROM ledgers WHERE strategy_id = ?")
                .bind(strategy_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(LedgerRow::into_ledger))
    }

    // ==================== Seen signals ====================

    /// Claim a signal id for processing.
    ///
    /// Returns true for the one caller whose insert landed; false means
    /// the signal was already claimed and must be skipped. The row
    /// itself is the serialization point for concurrent deliveries.
    pub async fn mark_signal_seen(
        &self,
        signal_id: &str,
        trader_id: &str,
        market_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO seen_signals (signal_id, trader_id, market_id) VALUES (?, ?, ?)",
        )
        .bind(signal_id)
        .bind(trader_id)
        .bind(market_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ==================== Orders ====================

    /// Save or update an order.
    pub async fn save_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, strategy_id, signal_id, market_id, outcome_side,
                signal_size_usd, executed_size_usd, executed_price, shares_bought,
                fill_rate, status, outcome, rejection_reason, pnl_usd,
                order_placed_at, resolved_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(order_id) DO UPDATE SET
                executed_size_usd = excluded.executed_size_usd,
                executed_price = excluded.executed_price,
                shares_bought = excluded.shares_bought,
                fill_rate = excluded.fill_rate,
                status = excluded.status,
                outcome = excluded.outcome,
                rejection_reason = excluded.rejection_reason,
                pnl_usd = excluded.pnl_usd,
                resolved_at = excluded.resolved_at
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.strategy_id)
        .bind(&order.signal_id)
        .bind(&order.market_id)
        .bind(order.outcome_side.as_str())
        .bind(f64_of(order.signal_size_usd))
        .bind(f64_of(order.executed_size_usd))
        .bind(f64_of(order.executed_price))
        .bind(f64_of(order.shares_bought))
        .bind(f64_of(order.fill_rate))
        .bind(order.status.as_str())
        .bind(order.outcome.as_str())
        .bind(order.rejection_reason.map(|r| r.as_code()))
        .bind(order.pnl_usd.map(f64_of))
        .bind(order.order_placed_at.to_rfc3339())
        .bind(order.resolved_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load a single order.
    pub async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as("SELECT * FROM orders WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(OrderRow::into_order).transpose()
    }

    /// Full order history for a strategy, oldest first. This is the
    /// reconciliation fold's input.
    pub async fn get_orders_for_strategy(&self, strategy_id: &str) -> Result<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(
            "SELECT * FROM orders WHERE strategy_id = ? ORDER BY order_placed_at, order_id",
        )
        .bind(strategy_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch order history")?;

        rows.into_iter().map(OrderRow::into_order).collect()
    }

    /// Settleable orders (filled/partial, still open) on a market.
    pub async fn get_open_orders_for_market(&self, market_id: &str) -> Result<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(
            r#"
            SELECT * FROM orders
            WHERE market_id = ? AND outcome = 'OPEN' AND status IN ('FILLED', 'PARTIAL')
            ORDER BY order_placed_at, order_id
            "#,
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OrderRow::into_order).collect()
    }

    /// Order counts for status reporting.
    pub async fn get_order_counts(&self, strategy_id: &str) -> Result<OrderCounts> {
        let (total, open, settled, rejected): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                SUM(CASE WHEN outcome = 'OPEN' AND status IN ('FILLED', 'PARTIAL', 'PENDING') THEN 1 ELSE 0 END),
                SUM(CASE WHEN outcome IN ('WON', 'LOST') THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'REJECTED' THEN 1 ELSE 0 END)
            FROM orders WHERE strategy_id = ?
            "#,
        )
        .bind(strategy_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(OrderCounts {
            total,
            open,
            settled,
            rejected,
        })
    }

    // ==================== Resolutions ====================

    /// Record a resolution delivery (idempotent upsert).
    pub async fn record_resolution(&self, resolution: &MarketResolution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO resolutions (market_id, winning_side, closed, resolved_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(market_id) DO UPDATE SET
                winning_side = excluded.winning_side,
                closed = excluded.closed,
                applied_at = datetime('now')
            "#,
        )
        .bind(&resolution.market_id)
        .bind(resolution.winning_side.map(|s| s.as_str()))
        .bind(resolution.closed)
        .bind(resolution.resolved_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Trader stats ====================

    /// Latest stats snapshot for a trader, if the pipeline has produced one.
    pub async fn get_trader_stats(&self, trader_id: &str) -> Result<Option<TraderStats>> {
        let row: Option<(String, f64, f64, f64, i64, String)> = sqlx::query_as(
            "SELECT trader_id, win_rate, roi, avg_trade_size, sample_count, refreshed_at
             FROM trader_stats WHERE trader_id = ?",
        )
        .bind(trader_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(trader_id, win_rate, roi, avg_trade_size, sample_count, refreshed_at)| {
            Ok(TraderStats {
                trader_id,
                win_rate,
                roi,
                avg_trade_size: dec(avg_trade_size),
                sample_count: sample_count as u32,
                refreshed_at: parse_time(&refreshed_at)?,
            })
        })
        .transpose()
    }

    /// Upsert a trader stats snapshot (stats import path).
    pub async fn save_trader_stats(&self, stats: &TraderStats) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trader_stats (trader_id, win_rate, roi, avg_trade_size, sample_count, refreshed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(trader_id) DO UPDATE SET
                win_rate = excluded.win_rate,
                roi = excluded.roi,
                avg_trade_size = excluded.avg_trade_size,
                sample_count = excluded.sample_count,
                refreshed_at = excluded.refreshed_at
            "#,
        )
        .bind(&stats.trader_id)
        .bind(stats.win_rate)
        .bind(stats.roi)
        .bind(f64_of(stats.avg_trade_size))
        .bind(stats.sample_count as i64)
        .bind(stats.refreshed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
