//! Trader statistics: the read-only snapshot consumed at decision time,
//! plus the incremental point-in-time builder the backtest uses.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Rolling performance snapshot for a single trader.
///
/// Computed externally (stats pipeline) for the live path; the engine only
/// reads the latest snapshot available when a signal arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderStats {
    pub trader_id: String,

    /// Win rate over resolved trades (0.0 to 1.0)
    pub win_rate: f64,

    /// Return on investment over resolved trades (e.g. 0.12 = +12%)
    pub roi: f64,

    /// Rolling average stake in USD
    pub avg_trade_size: Decimal,

    /// Number of resolved trades backing these numbers
    pub sample_count: u32,

    #[serde(default = "Utc::now")]
    pub refreshed_at: DateTime<Utc>,
}

/// Incremental trader statistics accumulator.
///
/// The backtest feeds it one resolved trade at a time, in resolution
/// order, so every snapshot it produces is point-in-time: a signal at
/// time T only ever sees trades that had resolved before T.
#[derive(Debug, Clone, Default)]
pub struct RollingStats {
    resolved: u32,
    wins: u32,
    total_staked: Decimal,
    total_pnl: Decimal,
    trade_count: u32,
    total_size: Decimal,
}

impl RollingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a trade observation (resolved or not) for average-size tracking.
    pub fn record_trade(&mut self, size: Decimal) {
        self.trade_count += 1;
        self.total_size += size;
    }

    /// Record a resolved trade.
    pub fn record_resolution(&mut self, stake: Decimal, pnl: Decimal, won: bool) {
        self.resolved += 1;
        if won {
            self.wins += 1;
        }
        self.total_staked += stake;
        self.total_pnl += pnl;
    }

    /// Current snapshot, or `None` if no trades have resolved yet.
    ///
    /// Returning `None` (rather than zeros) keeps the filter's fail-closed
    /// handling of missing statistics honest.
    pub fn snapshot(&self, trader_id: &str) -> Option<TraderStats> {
        if self.resolved == 0 {
            return None;
        }

        let roi = if self.total_staked > Decimal::ZERO {
            (self.total_pnl / self.total_staked).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        let avg_trade_size = if self.trade_count > 0 {
            self.total_size / Decimal::from(self.trade_count)
        } else {
            Decimal::ZERO
        };

        Some(TraderStats {
            trader_id: trader_id.to_string(),
            win_rate: self.wins as f64 / self.resolved as f64,
            roi,
            avg_trade_size,
            sample_count: self.resolved,
            refreshed_at: Utc::now(),
        })
    }
}
