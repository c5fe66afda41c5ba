//! Historical replay of the live decision pipeline.
//!
//! Feeds recorded signals through the same filter, sizer, and ledger code
//! the live engine runs, with two replay-only twists: trader statistics
//! are rebuilt incrementally so a signal at time T only sees trades
//! resolved before T, and entry prices carry a configurable slippage
//! penalty. Output is fully determined by the input set.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::info;

use crate::engine::config::StrategyConfig;
use crate::engine::filter::{self, Eligibility};
use crate::engine::ledger::{CapitalLedger, DailyLimits};
use crate::engine::settlement::{self, effective_entry_price};
use crate::engine::sizer;
use crate::models::{
    MarketResolution, Order, OrderOutcome, RejectReason, RollingStats, Side, TradeSignal,
};

/// One recorded signal, optionally annotated with how its market
/// eventually resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalSignal {
    #[serde(flatten)]
    pub signal: TradeSignal,

    /// Side that ultimately won, if the market has resolved.
    #[serde(default)]
    pub winning_side: Option<Side>,

    /// When the market resolved.
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Aggregate outcome of replaying one strategy.
#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub strategy_id: String,
    pub signals_processed: usize,
    pub orders_placed: u32,
    pub wins: u32,
    pub losses: u32,
    pub still_open: u32,
    pub rejections: BTreeMap<&'static str, u32>,
    pub starting_capital: Decimal,
    pub final_equity: Decimal,
    pub total_pnl: Decimal,
    pub max_drawdown_pct: f64,
    /// Mean over standard deviation of per-trade returns; `None` below
    /// two settled trades or with zero variance.
    pub sharpe_ratio: Option<f64>,
}

impl StrategyResult {
    pub fn win_rate_pct(&self) -> f64 {
        let settled = self.wins + self.losses;
        if settled == 0 {
            return 0.0;
        }
        self.wins as f64 / settled as f64 * 100.0
    }

    pub fn roi_pct(&self) -> f64 {
        let start = self.starting_capital.to_f64().unwrap_or(0.0);
        if start == 0.0 {
            return 0.0;
        }
        let pnl = self.total_pnl.to_f64().unwrap_or(0.0);
        pnl / start * 100.0
    }
}

impl std::fmt::Display for StrategyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:=^60}", format!(" Backtest: {} ", self.strategy_id))?;
        writeln!(f, "Signals processed:   {}", self.signals_processed)?;
        writeln!(
            f,
            "Orders placed:       {} ({} won / {} lost / {} open)",
            self.orders_placed, self.wins, self.losses, self.still_open
        )?;
        writeln!(f, "Win rate:            {:.1}%", self.win_rate_pct())?;
        writeln!(f, "Starting capital:    ${:.2}", self.starting_capital)?;
        writeln!(f, "Final equity:        ${:.2}", self.final_equity)?;
        writeln!(
            f,
            "Total P&L:           ${:.2} ({:+.1}%)",
            self.total_pnl,
            self.roi_pct()
        )?;
        writeln!(f, "Max drawdown:        {:.1}%", self.max_drawdown_pct)?;
        match self.sharpe_ratio {
            Some(sharpe) => writeln!(f, "Sharpe (per trade):  {:.2}", sharpe)?,
            None => writeln!(f, "Sharpe (per trade):  n/a")?,
        }
        if !self.rejections.is_empty() {
            writeln!(f, "Rejections:")?;
            for (reason, count) in &self.rejections {
                writeln!(f, "  {:<24} {}", reason, count)?;
            }
        }
        write!(f, "{:=^60}", "")
    }
}

/// An observed trade from any trader, awaiting its market's resolution.
struct PendingTrade {
    trader_id: String,
    side: Side,
    stake: Decimal,
    entry_price: Decimal,
}

struct ResolutionEvent {
    market_id: String,
    winner: Side,
    resolved_at: DateTime<Utc>,
}

/// Replays historical signals against strategy configurations.
pub struct BacktestEngine {
    /// Entry price penalty as a fraction, e.g. 0.01 buys 1% worse.
    slippage_pct: Decimal,
}

impl BacktestEngine {
    pub fn new(slippage_pct: Decimal) -> Self {
        Self { slippage_pct }
    }

    /// Replay the signal set against each configuration independently.
    pub fn run(
        &self,
        configs: &[StrategyConfig],
        signals: &[HistoricalSignal],
    ) -> Result<Vec<StrategyResult>> {
        let mut sorted: Vec<&HistoricalSignal> = signals.iter().collect();
        sorted.sort_by(|a, b| {
            a.signal
                .timestamp
                .cmp(&b.signal.timestamp)
                .then_with(|| a.signal.signal_id.cmp(&b.signal.signal_id))
        });

        let events = resolution_events(&sorted);

        let mut results = Vec::with_capacity(configs.len());
        for config in configs {
            config.validate()?;
            info!(strategy = %config.strategy_id, signals = sorted.len(), "Replaying strategy");
            results.push(self.run_strategy(config, &sorted, &events));
        }
        Ok(results)
    }

    fn run_strategy(
        &self,
        config: &StrategyConfig,
        signals: &[&HistoricalSignal],
        events: &[ResolutionEvent],
    ) -> StrategyResult {
        let limits = DailyLimits {
            max_daily_spend: config.max_daily_spend,
            max_daily_loss: config.max_daily_loss,
        };
        let cooldown = Duration::milliseconds((config.cooldown_hours * 3_600_000.0) as i64);

        let mut ledger = CapitalLedger::new(config.starting_capital);
        let mut current_day: Option<NaiveDate> = None;
        let mut trader_stats: HashMap<String, RollingStats> = HashMap::new();
        let mut pending_trades: HashMap<String, Vec<PendingTrade>> = HashMap::new();
        let mut last_resolution: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut open_orders: Vec<Order> = Vec::new();

        let mut orders_placed = 0u32;
        let mut wins = 0u32;
        let mut losses = 0u32;
        let mut rejections: BTreeMap<&'static str, u32> = BTreeMap::new();
        let mut max_drawdown_pct = 0.0f64;
        let mut trade_returns: Vec<f64> = Vec::new();

        let mut next_event = 0usize;
        let mut settle_due = |until: Option<DateTime<Utc>>,
                              ledger: &mut CapitalLedger,
                              current_day: &mut Option<NaiveDate>,
                              trader_stats: &mut HashMap<String, RollingStats>,
                              pending_trades: &mut HashMap<String, Vec<PendingTrade>>,
                              last_resolution: &mut HashMap<String, DateTime<Utc>>,
                              open_orders: &mut Vec<Order>,
                              wins: &mut u32,
                              losses: &mut u32,
                              max_drawdown_pct: &mut f64,
                              trade_returns: &mut Vec<f64>| {
            while next_event < events.len()
                && until.map_or(true, |t| events[next_event].resolved_at <= t)
            {
                let event = &events[next_event];
                next_event += 1;

                // Every trader's trade on this market now resolves and
                // feeds the point-in-time statistics.
                for trade in pending_trades.remove(&event.market_id).unwrap_or_default() {
                    let won = trade.side == event.winner;
                    let pnl = settlement::unit_pnl(trade.stake, trade.entry_price, won);
                    trader_stats
                        .entry(trade.trader_id)
                        .or_default()
                        .record_resolution(trade.stake, pnl, won);
                }

                let resolution = MarketResolution {
                    market_id: event.market_id.clone(),
                    winning_side: Some(event.winner),
                    closed: true,
                    resolved_at: event.resolved_at,
                };
                roll_day(ledger, current_day, event.resolved_at);
                for settled in settlement::apply(&resolution, open_orders) {
                    ledger.settle(settled.committed, settled.pnl);
                    if settled.outcome == OrderOutcome::Won {
                        *wins += 1;
                    } else {
                        *losses += 1;
                    }
                    if settled.committed > Decimal::ZERO {
                        trade_returns.push(
                            (settled.pnl / settled.committed).to_f64().unwrap_or(0.0),
                        );
                    }
                    *max_drawdown_pct = max_drawdown_pct.max(ledger.current_drawdown_pct);
                }
                open_orders.retain(|o| o.outcome == OrderOutcome::Open);

                last_resolution.insert(event.market_id.clone(), event.resolved_at);
            }
        };

        for hist in signals {
            let signal = &hist.signal;

            settle_due(
                Some(signal.timestamp),
                &mut ledger,
                &mut current_day,
                &mut trader_stats,
                &mut pending_trades,
                &mut last_resolution,
                &mut open_orders,
                &mut wins,
                &mut losses,
                &mut max_drawdown_pct,
                &mut trade_returns,
            );

            roll_day(&mut ledger, &mut current_day, signal.timestamp);

            let snapshot = trader_stats
                .get(&signal.trader_id)
                .and_then(|s| s.snapshot(&signal.trader_id));

            // A market resolves exactly once, so a position opened after
            // its resolution event could never settle and would pin
            // capital for the rest of the run. Inside the cooldown
            // window the rejection keeps the cooldown label; after it
            // the market is simply dead.
            let post_resolution = last_resolution.get(&signal.market_id);

            let decision = if let Some(resolved) = post_resolution {
                if config.cooldown_hours > 0.0 && signal.timestamp < *resolved + cooldown {
                    Err(RejectReason::Cooldown)
                } else {
                    Err(RejectReason::MarketResolved)
                }
            } else {
                match filter::evaluate(signal, config, snapshot.as_ref()) {
                    Eligibility::Ineligible(reason) => Err(reason),
                    Eligibility::Eligible => {
                        let stats = snapshot.as_ref().ok_or(RejectReason::MissingTraderStats);
                        stats
                            .and_then(|s| {
                                sizer::compute_stake(signal, config, s, ledger.available_cash)
                            })
                            .and_then(|stake| ledger.reserve(stake, &limits).map(|()| stake))
                    }
                }
            };

            match decision {
                Ok(stake) => {
                    let entry = effective_entry_price(signal.price, self.slippage_pct);
                    let mut order = Order::pending(&config.strategy_id, signal, stake);
                    if order.record_fill(stake, entry).is_some() {
                        open_orders.push(order);
                        orders_placed += 1;
                    }
                }
                Err(reason) => {
                    *rejections.entry(reason.as_code()).or_insert(0) += 1;
                }
            }

            // The observation itself lands after the decision: a trader's
            // signal never influences its own evaluation.
            trader_stats
                .entry(signal.trader_id.clone())
                .or_default()
                .record_trade(signal.size);
            pending_trades
                .entry(signal.market_id.clone())
                .or_default()
                .push(PendingTrade {
                    trader_id: signal.trader_id.clone(),
                    side: signal.outcome_side,
                    stake: signal.size,
                    entry_price: signal.price,
                });
        }

        // Flush resolutions dated after the last signal.
        settle_due(
            None,
            &mut ledger,
            &mut current_day,
            &mut trader_stats,
            &mut pending_trades,
            &mut last_resolution,
            &mut open_orders,
            &mut wins,
            &mut losses,
            &mut max_drawdown_pct,
            &mut trade_returns,
        );

        let sharpe_ratio = if trade_returns.len() >= 2 {
            let mean = (&trade_returns).mean();
            let std_dev = (&trade_returns).std_dev();
            (std_dev > 0.0).then(|| mean / std_dev)
        } else {
            None
        };

        StrategyResult {
            strategy_id: config.strategy_id.clone(),
            signals_processed: signals.len(),
            orders_placed,
            wins,
            losses,
            still_open: open_orders.len() as u32,
            rejections,
            starting_capital: config.starting_capital,
            final_equity: ledger.equity(),
            total_pnl: ledger.realized_pnl,
            max_drawdown_pct,
            sharpe_ratio,
        }
    }
}

fn roll_day(ledger: &mut CapitalLedger, current: &mut Option<NaiveDate>, at: DateTime<Utc>) {
    let day = at.date_naive();
    match current {
        Some(d) if *d < day => {
            ledger.reset_daily();
            *current = Some(day);
        }
        None => *current = Some(day),
        _ => {}
    }
}

/// Collapse per-signal resolution annotations into one event per market,
/// ordered by resolution time.
fn resolution_events(signals: &[&HistoricalSignal]) -> Vec<ResolutionEvent> {
    let mut by_market: HashMap<&str, ResolutionEvent> = HashMap::new();
    for hist in signals {
        if let (Some(winner), Some(resolved_at)) = (hist.winning_side, hist.resolved_at) {
            by_market
                .entry(&hist.signal.market_id)
                .or_insert_with(|| ResolutionEvent {
                    market_id: hist.signal.market_id.clone(),
                    winner,
                    resolved_at,
                });
        }
    }

    let mut events: Vec<ResolutionEvent> = by_market.into_values().collect();
    events.sort_by(|a, b| {
        a.resolved_at
            .cmp(&b.resolved_at)
            .then_with(|| a.market_id.cmp(&b.market_id))
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, min, 0).unwrap()
    }

    fn hist(
        id: &str,
        trader: &str,
        market: &str,
        price: Decimal,
        ts: DateTime<Utc>,
        winner: Option<Side>,
        resolved: Option<DateTime<Utc>>,
    ) -> HistoricalSignal {
        HistoricalSignal {
            signal: TradeSignal {
                signal_id: id.to_string(),
                trader_id: trader.to_string(),
                market_id: market.to_string(),
                outcome_side: Side::Yes,
                price,
                size: dec!(100),
                category: None,
                model_probability: None,
                timestamp: ts,
            },
            winning_side: winner,
            resolved_at: resolved,
        }
    }

    /// A trader whose first `n` markets resolve as wins, establishing
    /// point-in-time stats before the signal under test.
    fn warmup(n: usize, last_resolved: DateTime<Utc>) -> Vec<HistoricalSignal> {
        (0..n)
            .map(|i| {
                hist(
                    &format!("warm-{i:03}"),
                    "0xwhale",
                    &format!("0xwarm-{i:03}"),
                    dec!(0.40),
                    at(0, i as u32 % 60),
                    Some(Side::Yes),
                    Some(last_resolved),
                )
            })
            .collect()
    }

    fn permissive_config() -> StrategyConfig {
        StrategyConfig {
            strategy_id: "bt".to_string(),
            min_trader_sample_count: 30,
            min_edge: 0.05,
            ..StrategyConfig::default()
        }
    }

    #[test]
    fn test_stats_build_point_in_time() {
        let engine = BacktestEngine::new(Decimal::ZERO);
        let config = permissive_config();

        let mut signals = warmup(40, at(1, 0));
        // Before any resolution: no stats, rejected fail-closed.
        signals.push(hist(
            "early",
            "0xwhale",
            "0xtarget-a",
            dec!(0.40),
            at(0, 59),
            None,
            None,
        ));
        // After 40 resolved wins: eligible.
        signals.push(hist(
            "late",
            "0xwhale",
            "0xtarget-b",
            dec!(0.40),
            at(2, 0),
            None,
            None,
        ));

        let results = engine.run(&[config], &signals).unwrap();
        let result = &results[0];
        assert_eq!(result.orders_placed, 1);
        assert_eq!(
            result.rejections.get(RejectReason::MissingTraderStats.as_code()),
            Some(&41)
        );
    }

    #[test]
    fn test_deterministic_output() {
        let engine = BacktestEngine::new(dec!(0.01));
        let config = permissive_config();

        let mut signals = warmup(35, at(1, 0));
        signals.push(hist(
            "live-1",
            "0xwhale",
            "0xtarget",
            dec!(0.40),
            at(2, 0),
            Some(Side::Yes),
            Some(at(3, 0)),
        ));

        let a = engine.run(std::slice::from_ref(&config), &signals).unwrap();
        let b = engine.run(std::slice::from_ref(&config), &signals).unwrap();
        assert_eq!(format!("{}", a[0]), format!("{}", b[0]));
        assert_eq!(a[0].final_equity, b[0].final_equity);
    }

    #[test]
    fn test_cooldown_blocks_reentry() {
        let engine = BacktestEngine::new(Decimal::ZERO);
        let config = StrategyConfig {
            cooldown_hours: 0.5,
            ..permissive_config()
        };

        let mut signals = warmup(35, at(1, 0));
        // Market resolves at 02:00; next signals land 10 and 50 minutes later.
        signals.push(hist(
            "first",
            "0xwhale",
            "0xhot",
            dec!(0.40),
            at(1, 30),
            Some(Side::Yes),
            Some(at(2, 0)),
        ));
        signals.push(hist(
            "too-soon",
            "0xwhale",
            "0xhot",
            dec!(0.40),
            at(2, 10),
            None,
            None,
        ));
        signals.push(hist(
            "after-window",
            "0xwhale",
            "0xhot",
            dec!(0.40),
            at(2, 50),
            None,
            None,
        ));

        let results = engine.run(std::slice::from_ref(&config), &signals).unwrap();
        assert_eq!(
            results[0].rejections.get(RejectReason::Cooldown.as_code()),
            Some(&1)
        );
        // Past the window the market is still resolved, so the later
        // signal is refused under the dead-market label instead.
        assert_eq!(
            results[0].rejections.get(RejectReason::MarketResolved.as_code()),
            Some(&1)
        );
        assert_eq!(results[0].orders_placed, 1);
    }

    #[test]
    fn test_resolved_markets_refuse_new_entries() {
        let engine = BacktestEngine::new(Decimal::ZERO);
        let config = permissive_config();

        let mut signals = warmup(35, at(1, 0));
        signals.push(hist(
            "winner",
            "0xwhale",
            "0xdone",
            dec!(0.40),
            at(1, 30),
            Some(Side::Yes),
            Some(at(2, 0)),
        ));
        // Arrives well after 0xdone resolved; accepting it would lock
        // capital that can never settle.
        signals.push(hist(
            "too-late",
            "0xwhale",
            "0xdone",
            dec!(0.40),
            at(5, 0),
            None,
            None,
        ));

        let results = engine.run(std::slice::from_ref(&config), &signals).unwrap();
        assert_eq!(results[0].orders_placed, 1);
        assert_eq!(results[0].still_open, 0);
        assert_eq!(
            results[0].rejections.get(RejectReason::MarketResolved.as_code()),
            Some(&1)
        );
        // Every placed dollar either settled or was never reserved.
        assert_eq!(results[0].final_equity, dec!(1000) + results[0].total_pnl);
    }

    #[test]
    fn test_slippage_worsens_entry() {
        let config = permissive_config();
        let mut signals = warmup(35, at(1, 0));
        signals.push(hist(
            "live",
            "0xwhale",
            "0xtarget",
            dec!(0.40),
            at(2, 0),
            Some(Side::Yes),
            Some(at(3, 0)),
        ));

        let clean = BacktestEngine::new(Decimal::ZERO)
            .run(std::slice::from_ref(&config), &signals)
            .unwrap();
        let slipped = BacktestEngine::new(dec!(0.05))
            .run(std::slice::from_ref(&config), &signals)
            .unwrap();

        // Same winning trade, worse fill, smaller payout.
        assert_eq!(clean[0].wins, 1);
        assert_eq!(slipped[0].wins, 1);
        assert!(slipped[0].total_pnl < clean[0].total_pnl);
    }

    #[test]
    fn test_losses_cap_at_stake() {
        let engine = BacktestEngine::new(Decimal::ZERO);
        let config = permissive_config();

        let mut signals = warmup(35, at(1, 0));
        signals.push(hist(
            "loser",
            "0xwhale",
            "0xtarget",
            dec!(0.40),
            at(2, 0),
            Some(Side::No),
            Some(at(3, 0)),
        ));

        let results = engine.run(std::slice::from_ref(&config), &signals).unwrap();
        assert_eq!(results[0].losses, 1);
        // Fixed sizing stakes 50; the loss is exactly the stake.
        assert_eq!(results[0].total_pnl, dec!(-50));
        assert_eq!(results[0].final_equity, dec!(950));
    }
}
