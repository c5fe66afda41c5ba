//! Signal-to-order orchestration.
//!
//! One [`ExecutionEngine`] owns every loaded strategy. Signals fan out to
//! all active strategies concurrently; each strategy's ledger sits behind
//! its own async mutex, so reserve/release/settle for one strategy are
//! strictly serialized while independent strategies proceed in parallel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use futures::future;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::models::{MarketResolution, Order, TradeSignal, TraderStats};

use super::config::StrategyConfig;
use super::filter::{self, Eligibility};
use super::ledger::{CapitalLedger, DailyLimits};
use super::reconcile::{self, LedgerDrift};
use super::settlement::{self, Settlement};
use super::sizer;

/// Mutable per-strategy state: the ledger plus the day its daily
/// counters belong to.
struct StrategyAccount {
    ledger: CapitalLedger,
    current_day: NaiveDate,
}

impl StrategyAccount {
    /// Reset daily counters when an event lands on a later day.
    fn roll_day(&mut self, at: DateTime<Utc>) {
        let day = at.date_naive();
        if day > self.current_day {
            self.ledger.reset_daily();
            self.current_day = day;
        }
    }
}

struct StrategyHandle {
    config: StrategyConfig,
    account: Arc<Mutex<StrategyAccount>>,
}

/// Orchestrates signal intake, order lifecycle, and settlement across
/// all loaded strategies.
pub struct ExecutionEngine {
    db: Arc<Database>,
    strategies: HashMap<String, StrategyHandle>,
    /// In-memory front of the durable seen-signals set.
    seen_signals: StdMutex<HashSet<String>>,
}

impl ExecutionEngine {
    /// Load all persisted strategies and their ledgers.
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        let mut strategies = HashMap::new();

        for config in db.get_strategies().await? {
            let ledger = match db.get_ledger(&config.strategy_id).await? {
                Some(ledger) => ledger,
                None => {
                    let ledger = CapitalLedger::new(config.starting_capital);
                    db.save_ledger(&config.strategy_id, &ledger).await?;
                    ledger
                }
            };

            info!(
                strategy = %config.strategy_id,
                cash = %ledger.available_cash,
                locked = %ledger.locked_capital,
                "Loaded strategy"
            );

            strategies.insert(
                config.strategy_id.clone(),
                StrategyHandle {
                    config,
                    account: Arc::new(Mutex::new(StrategyAccount {
                        ledger,
                        current_day: Utc::now().date_naive(),
                    })),
                },
            );
        }

        Ok(Self {
            db,
            strategies,
            seen_signals: StdMutex::new(HashSet::new()),
        })
    }

    /// Register a new strategy (or replace an existing config) and
    /// initialize its ledger if it has none.
    pub async fn add_strategy(&mut self, config: StrategyConfig) -> Result<()> {
        config.validate()?;
        self.db.save_strategy(&config).await?;

        let ledger = match self.db.get_ledger(&config.strategy_id).await? {
            Some(ledger) => ledger,
            None => {
                let ledger = CapitalLedger::new(config.starting_capital);
                self.db.save_ledger(&config.strategy_id, &ledger).await?;
                ledger
            }
        };

        info!(strategy = %config.strategy_id, "Registered strategy");

        self.strategies.insert(
            config.strategy_id.clone(),
            StrategyHandle {
                config,
                account: Arc::new(Mutex::new(StrategyAccount {
                    ledger,
                    current_day: Utc::now().date_naive(),
                })),
            },
        );

        Ok(())
    }

    /// Pause or resume a strategy. Paused strategies keep their open
    /// positions and still settle; they just stop taking new signals.
    pub async fn set_paused(&mut self, strategy_id: &str, paused: bool) -> Result<bool> {
        let found = self.db.set_strategy_paused(strategy_id, paused).await?;
        if let Some(handle) = self.strategies.get_mut(strategy_id) {
            handle.config.is_paused = paused;
        }
        Ok(found)
    }

    pub fn strategy_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.strategies.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot a strategy's ledger for reporting.
    pub async fn ledger_snapshot(&self, strategy_id: &str) -> Option<CapitalLedger> {
        let handle = self.strategies.get(strategy_id)?;
        Some(handle.account.lock().await.ledger.clone())
    }

    /// Evaluate one signal against every active strategy.
    ///
    /// Returns every order produced, including rejected audit rows.
    /// Duplicate signal ids are dropped before any strategy sees them.
    pub async fn process_signal(&self, signal: &TradeSignal) -> Result<Vec<Order>> {
        if self.seen_signals.lock().unwrap().contains(&signal.signal_id) {
            debug!(signal = %signal.signal_id, "Duplicate signal (memory)");
            return Ok(Vec::new());
        }
        // The durable insert is the atomic claim: of any number of
        // concurrent deliveries of one signal id, exactly one reaches the
        // strategies. No capital moves before the claim.
        let claimed = self
            .db
            .mark_signal_seen(&signal.signal_id, &signal.trader_id, &signal.market_id)
            .await?;
        self.seen_signals
            .lock()
            .unwrap()
            .insert(signal.signal_id.clone());
        if !claimed {
            debug!(signal = %signal.signal_id, "Duplicate signal (durable)");
            return Ok(Vec::new());
        }

        let stats = self.db.get_trader_stats(&signal.trader_id).await?;

        let tasks = self
            .strategies
            .values()
            .filter(|handle| handle.config.accepts_signals())
            .map(|handle| self.process_for_strategy(handle, signal, stats.as_ref()));

        let mut orders = Vec::new();
        for result in future::join_all(tasks).await {
            orders.push(result?);
        }
        Ok(orders)
    }

    async fn process_for_strategy(
        &self,
        handle: &StrategyHandle,
        signal: &TradeSignal,
        stats: Option<&TraderStats>,
    ) -> Result<Order> {
        let config = &handle.config;

        let order = match (filter::evaluate(signal, config, stats), stats) {
            (Eligibility::Ineligible(reason), _) => {
                Order::rejected(&config.strategy_id, signal, reason)
            }
            (Eligibility::Eligible, None) => {
                // evaluate() fails closed on missing stats, so this arm
                // is unreachable; keep the audit row consistent anyway.
                Order::rejected(
                    &config.strategy_id,
                    signal,
                    crate::models::RejectReason::MissingTraderStats,
                )
            }
            (Eligibility::Eligible, Some(stats)) => {
                let limits = DailyLimits {
                    max_daily_spend: config.max_daily_spend,
                    max_daily_loss: config.max_daily_loss,
                };

                let mut account = handle.account.lock().await;
                account.roll_day(signal.timestamp);

                match sizer::compute_stake(signal, config, stats, account.ledger.available_cash)
                    .and_then(|stake| account.ledger.reserve(stake, &limits).map(|()| stake))
                {
                    Err(reason) => Order::rejected(&config.strategy_id, signal, reason),
                    Ok(stake) => {
                        let order = Order::pending(&config.strategy_id, signal, stake);
                        self.db.save_ledger(&config.strategy_id, &account.ledger).await?;
                        info!(
                            strategy = %config.strategy_id,
                            order = %order.order_id,
                            stake = %stake,
                            market = %signal.market_id,
                            "Order placed"
                        );
                        order
                    }
                }
            }
        };

        self.db.save_order(&order).await?;
        Ok(order)
    }

    /// Record a (possibly partial) fill and release the unfilled
    /// remainder back to cash.
    pub async fn record_fill(
        &self,
        order_id: &str,
        executed_size: Decimal,
        executed_price: Decimal,
    ) -> Result<Order> {
        let mut order = self
            .db
            .get_order(order_id)
            .await?
            .ok_or_else(|| anyhow!("Unknown order: {order_id}"))?;
        let handle = self
            .strategies
            .get(&order.strategy_id)
            .ok_or_else(|| anyhow!("Unknown strategy: {}", order.strategy_id))?;

        let mut account = handle.account.lock().await;
        let remainder = order.record_fill(executed_size, executed_price).ok_or_else(|| {
            anyhow!(
                "Cannot fill order {} in status {}",
                order.order_id,
                order.status.as_str()
            )
        })?;
        if remainder > Decimal::ZERO {
            account.ledger.release(remainder);
        }

        self.db.save_order(&order).await?;
        self.db.save_ledger(&order.strategy_id, &account.ledger).await?;

        info!(
            order = %order.order_id,
            executed = %order.executed_size_usd,
            released = %remainder,
            status = order.status.as_str(),
            "Fill recorded"
        );

        Ok(order)
    }

    /// Cancel an unresolved order and release its committed capital.
    pub async fn cancel_order(&self, order_id: &str) -> Result<Order> {
        let mut order = self
            .db
            .get_order(order_id)
            .await?
            .ok_or_else(|| anyhow!("Unknown order: {order_id}"))?;
        let handle = self
            .strategies
            .get(&order.strategy_id)
            .ok_or_else(|| anyhow!("Unknown strategy: {}", order.strategy_id))?;

        let mut account = handle.account.lock().await;
        let released = order.cancel().ok_or_else(|| {
            anyhow!(
                "Cannot cancel order {} in status {}",
                order.order_id,
                order.status.as_str()
            )
        })?;
        if released > Decimal::ZERO {
            account.ledger.release(released);
        }

        self.db.save_order(&order).await?;
        self.db.save_ledger(&order.strategy_id, &account.ledger).await?;

        info!(order = %order.order_id, released = %released, "Order cancelled");

        Ok(order)
    }

    /// Settle every open position on a resolved market.
    ///
    /// Settlement funnels through the same per-strategy locks as signal
    /// processing, so a resolution never races a reserve. Redelivered
    /// resolutions are no-ops: already-settled orders fail the open
    /// guard and produce no settlement.
    pub async fn apply_resolution(
        &self,
        resolution: &MarketResolution,
    ) -> Result<Vec<Settlement>> {
        self.db.record_resolution(resolution).await?;

        if resolution.winner().is_none() {
            warn!(
                market = %resolution.market_id,
                "Resolution without a definite winner; positions stay open"
            );
            return Ok(Vec::new());
        }

        let open = self
            .db
            .get_open_orders_for_market(&resolution.market_id)
            .await?;

        let mut by_strategy: HashMap<String, Vec<Order>> = HashMap::new();
        for order in open {
            by_strategy
                .entry(order.strategy_id.clone())
                .or_default()
                .push(order);
        }

        let mut settlements = Vec::new();
        for (strategy_id, mut orders) in by_strategy {
            let Some(handle) = self.strategies.get(&strategy_id) else {
                warn!(strategy = %strategy_id, "Open orders for unloaded strategy");
                continue;
            };

            let mut account = handle.account.lock().await;
            account.roll_day(resolution.resolved_at);

            let applied = settlement::apply(resolution, &mut orders);
            for settlement in &applied {
                account.ledger.settle(settlement.committed, settlement.pnl);
            }

            for order in &orders {
                self.db.save_order(order).await?;
            }
            self.db.save_ledger(&strategy_id, &account.ledger).await?;

            info!(
                strategy = %strategy_id,
                market = %resolution.market_id,
                settled = applied.len(),
                cash = %account.ledger.available_cash,
                "Settled positions"
            );
            settlements.extend(applied);
        }

        Ok(settlements)
    }

    /// Recompute a strategy's ledger from its full order history and
    /// compare it with the live one. With `apply`, a drifted ledger is
    /// overwritten by the recomputed one.
    pub async fn reconcile(&self, strategy_id: &str, apply: bool) -> Result<Option<LedgerDrift>> {
        let handle = self
            .strategies
            .get(strategy_id)
            .ok_or_else(|| anyhow!("Unknown strategy: {strategy_id}"))?;

        // Hold the account lock for the whole read-recompute-compare
        // window so no reserve or settle lands mid-reconcile.
        let mut account = handle.account.lock().await;

        let history = self.db.get_orders_for_strategy(strategy_id).await?;
        let recomputed = reconcile::recompute(handle.config.starting_capital, &history);

        let drift = reconcile::check_drift(
            strategy_id,
            &account.ledger,
            &recomputed,
            reconcile::DEFAULT_TOLERANCE,
        );

        match &drift {
            None => {
                info!(strategy = %strategy_id, orders = history.len(), "Ledger reconciled clean");
            }
            Some(d) => {
                warn!(strategy = %strategy_id, "{d}");
                if apply {
                    account.ledger = recomputed;
                    self.db.save_ledger(strategy_id, &account.ledger).await?;
                    info!(strategy = %strategy_id, "Ledger rebuilt from order history");
                }
            }
        }

        Ok(drift)
    }
}
