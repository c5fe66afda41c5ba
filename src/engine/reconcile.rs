//! Reconciliation: rebuild a strategy's ledger from its full order
//! history and detect drift against the stored ledger.
//!
//! The fold is pure, deterministic, and idempotent; running it twice on
//! the same history yields identical output. It is the authoritative
//! repair path after incidents: restore correct order rows first, then
//! recompute.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{Order, OrderOutcome, OrderStatus};

use super::ledger::CapitalLedger;
use super::settlement::unit_pnl;

enum Event {
    Reserve(Decimal),
    Release(Decimal),
    Settle { committed: Decimal, pnl: Decimal },
}

/// Recompute a ledger by replaying Reserve/Settle/Cancel semantics over
/// the complete order history, in event-time order.
pub fn recompute(starting_capital: Decimal, orders: &[Order]) -> CapitalLedger {
    let mut events: Vec<(DateTime<Utc>, String, Event)> = Vec::new();

    for order in orders {
        match order.status {
            // Never reserved, or reserved and fully released: net zero.
            OrderStatus::Rejected | OrderStatus::Cancelled => {}
            OrderStatus::Pending => {
                events.push((
                    order.order_placed_at,
                    order.order_id.clone(),
                    Event::Reserve(order.signal_size_usd),
                ));
            }
            OrderStatus::Filled | OrderStatus::Partial => {
                events.push((
                    order.order_placed_at,
                    order.order_id.clone(),
                    Event::Reserve(order.signal_size_usd),
                ));
                let remainder = order.signal_size_usd - order.executed_size_usd;
                if remainder > Decimal::ZERO {
                    events.push((
                        order.order_placed_at,
                        order.order_id.clone(),
                        Event::Release(remainder),
                    ));
                }
                if order.outcome != OrderOutcome::Open {
                    let won = order.outcome == OrderOutcome::Won;
                    let committed = order.executed_size_usd;
                    let pnl = unit_pnl(committed, order.executed_price, won);
                    let at = order.resolved_at.unwrap_or(order.order_placed_at);
                    events.push((at, order.order_id.clone(), Event::Settle { committed, pnl }));
                }
            }
        }
    }

    // Event-time order, order_id as a deterministic tie-break.
    events.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

    let mut ledger = CapitalLedger::new(starting_capital);
    let mut current_day: Option<NaiveDate> = None;

    for (at, _, event) in events {
        let day = at.date_naive();
        if current_day != Some(day) {
            current_day = Some(day);
            ledger.reset_daily();
        }

        match event {
            Event::Reserve(amount) => {
                // History is authoritative; replay without gating.
                ledger.available_cash -= amount;
                ledger.locked_capital += amount;
                ledger.daily_spent += amount;
            }
            Event::Release(amount) => ledger.release(amount),
            Event::Settle { committed, pnl } => ledger.settle(committed, pnl),
        }
    }

    ledger
}

/// Field-level disagreement between the stored ledger and a recompute.
#[derive(Debug, Clone)]
pub struct LedgerDrift {
    pub strategy_id: String,
    pub available_cash_delta: Decimal,
    pub locked_capital_delta: Decimal,
    pub realized_pnl_delta: Decimal,
}

impl std::fmt::Display for LedgerDrift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ledger drift for {}: cash {:+}, locked {:+}, realized_pnl {:+}",
            self.strategy_id,
            self.available_cash_delta,
            self.locked_capital_delta,
            self.realized_pnl_delta
        )
    }
}

/// Cent-level default tolerance, absorbing the f64 persistence boundary.
pub const DEFAULT_TOLERANCE: Decimal = dec!(0.01);

/// Compare a stored ledger against a recomputed one.
///
/// Returns `None` when every monetary field agrees within `tolerance`.
/// The live path only reports drift; overwriting is reserved for the
/// deliberate recovery flow.
pub fn check_drift(
    strategy_id: &str,
    stored: &CapitalLedger,
    recomputed: &CapitalLedger,
    tolerance: Decimal,
) -> Option<LedgerDrift> {
    let drift = LedgerDrift {
        strategy_id: strategy_id.to_string(),
        available_cash_delta: recomputed.available_cash - stored.available_cash,
        locked_capital_delta: recomputed.locked_capital - stored.locked_capital,
        realized_pnl_delta: recomputed.realized_pnl - stored.realized_pnl,
    };

    let within = drift.available_cash_delta.abs() <= tolerance
        && drift.locked_capital_delta.abs() <= tolerance
        && drift.realized_pnl_delta.abs() <= tolerance;

    if within {
        None
    } else {
        Some(drift)
    }
}
