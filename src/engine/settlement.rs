//! Settlement engine: applies market resolutions to open orders.
//!
//! Unit P&L model per dollar committed, price in (0, 1):
//! WON  -> pnl =  stake * (1/price - 1)
//! LOST -> pnl = -stake

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

use crate::models::{MarketResolution, Order, OrderOutcome};

/// One settled order: what the ledger needs to book.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub order_id: String,
    pub strategy_id: String,
    pub committed: Decimal,
    pub pnl: Decimal,
    pub outcome: OrderOutcome,
}

/// Unit P&L for a resolved stake.
pub fn unit_pnl(stake: Decimal, entry_price: Decimal, won: bool) -> Decimal {
    if !won {
        return -stake;
    }
    if entry_price <= Decimal::ZERO || entry_price >= Decimal::ONE {
        return Decimal::ZERO;
    }
    stake * (Decimal::ONE / entry_price - Decimal::ONE)
}

/// Entry price inflated by a fixed slippage rate, for conservative
/// simulated fills. Capped at 99c so the payout formula stays sane.
pub fn effective_entry_price(price: Decimal, slippage: Decimal) -> Decimal {
    (price * (Decimal::ONE + slippage)).min(dec!(0.99))
}

/// Apply a resolution to a batch of orders, mutating the settleable ones.
///
/// Ambiguous resolutions (not closed, or no determinable winner) settle
/// nothing: affected orders stay OPEN until the next delivery. Re-applying
/// a resolution is a no-op thanks to the order-level outcome guard.
pub fn apply(resolution: &MarketResolution, orders: &mut [Order]) -> Vec<Settlement> {
    let Some(winning_side) = resolution.winner() else {
        warn!(
            market = %resolution.market_id,
            closed = resolution.closed,
            "Ambiguous resolution, leaving orders open"
        );
        return Vec::new();
    };

    let mut settlements = Vec::new();

    for order in orders.iter_mut() {
        if order.market_id != resolution.market_id {
            continue;
        }

        let won = order.outcome_side == winning_side;
        let committed = order.committed_amount();
        let pnl = unit_pnl(committed, order.executed_price, won);

        if order.settle(won, pnl, resolution.resolved_at) {
            debug!(
                order = %order.order_id,
                strategy = %order.strategy_id,
                outcome = order.outcome.as_str(),
                pnl = %pnl,
                "Order settled"
            );
            settlements.push(Settlement {
                order_id: order.order_id.clone(),
                strategy_id: order.strategy_id.clone(),
                committed,
                pnl,
                outcome: order.outcome,
            });
        }
    }

    settlements
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use crate::models::{Side, TradeSignal};

    fn signal(market: &str, side: Side) -> TradeSignal {
        TradeSignal {
            signal_id: format!("sig-{market}"),
            trader_id: "0xabc".to_string(),
            market_id: market.to_string(),
            outcome_side: side,
            price: dec!(0.40),
            size: dec!(100),
            category: None,
            model_probability: None,
            timestamp: Utc::now(),
        }
    }

    fn filled_order(market: &str, side: Side, stake: Decimal, price: Decimal) -> Order {
        let mut order = Order::pending("s1", &signal(market, side), stake);
        order.record_fill(stake, price).unwrap();
        order
    }

    fn resolution(market: &str, winner: Option<Side>) -> MarketResolution {
        MarketResolution {
            market_id: market.to_string(),
            winning_side: winner,
            closed: true,
            resolved_at: Utc::now(),
        }
    }

    #[test]
    fn test_won_pnl() {
        // stake 100 at 0.40: pnl = 100 * (2.5 - 1) = 150
        assert_eq!(unit_pnl(dec!(100), dec!(0.40), true), dec!(150));
    }

    #[test]
    fn test_lost_pnl() {
        assert_eq!(unit_pnl(dec!(100), dec!(0.40), false), dec!(-100));
    }

    #[test]
    fn test_slippage_adjusted_price() {
        assert_eq!(effective_entry_price(dec!(0.40), dec!(0.04)), dec!(0.416));
        // Cap near 1.0
        assert_eq!(effective_entry_price(dec!(0.98), dec!(0.04)), dec!(0.99));
    }

    #[test]
    fn test_apply_settles_matching_sides() {
        let mut orders = vec![
            filled_order("m1", Side::Yes, dec!(100), dec!(0.40)),
            filled_order("m1", Side::No, dec!(50), dec!(0.60)),
            filled_order("m2", Side::Yes, dec!(75), dec!(0.50)),
        ];

        let settlements = apply(&resolution("m1", Some(Side::Yes)), &mut orders);
        assert_eq!(settlements.len(), 2);

        assert_eq!(settlements[0].outcome, OrderOutcome::Won);
        assert_eq!(settlements[0].pnl, dec!(150));
        assert_eq!(settlements[1].outcome, OrderOutcome::Lost);
        assert_eq!(settlements[1].pnl, dec!(-50));

        // Other market untouched
        assert_eq!(orders[2].outcome, OrderOutcome::Open);
    }

    #[test]
    fn test_reapply_is_noop() {
        let mut orders = vec![filled_order("m1", Side::Yes, dec!(100), dec!(0.40))];

        let first = apply(&resolution("m1", Some(Side::Yes)), &mut orders);
        assert_eq!(first.len(), 1);

        let second = apply(&resolution("m1", Some(Side::Yes)), &mut orders);
        assert!(second.is_empty());
        assert_eq!(orders[0].pnl_usd, Some(dec!(150)));
    }

    #[test]
    fn test_ambiguous_resolution_leaves_open() {
        let mut orders = vec![filled_order("m1", Side::Yes, dec!(100), dec!(0.40))];

        assert!(apply(&resolution("m1", None), &mut orders).is_empty());
        assert_eq!(orders[0].outcome, OrderOutcome::Open);

        // Retry with a winner settles it
        let retried = apply(&resolution("m1", Some(Side::No)), &mut orders);
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].pnl, dec!(-100));
    }

    #[test]
    fn test_partial_fill_settles_executed_portion_only() {
        let mut order = Order::pending("s1", &signal("m1", Side::Yes), dec!(100));
        order.record_fill(dec!(40), dec!(0.40)).unwrap();
        let mut orders = vec![order];

        let settlements = apply(&resolution("m1", Some(Side::Yes)), &mut orders);
        assert_eq!(settlements[0].committed, dec!(40));
        assert_eq!(settlements[0].pnl, dec!(60)); // 40 * 1.5
    }
}
