//! Order model and lifecycle state machine.
//!
//! Pre-resolution statuses: PENDING -> {FILLED, PARTIAL, REJECTED, CANCELLED}.
//! Post-resolution outcomes (only from FILLED/PARTIAL): OPEN -> {WON, LOST}.
//! Status and outcome transitions are the only mutations an order sees.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::signal::{Side, TradeSignal};

/// Pre-resolution order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    Partial,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OrderStatus::Pending),
            "FILLED" => Some(OrderStatus::Filled),
            "PARTIAL" => Some(OrderStatus::Partial),
            "REJECTED" => Some(OrderStatus::Rejected),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// Post-resolution outcome axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderOutcome {
    Open,
    Won,
    Lost,
}

impl OrderOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderOutcome::Open => "OPEN",
            OrderOutcome::Won => "WON",
            OrderOutcome::Lost => "LOST",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(OrderOutcome::Open),
            "WON" => Some(OrderOutcome::Won),
            "LOST" => Some(OrderOutcome::Lost),
            _ => None,
        }
    }
}

/// Machine-readable reason a signal was not turned into capital at risk.
///
/// Filter rejections ("never eligible") and execution rejections
/// (cash/size checks) share this enum so every audit row distinguishes
/// why a signal stopped where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    PriceOutOfRange,
    EdgeTooSmall,
    ConvictionTooLow,
    InsufficientSample,
    MissingTraderStats,
    ModelProbabilityTooLow,
    CategoryNotAllowed,
    TraderNotAllowed,
    CashCheck,
    BelowMinBet,
    DailyLimit,
    Cooldown,
    MarketResolved,
}

impl RejectReason {
    pub fn as_code(&self) -> &'static str {
        match self {
            RejectReason::PriceOutOfRange => "PRICE_OUT_OF_RANGE",
            RejectReason::EdgeTooSmall => "EDGE_TOO_SMALL",
            RejectReason::ConvictionTooLow => "CONVICTION_TOO_LOW",
            RejectReason::InsufficientSample => "INSUFFICIENT_SAMPLE",
            RejectReason::MissingTraderStats => "MISSING_TRADER_STATS",
            RejectReason::ModelProbabilityTooLow => "MODEL_PROBABILITY_TOO_LOW",
            RejectReason::CategoryNotAllowed => "CATEGORY_NOT_ALLOWED",
            RejectReason::TraderNotAllowed => "TRADER_NOT_ALLOWED",
            RejectReason::CashCheck => "CASH_CHECK",
            RejectReason::BelowMinBet => "BELOW_MIN_BET",
            RejectReason::DailyLimit => "DAILY_LIMIT",
            RejectReason::Cooldown => "COOLDOWN",
            RejectReason::MarketResolved => "MARKET_RESOLVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PRICE_OUT_OF_RANGE" => Some(RejectReason::PriceOutOfRange),
            "EDGE_TOO_SMALL" => Some(RejectReason::EdgeTooSmall),
            "CONVICTION_TOO_LOW" => Some(RejectReason::ConvictionTooLow),
            "INSUFFICIENT_SAMPLE" => Some(RejectReason::InsufficientSample),
            "MISSING_TRADER_STATS" => Some(RejectReason::MissingTraderStats),
            "MODEL_PROBABILITY_TOO_LOW" => Some(RejectReason::ModelProbabilityTooLow),
            "CATEGORY_NOT_ALLOWED" => Some(RejectReason::CategoryNotAllowed),
            "TRADER_NOT_ALLOWED" => Some(RejectReason::TraderNotAllowed),
            "CASH_CHECK" => Some(RejectReason::CashCheck),
            "BELOW_MIN_BET" => Some(RejectReason::BelowMinBet),
            "DAILY_LIMIT" => Some(RejectReason::DailyLimit),
            "COOLDOWN" => Some(RejectReason::Cooldown),
            "MARKET_RESOLVED" => Some(RejectReason::MarketResolved),
            _ => None,
        }
    }
}

/// One order per accepted (or audited) signal per strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub strategy_id: String,
    pub signal_id: String,
    pub market_id: String,
    pub outcome_side: Side,

    /// Requested stake in USD (what was reserved)
    pub signal_size_usd: Decimal,

    /// Stake actually executed in USD
    pub executed_size_usd: Decimal,

    /// Price the executed portion filled at
    pub executed_price: Decimal,

    /// Outcome shares bought (executed_size / executed_price)
    pub shares_bought: Decimal,

    /// executed_size_usd / signal_size_usd, clamped to [0, 1]
    pub fill_rate: Decimal,

    pub status: OrderStatus,
    pub outcome: OrderOutcome,
    pub rejection_reason: Option<RejectReason>,

    /// Realized P&L in USD once settled
    pub pnl_usd: Option<Decimal>,

    pub order_placed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a PENDING order for an accepted signal with a reserved stake.
    pub fn pending(strategy_id: &str, signal: &TradeSignal, stake: Decimal) -> Self {
        Self {
            order_id: Uuid::new_v4().to_string(),
            strategy_id: strategy_id.to_string(),
            signal_id: signal.signal_id.clone(),
            market_id: signal.market_id.clone(),
            outcome_side: signal.outcome_side,
            signal_size_usd: stake,
            executed_size_usd: Decimal::ZERO,
            executed_price: Decimal::ZERO,
            shares_bought: Decimal::ZERO,
            fill_rate: Decimal::ZERO,
            status: OrderStatus::Pending,
            outcome: OrderOutcome::Open,
            rejection_reason: None,
            pnl_usd: None,
            order_placed_at: signal.timestamp,
            resolved_at: None,
        }
    }

    /// Create a terminal REJECTED audit row for a signal that never
    /// committed capital.
    pub fn rejected(strategy_id: &str, signal: &TradeSignal, reason: RejectReason) -> Self {
        let mut order = Self::pending(strategy_id, signal, Decimal::ZERO);
        order.signal_size_usd = signal.size;
        order.status = OrderStatus::Rejected;
        order.rejection_reason = Some(reason);
        order
    }

    /// Record an execution against a PENDING order.
    ///
    /// Fill rate at or above 1.0 is clamped and the order becomes FILLED;
    /// anything strictly between 0 and 1 becomes PARTIAL. Returns the
    /// unfilled remainder of the reservation, or `None` (leaving the
    /// order untouched) when the order is not PENDING.
    pub fn record_fill(
        &mut self,
        executed_size: Decimal,
        executed_price: Decimal,
    ) -> Option<Decimal> {
        if self.status != OrderStatus::Pending {
            return None;
        }

        let executed = executed_size.min(self.signal_size_usd).max(Decimal::ZERO);
        self.executed_size_usd = executed;
        self.executed_price = executed_price;
        self.shares_bought = if executed_price > Decimal::ZERO {
            executed / executed_price
        } else {
            Decimal::ZERO
        };

        self.fill_rate = if self.signal_size_usd > Decimal::ZERO {
            (executed / self.signal_size_usd).min(Decimal::ONE)
        } else {
            Decimal::ZERO
        };

        self.status = if self.fill_rate >= Decimal::ONE {
            OrderStatus::Filled
        } else if self.fill_rate > Decimal::ZERO {
            OrderStatus::Partial
        } else {
            OrderStatus::Cancelled
        };

        Some(self.signal_size_usd - executed)
    }

    /// Cancel a PENDING order, returning the full reservation.
    ///
    /// `None` (and no mutation) for any other status: filled exposure is
    /// settled by resolutions, never cancelled away.
    pub fn cancel(&mut self) -> Option<Decimal> {
        if self.status != OrderStatus::Pending {
            return None;
        }
        self.status = OrderStatus::Cancelled;
        Some(self.signal_size_usd)
    }

    /// Transition OPEN -> WON/LOST. Only the settlement engine calls this.
    ///
    /// Returns false (and leaves the order untouched) if the order is not
    /// settleable: already settled, or never filled. This is the
    /// idempotency guard for re-delivered resolutions.
    pub fn settle(&mut self, won: bool, pnl: Decimal, resolved_at: DateTime<Utc>) -> bool {
        if self.outcome != OrderOutcome::Open || !self.is_settleable() {
            return false;
        }

        self.outcome = if won { OrderOutcome::Won } else { OrderOutcome::Lost };
        self.pnl_usd = Some(pnl);
        self.resolved_at = Some(resolved_at);
        true
    }

    /// True for orders holding live market exposure.
    pub fn is_settleable(&self) -> bool {
        matches!(self.status, OrderStatus::Filled | OrderStatus::Partial)
    }

    /// True once no further transition can apply.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, OrderStatus::Rejected | OrderStatus::Cancelled)
            || self.outcome != OrderOutcome::Open
    }

    /// Capital still locked against this order.
    pub fn committed_amount(&self) -> Decimal {
        match self.status {
            OrderStatus::Pending => self.signal_size_usd,
            OrderStatus::Filled | OrderStatus::Partial => self.executed_size_usd,
            OrderStatus::Rejected | OrderStatus::Cancelled => Decimal::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signal() -> TradeSignal {
        TradeSignal {
            signal_id: "sig-1".to_string(),
            trader_id: "0xabc".to_string(),
            market_id: "0xmarket".to_string(),
            outcome_side: Side::Yes,
            price: dec!(0.40),
            size: dec!(250),
            category: None,
            model_probability: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_full_fill() {
        let mut order = Order::pending("s1", &signal(), dec!(100));
        let remainder = order.record_fill(dec!(100), dec!(0.40));

        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.fill_rate, dec!(1));
        assert_eq!(order.shares_bought, dec!(250));
        assert_eq!(remainder, Some(dec!(0)));
    }

    #[test]
    fn test_partial_fill_returns_remainder() {
        let mut order = Order::pending("s1", &signal(), dec!(100));
        let remainder = order.record_fill(dec!(40), dec!(0.40));

        assert_eq!(order.status, OrderStatus::Partial);
        assert_eq!(order.fill_rate, dec!(0.4));
        assert_eq!(remainder, Some(dec!(60)));
        assert_eq!(order.committed_amount(), dec!(40));
    }

    #[test]
    fn test_overfill_clamps() {
        let mut order = Order::pending("s1", &signal(), dec!(100));
        order.record_fill(dec!(150), dec!(0.40)).unwrap();

        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.executed_size_usd, dec!(100));
        assert_eq!(order.fill_rate, dec!(1));
    }

    #[test]
    fn test_settle_only_once() {
        let mut order = Order::pending("s1", &signal(), dec!(100));
        order.record_fill(dec!(100), dec!(0.40)).unwrap();

        assert!(order.settle(true, dec!(150), Utc::now()));
        assert_eq!(order.outcome, OrderOutcome::Won);

        // Re-delivery is a no-op
        assert!(!order.settle(false, dec!(-100), Utc::now()));
        assert_eq!(order.outcome, OrderOutcome::Won);
        assert_eq!(order.pnl_usd, Some(dec!(150)));
    }

    #[test]
    fn test_rejected_and_cancelled_never_settle() {
        let mut rejected = Order::rejected("s1", &signal(), RejectReason::CashCheck);
        assert!(!rejected.settle(true, dec!(1), Utc::now()));
        assert_eq!(rejected.committed_amount(), dec!(0));

        let mut cancelled = Order::pending("s1", &signal(), dec!(100));
        assert_eq!(cancelled.cancel(), Some(dec!(100)));
        assert!(!cancelled.settle(true, dec!(1), Utc::now()));
        assert!(cancelled.is_terminal());
    }

    #[test]
    fn test_fill_and_cancel_refuse_non_pending_orders() {
        let mut order = Order::pending("s1", &signal(), dec!(100));
        order.record_fill(dec!(100), dec!(0.40)).unwrap();

        // A filled order holds live exposure; cancelling it must not
        // rewrite history or conjure a release.
        assert_eq!(order.cancel(), None);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.committed_amount(), dec!(100));

        // Nor can it be filled twice.
        assert_eq!(order.record_fill(dec!(50), dec!(0.50)), None);
        assert_eq!(order.executed_price, dec!(0.40));

        let mut cancelled = Order::pending("s1", &signal(), dec!(100));
        cancelled.cancel().unwrap();
        assert_eq!(cancelled.record_fill(dec!(100), dec!(0.40)), None);
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_reason_codes_round_trip() {
        for reason in [
            RejectReason::CashCheck,
            RejectReason::BelowMinBet,
            RejectReason::MissingTraderStats,
            RejectReason::Cooldown,
            RejectReason::MarketResolved,
        ] {
            assert_eq!(RejectReason::parse(reason.as_code()), Some(reason));
        }
    }
}
