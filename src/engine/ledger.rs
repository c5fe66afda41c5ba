//! Capital ledger: the single authority for a strategy's cash, locked
//! capital, realized P&L, and drawdown.
//!
//! Conservation law: `available_cash + locked_capital` always equals
//! `starting_capital + realized_pnl`. Every operation is all-or-nothing
//! and must leave that law intact.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::RejectReason;

/// Daily circuit-breaker limits, taken from the strategy config.
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyLimits {
    pub max_daily_spend: Option<Decimal>,
    pub max_daily_loss: Option<Decimal>,
}

/// Per-strategy balance sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalLedger {
    pub starting_capital: Decimal,
    pub available_cash: Decimal,

    /// Capital committed to PENDING/FILLED/PARTIAL orders
    pub locked_capital: Decimal,
    pub realized_pnl: Decimal,

    /// High-water mark of equity; non-decreasing
    pub peak_equity: Decimal,

    /// (peak - equity) / peak as a percentage, always >= 0
    pub current_drawdown_pct: f64,

    /// Reserved today; reset on the external daily boundary
    pub daily_spent: Decimal,

    /// Realized losses today; reset on the external daily boundary
    pub daily_loss: Decimal,
}

impl CapitalLedger {
    pub fn new(starting_capital: Decimal) -> Self {
        Self {
            starting_capital,
            available_cash: starting_capital,
            locked_capital: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            peak_equity: starting_capital,
            current_drawdown_pct: 0.0,
            daily_spent: Decimal::ZERO,
            daily_loss: Decimal::ZERO,
        }
    }

    /// Cash plus locked capital. Realized P&L is already folded into cash
    /// at settlement, so equity = starting_capital + realized_pnl holds.
    pub fn equity(&self) -> Decimal {
        self.available_cash + self.locked_capital
    }

    /// Reserve capital for a new order. All checks run before any
    /// mutation, so a failed reserve leaves the ledger untouched.
    pub fn reserve(&mut self, amount: Decimal, limits: &DailyLimits) -> Result<(), RejectReason> {
        if amount <= Decimal::ZERO || amount > self.available_cash {
            return Err(RejectReason::CashCheck);
        }

        if let Some(max_spend) = limits.max_daily_spend {
            if self.daily_spent + amount > max_spend {
                return Err(RejectReason::DailyLimit);
            }
        }
        if let Some(max_loss) = limits.max_daily_loss {
            if self.daily_loss >= max_loss {
                return Err(RejectReason::DailyLimit);
            }
        }

        self.available_cash -= amount;
        self.locked_capital += amount;
        self.daily_spent += amount;
        Ok(())
    }

    /// Release reserved capital without P&L effect: cancellation,
    /// rejection after reserve, or the unfilled remainder of a partial.
    pub fn release(&mut self, amount: Decimal) {
        let amount = amount.min(self.locked_capital).max(Decimal::ZERO);
        self.locked_capital -= amount;
        self.available_cash += amount;
    }

    /// Apply a settlement: release the committed stake and book the P&L.
    pub fn settle(&mut self, committed: Decimal, pnl: Decimal) {
        let committed = committed.min(self.locked_capital).max(Decimal::ZERO);
        self.locked_capital -= committed;
        self.available_cash += committed + pnl;
        self.realized_pnl += pnl;

        if pnl < Decimal::ZERO {
            self.daily_loss += -pnl;
        }

        self.update_watermark();
    }

    /// Reset the daily circuit-breaker counters. Called from outside on
    /// the daily boundary; the ledger itself has no clock.
    pub fn reset_daily(&mut self) {
        self.daily_spent = Decimal::ZERO;
        self.daily_loss = Decimal::ZERO;
    }

    fn update_watermark(&mut self) {
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }

        self.current_drawdown_pct = if self.peak_equity > Decimal::ZERO {
            ((self.peak_equity - equity) / self.peak_equity)
                .to_f64()
                .unwrap_or(0.0)
                .max(0.0)
                * 100.0
        } else {
            0.0
        };
    }

    /// Conservation check, used by tests and the reconcile drift report.
    pub fn conserves(&self) -> bool {
        self.equity() == self.starting_capital + self.realized_pnl
    }
}
