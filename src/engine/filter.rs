//! Strategy filter engine: the pure eligibility predicate applied to
//! every signal for every active strategy.
//!
//! Missing trader statistics fail closed. A deny is a normal outcome,
//! not an error; the reason code ends up on the audit row.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{RejectReason, TradeSignal, TraderStats};

use super::config::StrategyConfig;

/// Outcome of evaluating a signal against one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(RejectReason),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

/// Evaluate a signal against a strategy's eligibility thresholds.
///
/// Pure predicate: no side effects, no clock reads. All checks must pass;
/// the first failing check names the reason.
pub fn evaluate(
    signal: &TradeSignal,
    config: &StrategyConfig,
    stats: Option<&TraderStats>,
) -> Eligibility {
    if !config.allows_trader(&signal.trader_id) {
        return deny(signal, config, RejectReason::TraderNotAllowed);
    }

    if !config.allows_category(signal.category.as_deref()) {
        return deny(signal, config, RejectReason::CategoryNotAllowed);
    }

    if let Some(min_prob) = config.model_probability_min {
        // A strategy that requires a model estimate fails closed when the
        // signal carries none.
        match signal.model_probability {
            Some(p) if p >= min_prob => {}
            _ => return deny(signal, config, RejectReason::ModelProbabilityTooLow),
        }
    }

    if signal.price < config.price_min || signal.price > config.price_max {
        return deny(signal, config, RejectReason::PriceOutOfRange);
    }

    let Some(stats) = stats else {
        return deny(signal, config, RejectReason::MissingTraderStats);
    };

    if stats.sample_count < config.min_trader_sample_count {
        return deny(signal, config, RejectReason::InsufficientSample);
    }

    if signal.edge(stats.win_rate) < config.min_edge {
        return deny(signal, config, RejectReason::EdgeTooSmall);
    }

    if config.min_conviction > 0.0 {
        let conviction = conviction_ratio(signal.size, stats.avg_trade_size);
        if conviction < config.min_conviction {
            return deny(signal, config, RejectReason::ConvictionTooLow);
        }
    }

    Eligibility::Eligible
}

/// Signal size relative to the trader's rolling average size.
///
/// An unknown average (zero) yields zero conviction, which fails any
/// positive threshold.
pub fn conviction_ratio(signal_size: Decimal, avg_trade_size: Decimal) -> f64 {
    if avg_trade_size <= Decimal::ZERO {
        return 0.0;
    }
    (signal_size / avg_trade_size).to_f64().unwrap_or(0.0)
}

fn deny(signal: &TradeSignal, config: &StrategyConfig, reason: RejectReason) -> Eligibility {
    debug!(
        strategy = %config.strategy_id,
        signal = %signal.signal_id,
        reason = reason.as_code(),
        "Signal ineligible"
    );
    Eligibility::Ineligible(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use crate::models::Side;

    fn signal() -> TradeSignal {
        TradeSignal {
            signal_id: "sig-1".to_string(),
            trader_id: "0xabc".to_string(),
            market_id: "0xmarket".to_string(),
            outcome_side: Side::Yes,
            price: dec!(0.40),
            size: dec!(200),
            category: Some("NFL".to_string()),
            model_probability: None,
            timestamp: Utc::now(),
        }
    }

    fn stats(win_rate: f64, sample_count: u32) -> TraderStats {
        TraderStats {
            trader_id: "0xabc".to_string(),
            win_rate,
            roi: 0.1,
            avg_trade_size: dec!(100),
            sample_count,
            refreshed_at: Utc::now(),
        }
    }

    #[test]
    fn test_eligible_signal() {
        // Edge = 0.60 - 0.40 = 0.20 >= 0.05
        let result = evaluate(&signal(), &StrategyConfig::default(), Some(&stats(0.60, 50)));
        assert!(result.is_eligible());
    }

    #[test]
    fn test_missing_stats_fail_closed() {
        let result = evaluate(&signal(), &StrategyConfig::default(), None);
        assert_eq!(result, Eligibility::Ineligible(RejectReason::MissingTraderStats));
    }

    #[test]
    fn test_edge_too_small() {
        // Edge = 0.42 - 0.40 = 0.02 < 0.05
        let result = evaluate(&signal(), &StrategyConfig::default(), Some(&stats(0.42, 50)));
        assert_eq!(result, Eligibility::Ineligible(RejectReason::EdgeTooSmall));
    }

    #[test]
    fn test_insufficient_sample() {
        let result = evaluate(&signal(), &StrategyConfig::default(), Some(&stats(0.60, 10)));
        assert_eq!(result, Eligibility::Ineligible(RejectReason::InsufficientSample));
    }

    #[test]
    fn test_price_bounds() {
        let mut s = signal();
        s.price = dec!(0.97);
        let result = evaluate(&s, &StrategyConfig::default(), Some(&stats(0.99, 50)));
        assert_eq!(result, Eligibility::Ineligible(RejectReason::PriceOutOfRange));
    }

    #[test]
    fn test_conviction_threshold() {
        let config = StrategyConfig {
            min_conviction: 1.5,
            ..Default::default()
        };

        // 200 / 100 = 2.0 conviction, passes
        assert!(evaluate(&signal(), &config, Some(&stats(0.60, 50))).is_eligible());

        let mut small = signal();
        small.size = dec!(100); // conviction 1.0
        assert_eq!(
            evaluate(&small, &config, Some(&stats(0.60, 50))),
            Eligibility::Ineligible(RejectReason::ConvictionTooLow)
        );
    }

    #[test]
    fn test_model_probability_fail_closed() {
        let config = StrategyConfig {
            model_probability_min: Some(0.55),
            ..Default::default()
        };

        // No estimate on the signal: fail closed
        assert_eq!(
            evaluate(&signal(), &config, Some(&stats(0.60, 50))),
            Eligibility::Ineligible(RejectReason::ModelProbabilityTooLow)
        );

        let mut with_model = signal();
        with_model.model_probability = Some(0.62);
        assert!(evaluate(&with_model, &config, Some(&stats(0.60, 50))).is_eligible());
    }

    #[test]
    fn test_allow_lists_deny() {
        let config = StrategyConfig {
            allowed_traders: vec!["0xother".to_string()],
            ..Default::default()
        };
        assert_eq!(
            evaluate(&signal(), &config, Some(&stats(0.60, 50))),
            Eligibility::Ineligible(RejectReason::TraderNotAllowed)
        );

        let config = StrategyConfig {
            allowed_categories: vec!["Politics".to_string()],
            ..Default::default()
        };
        assert_eq!(
            evaluate(&signal(), &config, Some(&stats(0.60, 50))),
            Eligibility::Ineligible(RejectReason::CategoryNotAllowed)
        );
    }
}
