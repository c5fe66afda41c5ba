//! Position sizing: fixed, fractional-Kelly, and conviction-scaled stakes.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{RejectReason, TradeSignal, TraderStats};

use super::config::{AllocationMethod, StrategyConfig};
use super::filter::conviction_ratio;

/// Compute the stake for an eligible signal.
///
/// The raw stake from the allocation method is capped at `max_bet`,
/// rejected below `min_bet`, then capped at available cash; a stake that
/// only drops below `min_bet` because of the cash cap reports CASH_CHECK
/// rather than BELOW_MIN_BET.
pub fn compute_stake(
    signal: &TradeSignal,
    config: &StrategyConfig,
    stats: &TraderStats,
    available_cash: Decimal,
) -> Result<Decimal, RejectReason> {
    let raw = match config.allocation_method {
        AllocationMethod::Fixed => config.bet_size,
        AllocationMethod::Kelly => kelly_stake(signal, config, stats, available_cash),
        AllocationMethod::Conviction => {
            let ratio = conviction_ratio(signal.size, stats.avg_trade_size);
            config.bet_size * Decimal::try_from(ratio).unwrap_or(Decimal::ZERO)
        }
    };

    let capped = raw.min(config.max_bet);
    if capped < config.min_bet {
        debug!(
            strategy = %config.strategy_id,
            stake = %capped,
            min_bet = %config.min_bet,
            "Stake below minimum"
        );
        return Err(RejectReason::BelowMinBet);
    }

    let stake = capped.min(available_cash);
    if stake < config.min_bet {
        debug!(
            strategy = %config.strategy_id,
            stake = %stake,
            cash = %available_cash,
            "Insufficient cash for minimum stake"
        );
        return Err(RejectReason::CashCheck);
    }

    Ok(stake)
}

/// Fractional Kelly stake.
///
/// f* = (p*b - q) / b with p the trader's win rate, q = 1 - p, and
/// b = 1/price - 1 the net odds of the entry; f* is clamped to [0, 1]
/// before the Kelly fraction and bankroll scaling.
fn kelly_stake(
    signal: &TradeSignal,
    config: &StrategyConfig,
    stats: &TraderStats,
    bankroll: Decimal,
) -> Decimal {
    let price = signal.price.to_f64().unwrap_or(1.0);
    if price <= 0.0 || price >= 1.0 {
        return Decimal::ZERO;
    }

    let p = stats.win_rate;
    let q = 1.0 - p;
    let b = 1.0 / price - 1.0;

    let f_star = ((p * b - q) / b).clamp(0.0, 1.0);
    if f_star <= 0.0 {
        return Decimal::ZERO;
    }

    bankroll * config.kelly_fraction * Decimal::try_from(f_star).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use crate::models::Side;

    fn signal(price: Decimal, size: Decimal) -> TradeSignal {
        TradeSignal {
            signal_id: "sig-1".to_string(),
            trader_id: "0xabc".to_string(),
            market_id: "0xmarket".to_string(),
            outcome_side: Side::Yes,
            price,
            size,
            category: None,
            model_probability: None,
            timestamp: Utc::now(),
        }
    }

    fn stats(win_rate: f64) -> TraderStats {
        TraderStats {
            trader_id: "0xabc".to_string(),
            win_rate,
            roi: 0.1,
            avg_trade_size: dec!(100),
            sample_count: 50,
            refreshed_at: Utc::now(),
        }
    }

    #[test]
    fn test_fixed_stake() {
        let config = StrategyConfig {
            allocation_method: AllocationMethod::Fixed,
            bet_size: dec!(50),
            ..Default::default()
        };
        let stake =
            compute_stake(&signal(dec!(0.40), dec!(200)), &config, &stats(0.60), dec!(1000));
        assert_eq!(stake, Ok(dec!(50)));
    }

    #[test]
    fn test_kelly_stake_spec_example() {
        // price 0.40, win rate 0.60, quarter Kelly, $1000 bankroll:
        // b = 1.5, f* = (0.9 - 0.4) / 1.5 = 1/3, stake = 1000 * 0.25 * 1/3 = 83.33
        let config = StrategyConfig {
            allocation_method: AllocationMethod::Kelly,
            kelly_fraction: dec!(0.25),
            max_bet: dec!(500),
            ..Default::default()
        };
        let stake = compute_stake(&signal(dec!(0.40), dec!(200)), &config, &stats(0.60), dec!(1000))
            .unwrap();
        let expected = 1000.0 * 0.25 / 3.0;
        assert!((stake.to_f64().unwrap() - expected).abs() < 0.01);
    }

    #[test]
    fn test_kelly_clamps_to_max_bet() {
        let config = StrategyConfig {
            allocation_method: AllocationMethod::Kelly,
            kelly_fraction: dec!(0.25),
            max_bet: dec!(50),
            ..Default::default()
        };
        let stake = compute_stake(&signal(dec!(0.40), dec!(200)), &config, &stats(0.60), dec!(1000));
        assert_eq!(stake, Ok(dec!(50)));
    }

    #[test]
    fn test_negative_edge_kelly_rejects() {
        // Win rate below price: f* <= 0, stake 0, below min bet
        let config = StrategyConfig {
            allocation_method: AllocationMethod::Kelly,
            ..Default::default()
        };
        let stake = compute_stake(&signal(dec!(0.70), dec!(200)), &config, &stats(0.50), dec!(1000));
        assert_eq!(stake, Err(RejectReason::BelowMinBet));
    }

    #[test]
    fn test_conviction_scaling() {
        let config = StrategyConfig {
            allocation_method: AllocationMethod::Conviction,
            bet_size: dec!(20),
            max_bet: dec!(100),
            ..Default::default()
        };
        // conviction = 200 / 100 = 2.0 -> stake 40
        let stake =
            compute_stake(&signal(dec!(0.40), dec!(200)), &config, &stats(0.60), dec!(1000));
        assert_eq!(stake, Ok(dec!(40)));

        // conviction 10x clamps at max_bet
        let stake =
            compute_stake(&signal(dec!(0.40), dec!(1000)), &config, &stats(0.60), dec!(1000));
        assert_eq!(stake, Ok(dec!(100)));
    }

    #[test]
    fn test_cash_check_vs_below_min_bet() {
        let config = StrategyConfig {
            allocation_method: AllocationMethod::Fixed,
            bet_size: dec!(50),
            min_bet: dec!(10),
            ..Default::default()
        };

        // Plenty of strategy stake, but only $5 cash: CASH_CHECK
        let stake = compute_stake(&signal(dec!(0.40), dec!(200)), &config, &stats(0.60), dec!(5));
        assert_eq!(stake, Err(RejectReason::CashCheck));

        // Tiny strategy stake regardless of cash: BELOW_MIN_BET
        let tiny = StrategyConfig {
            bet_size: dec!(2),
            ..config
        };
        let stake = compute_stake(&signal(dec!(0.40), dec!(200)), &tiny, &stats(0.60), dec!(1000));
        assert_eq!(stake, Err(RejectReason::BelowMinBet));
    }

    #[test]
    fn test_stake_clamped_to_cash() {
        let config = StrategyConfig {
            allocation_method: AllocationMethod::Fixed,
            bet_size: dec!(50),
            ..Default::default()
        };
        let stake = compute_stake(&signal(dec!(0.40), dec!(200)), &config, &stats(0.60), dec!(30));
        assert_eq!(stake, Ok(dec!(30)));
    }
}
