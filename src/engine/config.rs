//! Strategy configuration: eligibility thresholds and sizing parameters.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// How a strategy turns an eligible signal into a stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AllocationMethod {
    /// Always bet `bet_size`
    Fixed,
    /// Fractional Kelly on the trader's win rate and the signal's odds
    Kelly,
    /// Scale `bet_size` by the signal's conviction ratio
    Conviction,
}

/// Operator-owned configuration for one strategy.
///
/// Read by the filter engine and sizer on every signal; only ever written
/// from the operator-facing surface, never by the engine itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy_id: String,

    // === Eligibility thresholds ===
    /// Minimum model probability for the chosen side, if the strategy
    /// uses a model at all
    #[serde(default)]
    pub model_probability_min: Option<f64>,

    /// Minimum entry price (0-1)
    pub price_min: Decimal,

    /// Maximum entry price (0-1)
    pub price_max: Decimal,

    /// Minimum edge: trader win rate minus entry price
    pub min_edge: f64,

    /// Minimum conviction: signal size over the trader's average size
    pub min_conviction: f64,

    /// Minimum resolved-trade sample backing the trader's stats
    pub min_trader_sample_count: u32,

    /// Market categories to copy; empty means all
    #[serde(default)]
    pub allowed_categories: Vec<String>,

    /// Specific traders to copy; empty means all
    #[serde(default)]
    pub allowed_traders: Vec<String>,

    // === Sizing parameters ===
    pub allocation_method: AllocationMethod,

    /// Fraction of full Kelly to use (0, 1]
    pub kelly_fraction: Decimal,

    /// Base stake in USD for FIXED and CONVICTION
    pub bet_size: Decimal,

    /// Smallest stake worth placing
    pub min_bet: Decimal,

    /// Largest stake allowed
    pub max_bet: Decimal,

    // === Capital ===
    pub starting_capital: Decimal,

    /// Daily spend circuit breaker; `None` disables it
    #[serde(default)]
    pub max_daily_spend: Option<Decimal>,

    /// Daily realized-loss circuit breaker; `None` disables it
    #[serde(default)]
    pub max_daily_loss: Option<Decimal>,

    /// Hours to stay out of a market after its prior resolution (backtest)
    #[serde(default)]
    pub cooldown_hours: f64,

    // === Flags ===
    pub is_active: bool,

    #[serde(default)]
    pub is_paused: bool,
}

impl StrategyConfig {
    /// Validate operator input before it reaches the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.strategy_id.trim().is_empty() {
            bail!("strategy_id must not be empty");
        }
        if self.price_min < Decimal::ZERO
            || self.price_max > Decimal::ONE
            || self.price_min >= self.price_max
        {
            bail!(
                "invalid price bounds [{}, {}] for {}",
                self.price_min,
                self.price_max,
                self.strategy_id
            );
        }
        if self.kelly_fraction <= Decimal::ZERO || self.kelly_fraction > Decimal::ONE {
            bail!("kelly_fraction must be in (0, 1] for {}", self.strategy_id);
        }
        if self.bet_size <= Decimal::ZERO {
            bail!("bet_size must be positive for {}", self.strategy_id);
        }
        if self.min_bet <= Decimal::ZERO || self.min_bet > self.max_bet {
            bail!(
                "invalid bet bounds [{}, {}] for {}",
                self.min_bet,
                self.max_bet,
                self.strategy_id
            );
        }
        if self.starting_capital <= Decimal::ZERO {
            bail!("starting_capital must be positive for {}", self.strategy_id);
        }
        if self.cooldown_hours < 0.0 {
            bail!("cooldown_hours must be non-negative for {}", self.strategy_id);
        }
        Ok(())
    }

    /// A strategy only sees signals while active and not paused.
    pub fn accepts_signals(&self) -> bool {
        self.is_active && !self.is_paused
    }

    pub fn allows_category(&self, category: Option<&str>) -> bool {
        if self.allowed_categories.is_empty() {
            return true;
        }
        category.map_or(false, |c| {
            self.allowed_categories.iter().any(|a| a.eq_ignore_ascii_case(c))
        })
    }

    pub fn allows_trader(&self, trader_id: &str) -> bool {
        self.allowed_traders.is_empty()
            || self.allowed_traders.iter().any(|t| t.eq_ignore_ascii_case(trader_id))
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            strategy_id: "default".to_string(),
            model_probability_min: None,
            price_min: dec!(0.05),           // Don't buy below 5c
            price_max: dec!(0.95),           // Don't buy above 95c
            min_edge: 0.05,                  // Only +EV entries
            min_conviction: 0.0,
            min_trader_sample_count: 30,
            allowed_categories: Vec::new(),
            allowed_traders: Vec::new(),
            allocation_method: AllocationMethod::Fixed,
            kelly_fraction: dec!(0.25),      // Quarter Kelly
            bet_size: dec!(50),
            min_bet: dec!(1),
            max_bet: dec!(100),
            starting_capital: dec!(1000),
            max_daily_spend: None,
            max_daily_loss: None,
            cooldown_hours: 0.0,
            is_active: true,
            is_paused: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(StrategyConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_price_bounds_rejected() {
        let config = StrategyConfig {
            price_min: dec!(0.9),
            price_max: dec!(0.1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_kelly_fraction_rejected() {
        let config = StrategyConfig {
            kelly_fraction: dec!(1.5),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_allow_lists() {
        let config = StrategyConfig {
            allowed_categories: vec!["NFL".to_string()],
            allowed_traders: vec!["0xabc".to_string()],
            ..Default::default()
        };

        assert!(config.allows_category(Some("nfl")));
        assert!(!config.allows_category(Some("Politics")));
        // Missing category fails closed against a non-empty allow-list
        assert!(!config.allows_category(None));

        assert!(config.allows_trader("0xABC"));
        assert!(!config.allows_trader("0xdef"));

        let open = StrategyConfig::default();
        assert!(open.allows_category(None));
        assert!(open.allows_trader("anyone"));
    }

    #[test]
    fn test_paused_strategy_rejects_signals() {
        let mut config = StrategyConfig::default();
        assert!(config.accepts_signals());
        config.is_paused = true;
        assert!(!config.accepts_signals());
    }
}
