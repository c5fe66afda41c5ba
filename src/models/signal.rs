//! Trade signal model: an observed trade by a tracked trader, normalized
//! into the canonical form the strategy pipeline consumes.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome token side of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "YES" | "Y" => Some(Side::Yes),
            "NO" | "N" => Some(Side::No),
            _ => None,
        }
    }
}

/// Canonical, immutable trade signal.
///
/// Created once per observed trade by [`RawTradeEvent::normalize`] and
/// deduplicated by `signal_id` before any strategy sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    /// Unique signal identifier (typically tx_hash + log index)
    pub signal_id: String,

    /// Source trader's wallet address
    pub trader_id: String,

    /// Market condition ID
    pub market_id: String,

    /// Outcome token side being bought
    pub outcome_side: Side,

    /// Entry price per share, strictly inside (0, 1)
    pub price: Decimal,

    /// Stake in USD
    pub size: Decimal,

    /// Market category (e.g. "NFL", "Politics"), when known
    #[serde(default)]
    pub category: Option<String>,

    /// Optional model probability estimate for the chosen side
    #[serde(default)]
    pub model_probability: Option<f64>,

    /// When the source trade occurred
    pub timestamp: DateTime<Utc>,
}

impl TradeSignal {
    /// Edge of this signal for a trader with the given win rate.
    pub fn edge(&self, trader_win_rate: f64) -> f64 {
        trader_win_rate - self.price.try_into().unwrap_or(1.0)
    }
}

/// Raw trade event as delivered by the ingestion feed.
///
/// Loosely typed on purpose: the feed carries strings for sides and may
/// omit optional enrichment fields.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTradeEvent {
    pub id: String,
    pub wallet_address: String,
    pub condition_id: String,
    pub token_label: String,
    pub price: Decimal,
    pub trade_size_usd: Decimal,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub model_probability: Option<f64>,
    pub trade_time: DateTime<Utc>,
}

impl RawTradeEvent {
    /// Normalize into a canonical [`TradeSignal`].
    ///
    /// Rejects malformed events outright: unknown side labels, prices
    /// outside the open interval (0, 1), non-positive sizes.
    pub fn normalize(self) -> Result<TradeSignal> {
        let Some(side) = Side::parse(&self.token_label) else {
            bail!("unknown outcome side '{}' on event {}", self.token_label, self.id);
        };

        if self.price <= Decimal::ZERO || self.price >= Decimal::ONE {
            bail!("price {} out of (0, 1) on event {}", self.price, self.id);
        }

        if self.trade_size_usd <= Decimal::ZERO {
            bail!("non-positive size {} on event {}", self.trade_size_usd, self.id);
        }

        Ok(TradeSignal {
            signal_id: self.id,
            trader_id: self.wallet_address,
            market_id: self.condition_id,
            outcome_side: side,
            price: self.price,
            size: self.trade_size_usd,
            category: self.category,
            model_probability: self.model_probability,
            timestamp: self.trade_time,
        })
    }
}
