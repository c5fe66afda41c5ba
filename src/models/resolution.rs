//! Market resolution: an external fact consumed by the settlement engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signal::Side;

/// Final outcome of a market, delivered once the venue finalizes it.
///
/// Redelivery must be safely ignorable; a resolution with no determinable
/// winner is ambiguous and leaves orders open for retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketResolution {
    pub market_id: String,

    /// Winning outcome side; `None` when the venue has not determined one
    #[serde(default)]
    pub winning_side: Option<Side>,

    /// Whether the market has finalized
    pub closed: bool,

    /// When the resolution was observed
    #[serde(default = "Utc::now")]
    pub resolved_at: DateTime<Utc>,
}

impl MarketResolution {
    /// A resolution is actionable only when closed with a known winner.
    pub fn winner(&self) -> Option<Side> {
        if self.closed {
            self.winning_side
        } else {
            None
        }
    }
}
