//! Data models for signals, orders, resolutions, and trader statistics.

mod order;
mod resolution;
mod signal;
mod stats;

pub use order::{Order, OrderOutcome, OrderStatus, RejectReason};
pub use resolution::MarketResolution;
pub use signal::{RawTradeEvent, Side, TradeSignal};
pub use stats::{RollingStats, TraderStats};
