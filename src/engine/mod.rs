//! Strategy execution core: eligibility filtering, position sizing,
//! capital accounting, settlement, and ledger reconciliation.

pub mod config;
pub mod executor;
pub mod filter;
pub mod ledger;
pub mod reconcile;
pub mod settlement;
pub mod sizer;

pub use config::{AllocationMethod, StrategyConfig};
pub use executor::ExecutionEngine;
pub use filter::Eligibility;
pub use ledger::{CapitalLedger, DailyLimits};
pub use settlement::Settlement;
