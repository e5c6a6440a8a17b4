//! Strategy Order Lifecycle
//!
//! One table per strategy family, one closed state enum per lifecycle.
//! Every transition goes through an atomic CAS update
//! (`UPDATE ... WHERE state = ...`); a zero-row result means another
//! worker already moved the order and the caller must back off.

pub mod arbitrage;
pub mod error;
pub mod market_making;
pub mod simply_grow;
pub mod spot;
pub mod state;

pub use arbitrage::{ArbitrageOrder, ArbitrageOrderStore};
pub use error::OrderError;
pub use market_making::{AmountChangeType, MarketMakingOrder, MarketMakingOrderStore};
pub use simply_grow::{SimplyGrowOrder, SimplyGrowOrderStore};
pub use spot::{SpotOrder, SpotOrderStore};
pub use state::{OrderState, SpotOrderState};
