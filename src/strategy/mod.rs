//! Strategy Execution Loops
//!
//! Every running strategy owns one jittered in-process loop, registered
//! under its strategy key. A periodic scheduler scans the stores, claims
//! startable orders by CAS and spawns the matching loop; the in-memory
//! registry only prevents double-spawning inside this process, the store
//! CAS stays the correctness arbiter.

pub mod arbitrage;
pub mod history;
pub mod key;
pub mod market_making;
pub mod registry;
pub mod scheduler;
pub mod simply_grow;
pub mod timing;
pub mod volume;

pub use arbitrage::ArbitrageLoop;
pub use history::{NewStrategyHistory, StrategyHistory, StrategyHistoryStore};
pub use key::{StrategyKey, StrategyKind};
pub use market_making::MarketMakingLoop;
pub use registry::{LoopRegistry, StopSignal};
pub use scheduler::StrategyScheduler;
pub use simply_grow::SimplyGrowLoop;
pub use volume::{VolumeBot, VolumeStrategy, VolumeStrategyStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("order store error: {0}")]
    Order(#[from] crate::orders::OrderError),

    #[error("client error: {0}")]
    Client(#[from] crate::clients::ClientError),

    #[error("pair lookup error: {0}")]
    Reconcile(#[from] crate::reconcile::ReconcileError),

    #[error("withdrawal error: {0}")]
    Withdrawal(#[from] crate::withdrawal::WithdrawalError),

    #[error("no price available for {0}")]
    NoPrice(String),

    #[error("unknown state: {0}")]
    UnknownState(String),

    #[error("unknown trading pair: {0}")]
    UnknownPair(uuid::Uuid),
}
