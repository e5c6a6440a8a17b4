//! Payment Reconciliation
//!
//! Two-leg strategies (arbitrage, market making) are funded by two
//! deposits sharing one order id. The engine folds those legs into a
//! `payment_states` row under a `SELECT ... FOR UPDATE` critical
//! section and creates the strategy order exactly once when the second
//! leg lands. Single-leg simply-grow completes at creation. Anything
//! the engine cannot accept is refunded with an explanatory memo.

pub mod engine;
pub mod pairs;
pub mod payment;

pub use engine::{Outcome, ReconcileEngine};
pub use pairs::{PairRegistry, TradingPair};
pub use payment::{PaymentState, PaymentStateStore};

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("order store error: {0}")]
    Order(#[from] crate::orders::OrderError),

    #[error("withdrawal error: {0}")]
    Withdrawal(#[from] crate::withdrawal::WithdrawalError),

    #[error("unknown payment state: {0}")]
    UnknownState(String),

    #[error("payment state not found: {0}")]
    NotFound(Uuid),

    #[error("snapshot carries no usable amount: {0}")]
    BadAmount(String),

    #[error("concurrent leg conflict for order {0}")]
    LegConflict(Uuid),
}
