//! Exchange Execution
//!
//! Spot orders skip payment reconciliation: the intake creates the row
//! straight from a decoded text memo and places the exchange order, and
//! the poll worker drives fills, cancels and the final fund release.
//! Exchange webhooks are not trusted; polling is the only fill source.

pub mod intake;
pub mod worker;

pub use intake::{SpotIntake, SpotOutcome};
pub use worker::SpotWorker;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("order store error: {0}")]
    Order(#[from] crate::orders::OrderError),

    #[error("exchange error: {0}")]
    Client(#[from] crate::clients::ClientError),

    #[error("reconcile error: {0}")]
    Reconcile(#[from] crate::reconcile::ReconcileError),

    #[error("withdrawal error: {0}")]
    Withdrawal(#[from] crate::withdrawal::WithdrawalError),
}
