//! Settlement Network Intake
//!
//! Polls the settlement network's snapshot feed, dedupes deliveries,
//! decodes memos and routes each deposit to the reconciliation engine
//! or the spot intake. Undecodable memos refund.

pub mod listener;
pub mod snapshot;
pub mod source;

pub use listener::SettlementListener;
pub use snapshot::{SettlementCursor, Snapshot};
pub use source::{HttpSnapshotSource, MockSnapshotSource, SnapshotSource};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("snapshot source error: {0}")]
    Source(#[from] crate::clients::ClientError),

    #[error("reconcile error: {0}")]
    Reconcile(#[from] crate::reconcile::ReconcileError),

    #[error("spot intake error: {0}")]
    Execution(#[from] crate::execution::ExecutionError),

    #[error("withdrawal error: {0}")]
    Withdrawal(#[from] crate::withdrawal::WithdrawalError),
}
