use thiserror::Error;
use uuid::Uuid;

use crate::clients::ClientError;
use crate::jobs::JobError;

#[derive(Debug, Error)]
pub enum WithdrawalError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ledger error: {0}")]
    Client(#[from] ClientError),

    #[error("job queue error: {0}")]
    Job(#[from] JobError),

    #[error("unknown withdrawal status: {0}")]
    UnknownStatus(String),

    #[error("withdrawal not found: {0}")]
    NotFound(Uuid),

    #[error("destination is not a ledger user id: {0}")]
    BadDestination(String),

    #[error("order update failed: {0}")]
    Order(#[from] crate::orders::OrderError),
}

/// Job handlers surface domain failures as handler errors so the queue
/// applies its backoff to the retry.
impl From<WithdrawalError> for JobError {
    fn from(e: WithdrawalError) -> Self {
        JobError::Handler(e.to_string())
    }
}
