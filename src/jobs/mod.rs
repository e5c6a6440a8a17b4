//! Durable Job Queue
//!
//! A small PostgreSQL-backed queue used for everything that must
//! survive a restart: withdrawal processing, withdrawal confirmation
//! sweeps, and any other deferred work. Jobs are claimed with an atomic
//! CAS update, retried with exponential backoff, and parked as `failed`
//! once their attempt budget is spent.

pub mod queue;
pub mod runner;

pub use queue::{Job, JobQueue, JobStatus, backoff_delay};
pub use runner::{JobHandler, JobRunner};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("bad job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("no handler registered for job kind: {0}")]
    UnknownKind(String),

    #[error("handler failed: {0}")]
    Handler(String),
}
