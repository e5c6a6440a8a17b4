//! Withdrawal Pipeline
//!
//! Outbound transfers on the settlement network: releases of strategy
//! proceeds, refunds of rejected deposits, and reward payouts. Rows are
//! durable, idempotent on the originating `snapshot_id`, and driven
//! through the job queue:
//!
//! - `process_withdrawal` jobs execute one transfer each, with CAS
//!   claiming so a duplicate dispatch never double-spends;
//! - a single self-rescheduling `confirm_withdrawals` job sweeps
//!   unconfirmed rows and advances them to their terminal state.

pub mod confirmation;
pub mod error;
pub mod processor;
pub mod service;
pub mod store;
pub mod types;

pub use confirmation::ConfirmWithdrawalsHandler;
pub use error::WithdrawalError;
pub use processor::ProcessWithdrawalHandler;
pub use service::WithdrawalService;
pub use store::WithdrawalStore;
pub use types::{NewWithdrawal, Withdrawal, WithdrawalKind, WithdrawalStatus};

/// Job kind executing one withdrawal.
pub const JOB_PROCESS_WITHDRAWAL: &str = "process_withdrawal";
/// Job kind for the self-rescheduling confirmation sweep.
pub const JOB_CONFIRM_WITHDRAWALS: &str = "confirm_withdrawals";
