//! Withdrawal Confirmation Sweep
//!
//! A single recurring `confirm_withdrawals` job that polls the ledger
//! for every withdrawal still waiting on settlement, recovers rows a
//! crashed worker left in `processing`, and re-enqueues itself as its
//! last step so the chain survives restarts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::clients::{LedgerClient, LedgerTxState};
use crate::jobs::{Job, JobError, JobHandler, JobQueue};
use crate::orders::SpotOrderStore;

use super::error::WithdrawalError;
use super::store::WithdrawalStore;
use super::types::{Withdrawal, WithdrawalKind, WithdrawalStatus};
use super::{JOB_CONFIRM_WITHDRAWALS, JOB_PROCESS_WITHDRAWAL};

/// Rows stuck in `processing` without a ledger tx for this long went
/// down with their worker and are safe to requeue.
const STALE_PROCESSING_AFTER: Duration = Duration::from_secs(15 * 60);

const SWEEP_BATCH: i64 = 100;

#[derive(Debug)]
pub struct ConfirmWithdrawalsHandler {
    store: WithdrawalStore,
    spot_orders: SpotOrderStore,
    queue: JobQueue,
    ledger: Arc<dyn LedgerClient>,
    interval: Duration,
}

impl ConfirmWithdrawalsHandler {
    pub fn new(
        store: WithdrawalStore,
        spot_orders: SpotOrderStore,
        queue: JobQueue,
        ledger: Arc<dyn LedgerClient>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            spot_orders,
            queue,
            ledger,
            interval,
        }
    }

    /// One sweep. Public so tests can drive it without the queue.
    pub async fn sweep(&self) -> Result<(), WithdrawalError> {
        let recovered = self
            .store
            .requeue_stale_processing(STALE_PROCESSING_AFTER)
            .await?;
        for id in recovered {
            warn!(withdrawal_id = %id, "Recovered stale processing withdrawal");
            self.queue
                .enqueue(
                    JOB_PROCESS_WITHDRAWAL,
                    json!({ "withdrawal_id": id }),
                    Utc::now(),
                    5,
                )
                .await?;
        }

        let pending = self.store.list_unconfirmed(SWEEP_BATCH).await?;
        if !pending.is_empty() {
            debug!(count = pending.len(), "Checking unconfirmed withdrawals");
        }
        for withdrawal in pending {
            if let Err(e) = self.check_one(&withdrawal).await {
                warn!(
                    withdrawal_id = %withdrawal.id,
                    error = %e,
                    "Confirmation check failed"
                );
            }
        }
        Ok(())
    }

    async fn check_one(&self, withdrawal: &Withdrawal) -> Result<(), WithdrawalError> {
        let Some(tx_id) = withdrawal.ledger_tx_id.as_deref() else {
            return Ok(());
        };
        self.store.mark_checked(withdrawal.id).await?;

        let status = self.ledger.fetch_status(tx_id).await?;
        match status.state {
            LedgerTxState::Pending => {}
            LedgerTxState::Confirmed => {
                if withdrawal.status == WithdrawalStatus::Sent {
                    self.store
                        .update_status_if(
                            withdrawal.id,
                            WithdrawalStatus::Sent,
                            WithdrawalStatus::Confirmed,
                        )
                        .await?;
                }
                if let Some(hash) = status.on_chain_hash.as_deref() {
                    self.store.set_on_chain_tx(withdrawal.id, hash).await?;
                }
                // Downstream effects land before the terminal flip, so
                // a crash in between replays them idempotently.
                self.apply_release_success(withdrawal).await?;
                if self
                    .store
                    .update_status_if(
                        withdrawal.id,
                        WithdrawalStatus::Confirmed,
                        WithdrawalStatus::Completed,
                    )
                    .await?
                {
                    info!(
                        withdrawal_id = %withdrawal.id,
                        kind = %withdrawal.kind,
                        amount = %withdrawal.amount,
                        "Withdrawal completed"
                    );
                }
            }
            LedgerTxState::Failed => {
                if self
                    .store
                    .mark_failed(withdrawal.id, "transfer failed on ledger")
                    .await?
                {
                    warn!(withdrawal_id = %withdrawal.id, "Withdrawal failed on ledger");
                    self.apply_release_failure(withdrawal).await?;
                }
            }
            LedgerTxState::Returned => {
                if self.store.mark_refunded(withdrawal.id).await? {
                    warn!(withdrawal_id = %withdrawal.id, "Withdrawal returned by ledger");
                    self.apply_release_failure(withdrawal).await?;
                }
            }
        }
        Ok(())
    }

    /// A completed release unblocks the spot order waiting on it.
    async fn apply_release_success(&self, withdrawal: &Withdrawal) -> Result<(), WithdrawalError> {
        if withdrawal.kind != WithdrawalKind::Release {
            return Ok(());
        }
        let Some(snapshot_id) = withdrawal.snapshot_id else {
            return Ok(());
        };
        if self
            .spot_orders
            .mark_released_by_snapshot(snapshot_id)
            .await?
        {
            info!(snapshot_id = %snapshot_id, "Spot order released");
        }
        Ok(())
    }

    async fn apply_release_failure(&self, withdrawal: &Withdrawal) -> Result<(), WithdrawalError> {
        if withdrawal.kind != WithdrawalKind::Release {
            return Ok(());
        }
        let Some(snapshot_id) = withdrawal.snapshot_id else {
            return Ok(());
        };
        if self
            .spot_orders
            .mark_release_failed_by_snapshot(snapshot_id)
            .await?
        {
            warn!(snapshot_id = %snapshot_id, "Spot order release failed");
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ConfirmWithdrawalsHandler {
    fn kind(&self) -> &str {
        JOB_CONFIRM_WITHDRAWALS
    }

    async fn run(&self, _job: &Job) -> Result<(), JobError> {
        self.sweep().await?;

        // Re-enqueue last so a crash mid-sweep retries this job instead
        // of leaving a gap in the chain.
        let next_at = Utc::now()
            + chrono::Duration::from_std(self.interval)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
        self.queue
            .enqueue(JOB_CONFIRM_WITHDRAWALS, json!({}), next_at, 5)
            .await?;
        Ok(())
    }
}
