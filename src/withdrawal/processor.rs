//! Withdrawal Processing Handler
//!
//! Consumes `process_withdrawal` jobs. Exactly-once submission rests on
//! two gates: an in-process set screens duplicate dispatch cheaply, and
//! the database claim is the authoritative one.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clients::LedgerClient;
use crate::jobs::{Job, JobError, JobHandler};

use super::error::WithdrawalError;
use super::store::WithdrawalStore;
use super::types::{Withdrawal, WithdrawalStatus};
use super::JOB_PROCESS_WITHDRAWAL;

/// Attempts per withdrawal row before it parks as failed.
pub const MAX_TRANSFER_RETRIES: i32 = 3;

#[derive(Debug, Deserialize)]
struct ProcessPayload {
    withdrawal_id: Uuid,
}

#[derive(Debug)]
pub struct ProcessWithdrawalHandler {
    store: WithdrawalStore,
    ledger: Arc<dyn LedgerClient>,
    in_flight: Arc<DashMap<Uuid, ()>>,
    max_retries: i32,
}

/// Removes the in-flight marker when the attempt ends, on any path.
struct InFlightGuard {
    map: Arc<DashMap<Uuid, ()>>,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

impl ProcessWithdrawalHandler {
    pub fn new(store: WithdrawalStore, ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            store,
            ledger,
            in_flight: Arc::new(DashMap::new()),
            max_retries: MAX_TRANSFER_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    async fn process(&self, id: Uuid) -> Result<(), JobError> {
        if !self.store.claim(id).await? {
            debug!(withdrawal_id = %id, "Withdrawal not claimable, skipping");
            return Ok(());
        }
        let Some(withdrawal) = self.store.get(id).await? else {
            warn!(withdrawal_id = %id, "Claimed withdrawal vanished");
            return Ok(());
        };

        match self.ledger.fetch_balance(withdrawal.asset_id).await {
            Ok(balance) if balance < withdrawal.amount => {
                return self
                    .retry(
                        &withdrawal,
                        &format!(
                            "insufficient balance: have {balance}, need {}",
                            withdrawal.amount
                        ),
                    )
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                return self
                    .retry(&withdrawal, &format!("balance check failed: {e}"))
                    .await;
            }
        }

        let opponent_id = match Uuid::parse_str(&withdrawal.destination) {
            Ok(id) => id,
            Err(_) => {
                // Malformed destinations never heal; park immediately.
                let err = WithdrawalError::BadDestination(withdrawal.destination.clone());
                error!(withdrawal_id = %id, error = %err, "Withdrawal failed");
                self.store.mark_failed(id, &err.to_string()).await?;
                return Ok(());
            }
        };

        match self
            .ledger
            .transfer(
                opponent_id,
                withdrawal.asset_id,
                withdrawal.amount,
                &withdrawal.memo,
            )
            .await
        {
            Ok(receipts) => match receipts.first() {
                Some(receipt) => {
                    self.store.mark_sent(id, &receipt.request_id).await?;
                    info!(
                        withdrawal_id = %id,
                        ledger_tx_id = %receipt.request_id,
                        amount = %withdrawal.amount,
                        "Withdrawal sent"
                    );
                    Ok(())
                }
                None => {
                    error!(withdrawal_id = %id, "Ledger returned no receipts");
                    self.store.mark_failed(id, "ledger returned no receipts").await?;
                    Ok(())
                }
            },
            Err(e) => self.retry(&withdrawal, &format!("transfer failed: {e}")).await,
        }
    }

    /// Count the attempt on the row. While the budget holds, surface a
    /// handler error so the job requeues with backoff; once the row
    /// parks as failed the job is done.
    async fn retry(&self, withdrawal: &Withdrawal, error: &str) -> Result<(), JobError> {
        match self
            .store
            .record_retry(withdrawal.id, error, self.max_retries)
            .await?
        {
            Some(WithdrawalStatus::Failed) => {
                error!(
                    withdrawal_id = %withdrawal.id,
                    retries = withdrawal.retry_count + 1,
                    error,
                    "Withdrawal exhausted retries"
                );
                Ok(())
            }
            Some(_) => {
                warn!(withdrawal_id = %withdrawal.id, error, "Withdrawal attempt failed, will retry");
                Err(JobError::Handler(error.to_string()))
            }
            None => {
                warn!(withdrawal_id = %withdrawal.id, "Withdrawal left processing mid-attempt");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl JobHandler for ProcessWithdrawalHandler {
    fn kind(&self) -> &str {
        JOB_PROCESS_WITHDRAWAL
    }

    async fn run(&self, job: &Job) -> Result<(), JobError> {
        let payload: ProcessPayload = serde_json::from_value(job.payload.clone())?;
        let id = payload.withdrawal_id;

        if self.in_flight.insert(id, ()).is_some() {
            debug!(withdrawal_id = %id, "Withdrawal already in flight");
            return Ok(());
        }
        let _guard = InFlightGuard {
            map: self.in_flight.clone(),
            id,
        };

        self.process(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MockLedger;
    use crate::db::tests::create_test_pool;
    use crate::jobs::JobStatus;
    use crate::withdrawal::types::{NewWithdrawal, WithdrawalKind};
    use chrono::Utc;
    use rust_decimal::Decimal;

    async fn seed_withdrawal(store: &WithdrawalStore, destination: String) -> Uuid {
        WithdrawalStore::insert(
            store.pool(),
            &NewWithdrawal {
                user_id: Uuid::new_v4(),
                asset_id: Uuid::new_v4(),
                amount: Decimal::from(5),
                destination,
                destination_tag: None,
                kind: WithdrawalKind::Refund,
                memo: "refund: test".to_string(),
                snapshot_id: Some(Uuid::new_v4()),
            },
        )
        .await
        .unwrap()
        .unwrap()
    }

    fn job_for(id: Uuid) -> Job {
        Job {
            id: Uuid::new_v4(),
            kind: JOB_PROCESS_WITHDRAWAL.to_string(),
            payload: serde_json::json!({ "withdrawal_id": id }),
            status: JobStatus::Running,
            run_at: Utc::now(),
            attempts: 1,
            max_attempts: 5,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_process_sends_transfer_once() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = WithdrawalStore::new(pool);
        let ledger = Arc::new(MockLedger::new());
        let handler = ProcessWithdrawalHandler::new(store.clone(), ledger.clone());

        let destination = Uuid::new_v4().to_string();
        let id = seed_withdrawal(&store, destination.clone()).await;
        let job = job_for(id);

        // concurrent dispatch of the same withdrawal
        let (a, b) = tokio::join!(handler.run(&job), handler.run(&job));
        a.unwrap();
        b.unwrap();

        assert_eq!(ledger.transfer_count(), 1);
        let w = store.get(id).await.unwrap().unwrap();
        assert_eq!(w.status, WithdrawalStatus::Sent);
        assert!(w.ledger_tx_id.is_some());

        let transfers = ledger.transfers();
        assert_eq!(transfers[0].opponent_id.to_string(), destination);
        assert_eq!(transfers[0].memo, "refund: test");
    }

    #[tokio::test]
    async fn test_bad_destination_parks_immediately() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = WithdrawalStore::new(pool);
        let ledger = Arc::new(MockLedger::new());
        let handler = ProcessWithdrawalHandler::new(store.clone(), ledger.clone());

        let id = seed_withdrawal(&store, "not-a-uuid".to_string()).await;
        handler.run(&job_for(id)).await.unwrap();

        assert_eq!(ledger.transfer_count(), 0);
        let w = store.get(id).await.unwrap().unwrap();
        assert_eq!(w.status, WithdrawalStatus::Failed);
        assert!(w.error_message.unwrap().contains("not-a-uuid"));
    }

    #[tokio::test]
    async fn test_transfer_errors_exhaust_retry_budget() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = WithdrawalStore::new(pool);
        let ledger = Arc::new(MockLedger::new());
        ledger.set_fail_transfer(true);
        let handler = ProcessWithdrawalHandler::new(store.clone(), ledger.clone());

        let id = seed_withdrawal(&store, Uuid::new_v4().to_string()).await;
        let job = job_for(id);

        // first two attempts requeue the row, the third parks it
        assert!(handler.run(&job).await.is_err());
        assert!(handler.run(&job).await.is_err());
        handler.run(&job).await.unwrap();

        let w = store.get(id).await.unwrap().unwrap();
        assert_eq!(w.status, WithdrawalStatus::Failed);
        assert_eq!(w.retry_count, 3);

        // a parked row is no longer claimable
        handler.run(&job).await.unwrap();
        let w = store.get(id).await.unwrap().unwrap();
        assert_eq!(w.retry_count, 3);
    }

    #[tokio::test]
    async fn test_empty_receipts_park_as_failed() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = WithdrawalStore::new(pool);
        let ledger = Arc::new(MockLedger::new());
        ledger.set_empty_transfer(true);
        let handler = ProcessWithdrawalHandler::new(store.clone(), ledger.clone());

        let id = seed_withdrawal(&store, Uuid::new_v4().to_string()).await;
        handler.run(&job_for(id)).await.unwrap();

        let w = store.get(id).await.unwrap().unwrap();
        assert_eq!(w.status, WithdrawalStatus::Failed);
    }
}
