//! Withdrawal intake. Creates the row and its processing job in one
//! transaction so a crash between the two cannot strand either side.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::core_types::{AssetId, SnapshotId, UserId};
use crate::jobs::JobQueue;

use super::error::WithdrawalError;
use super::store::WithdrawalStore;
use super::types::{NewWithdrawal, WithdrawalKind};
use super::JOB_PROCESS_WITHDRAWAL;

/// Job attempts exceed the withdrawal retry budget so the row, not the
/// queue, decides when the pipeline gives up.
const PROCESS_JOB_MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone)]
pub struct WithdrawalService {
    pool: PgPool,
}

impl WithdrawalService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a withdrawal and enqueue its processing job atomically.
    /// Returns None when the snapshot already triggered one.
    pub async fn request(&self, new: NewWithdrawal) -> Result<Option<Uuid>, WithdrawalError> {
        let mut tx = self.pool.begin().await?;
        let id = WithdrawalStore::insert(&mut *tx, &new).await?;
        if let Some(id) = id {
            JobQueue::enqueue_with(
                &mut *tx,
                JOB_PROCESS_WITHDRAWAL,
                json!({ "withdrawal_id": id }),
                Utc::now(),
                PROCESS_JOB_MAX_ATTEMPTS,
            )
            .await?;
        }
        tx.commit().await?;

        match id {
            Some(id) => {
                info!(
                    withdrawal_id = %id,
                    kind = %new.kind,
                    amount = %new.amount,
                    "Withdrawal queued"
                );
            }
            None => {
                info!(
                    snapshot_id = ?new.snapshot_id,
                    "Withdrawal already exists for snapshot, skipping"
                );
            }
        }
        Ok(id)
    }

    /// Bounce a deposit back to its sender with an explanatory memo.
    pub async fn request_refund(
        &self,
        user_id: UserId,
        asset_id: AssetId,
        amount: Decimal,
        snapshot_id: SnapshotId,
        reason: &str,
    ) -> Result<Option<Uuid>, WithdrawalError> {
        self.request(NewWithdrawal {
            user_id,
            asset_id,
            amount,
            destination: user_id.to_string(),
            destination_tag: None,
            kind: WithdrawalKind::Refund,
            memo: format!("refund: {reason}"),
            snapshot_id: Some(snapshot_id),
        })
        .await
    }

    /// Release strategy proceeds back to the user. `snapshot_id` keys
    /// idempotency when the release corresponds to one deposit leg.
    pub async fn request_release(
        &self,
        user_id: UserId,
        asset_id: AssetId,
        amount: Decimal,
        snapshot_id: Option<SnapshotId>,
        reward_tag: Option<String>,
        memo: &str,
    ) -> Result<Option<Uuid>, WithdrawalError> {
        self.request(NewWithdrawal {
            user_id,
            asset_id,
            amount,
            destination: user_id.to_string(),
            destination_tag: reward_tag,
            kind: WithdrawalKind::Release,
            memo: memo.to_string(),
            snapshot_id,
        })
        .await
    }
}
