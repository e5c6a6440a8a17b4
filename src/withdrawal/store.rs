//! Withdrawal persistence. Every status move is a CAS update; callers
//! branch on the returned bool instead of trusting in-memory state.

use std::time::Duration;

use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use crate::core_types::SnapshotId;

use super::error::WithdrawalError;
use super::types::{NewWithdrawal, Withdrawal, WithdrawalKind, WithdrawalStatus};

#[derive(Debug, Clone)]
pub struct WithdrawalStore {
    pool: PgPool,
}

impl WithdrawalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a withdrawal in `pending`. Returns None when a withdrawal
    /// for the same snapshot already exists (duplicate trigger).
    pub async fn insert<'e>(
        exec: impl PgExecutor<'e>,
        new: &NewWithdrawal,
    ) -> Result<Option<Uuid>, WithdrawalError> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO withdrawals
                (id, user_id, amount, asset_id, destination, destination_tag,
                 kind, memo, status, snapshot_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9)
            ON CONFLICT (snapshot_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(new.amount)
        .bind(new.asset_id)
        .bind(&new.destination)
        .bind(&new.destination_tag)
        .bind(new.kind.as_str())
        .bind(&new.memo)
        .bind(new.snapshot_id)
        .fetch_optional(exec)
        .await?;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Withdrawal>, WithdrawalError> {
        let row = sqlx::query("SELECT * FROM withdrawals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_withdrawal(&r)).transpose()
    }

    pub async fn get_by_snapshot(
        &self,
        snapshot_id: SnapshotId,
    ) -> Result<Option<Withdrawal>, WithdrawalError> {
        let row = sqlx::query("SELECT * FROM withdrawals WHERE snapshot_id = $1")
            .bind(snapshot_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_withdrawal(&r)).transpose()
    }

    /// Claim for processing. False means another worker owns the row or
    /// it already moved on.
    pub async fn claim(&self, id: Uuid) -> Result<bool, WithdrawalError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = 'processing', updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'queued')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record the accepted ledger transfer.
    pub async fn mark_sent(&self, id: Uuid, ledger_tx_id: &str) -> Result<bool, WithdrawalError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = 'sent', ledger_tx_id = $1, error_message = NULL, updated_at = NOW()
            WHERE id = $2 AND status = 'processing'
            "#,
        )
        .bind(ledger_tx_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count a failed attempt. Requeues while under `max_retries`,
    /// otherwise parks the row as failed. Returns the resulting status.
    pub async fn record_retry(
        &self,
        id: Uuid,
        error: &str,
        max_retries: i32,
    ) -> Result<Option<WithdrawalStatus>, WithdrawalError> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE withdrawals
            SET retry_count = retry_count + 1,
                status = CASE WHEN retry_count + 1 >= $2 THEN 'failed' ELSE 'queued' END,
                error_message = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(max_retries)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        match status {
            Some(s) => WithdrawalStatus::from_name(&s)
                .map(Some)
                .ok_or(WithdrawalError::UnknownStatus(s)),
            None => Ok(None),
        }
    }

    /// Park as failed from any non-terminal status.
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool, WithdrawalError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = 'failed', error_message = $1, updated_at = NOW()
            WHERE id = $2 AND status NOT IN ('completed', 'failed', 'refunded')
            "#,
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The transfer bounced back from the receiving side.
    pub async fn mark_refunded(&self, id: Uuid) -> Result<bool, WithdrawalError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = 'refunded', updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed', 'refunded')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_status_if(
        &self,
        id: Uuid,
        expected: WithdrawalStatus,
        new: WithdrawalStatus,
    ) -> Result<bool, WithdrawalError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(new.as_str())
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_on_chain_tx(&self, id: Uuid, hash: &str) -> Result<(), WithdrawalError> {
        sqlx::query(
            "UPDATE withdrawals SET on_chain_tx_id = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stamp the confirmation sweep visit without touching status.
    pub async fn mark_checked(&self, id: Uuid) -> Result<(), WithdrawalError> {
        sqlx::query("UPDATE withdrawals SET last_checked_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rows the confirmation sweep has to look at.
    pub async fn list_unconfirmed(&self, limit: i64) -> Result<Vec<Withdrawal>, WithdrawalError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM withdrawals
            WHERE status IN ('sent', 'confirmed') AND ledger_tx_id IS NOT NULL
            ORDER BY updated_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_withdrawal).collect()
    }

    /// Recovery sweep: rows stuck in `processing` without a recorded
    /// transfer go back to `queued` so a fresh job can pick them up.
    pub async fn requeue_stale_processing(
        &self,
        older_than: Duration,
    ) -> Result<Vec<Uuid>, WithdrawalError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE withdrawals
            SET status = 'queued', updated_at = NOW()
            WHERE status = 'processing'
              AND ledger_tx_id IS NULL
              AND updated_at < NOW() - INTERVAL '1 second' * $1
            RETURNING id
            "#,
        )
        .bind(older_than.as_secs() as f64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

fn row_to_withdrawal(row: &PgRow) -> Result<Withdrawal, WithdrawalError> {
    let status_name: String = row.get("status");
    let status = WithdrawalStatus::from_name(&status_name)
        .ok_or(WithdrawalError::UnknownStatus(status_name))?;

    let kind_name: String = row.get("kind");
    let kind = WithdrawalKind::from_name(&kind_name)
        .ok_or(WithdrawalError::UnknownStatus(kind_name))?;

    Ok(Withdrawal {
        id: row.get("id"),
        user_id: row.get("user_id"),
        amount: row.get("amount"),
        asset_id: row.get("asset_id"),
        destination: row.get("destination"),
        destination_tag: row.get("destination_tag"),
        kind,
        memo: row.get("memo"),
        status,
        retry_count: row.get("retry_count"),
        ledger_tx_id: row.get("ledger_tx_id"),
        on_chain_tx_id: row.get("on_chain_tx_id"),
        error_message: row.get("error_message"),
        snapshot_id: row.get("snapshot_id"),
        last_checked_at: row.get("last_checked_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::create_test_pool;
    use rust_decimal::Decimal;

    fn sample(snapshot_id: Option<SnapshotId>) -> NewWithdrawal {
        let user = Uuid::new_v4();
        NewWithdrawal {
            user_id: user,
            asset_id: Uuid::new_v4(),
            amount: Decimal::from(10),
            destination: user.to_string(),
            destination_tag: None,
            kind: WithdrawalKind::Refund,
            memo: "refund: unknown trading pair".to_string(),
            snapshot_id,
        }
    }

    #[tokio::test]
    async fn test_snapshot_idempotency() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let snapshot = Some(Uuid::new_v4());
        let first = WithdrawalStore::insert(&pool, &sample(snapshot)).await.unwrap();
        assert!(first.is_some());

        let second = WithdrawalStore::insert(&pool, &sample(snapshot)).await.unwrap();
        assert!(second.is_none());

        // no snapshot, no dedupe
        let a = WithdrawalStore::insert(&pool, &sample(None)).await.unwrap();
        let b = WithdrawalStore::insert(&pool, &sample(None)).await.unwrap();
        assert!(a.is_some() && b.is_some());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = WithdrawalStore::new(pool.clone());
        let id = WithdrawalStore::insert(&pool, &sample(None))
            .await
            .unwrap()
            .unwrap();

        assert!(store.claim(id).await.unwrap());
        assert!(!store.claim(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_retry_budget() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = WithdrawalStore::new(pool.clone());
        let id = WithdrawalStore::insert(&pool, &sample(None))
            .await
            .unwrap()
            .unwrap();

        for expected in [WithdrawalStatus::Queued, WithdrawalStatus::Queued] {
            assert!(store.claim(id).await.unwrap());
            let status = store.record_retry(id, "net down", 3).await.unwrap().unwrap();
            assert_eq!(status, expected);
        }

        assert!(store.claim(id).await.unwrap());
        let status = store.record_retry(id, "net down", 3).await.unwrap().unwrap();
        assert_eq!(status, WithdrawalStatus::Failed);

        // terminal; cannot claim again
        assert!(!store.claim(id).await.unwrap());
        let w = store.get(id).await.unwrap().unwrap();
        assert_eq!(w.retry_count, 3);
        assert_eq!(w.error_message.as_deref(), Some("net down"));
    }

    #[tokio::test]
    async fn test_sent_and_confirmation_path() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = WithdrawalStore::new(pool.clone());
        let id = WithdrawalStore::insert(&pool, &sample(None))
            .await
            .unwrap()
            .unwrap();

        store.claim(id).await.unwrap();
        assert!(store.mark_sent(id, "tx-123").await.unwrap());

        let unconfirmed = store.list_unconfirmed(100).await.unwrap();
        assert!(unconfirmed.iter().any(|w| w.id == id));

        assert!(
            store
                .update_status_if(id, WithdrawalStatus::Sent, WithdrawalStatus::Confirmed)
                .await
                .unwrap()
        );
        store.set_on_chain_tx(id, "0xabc").await.unwrap();
        assert!(
            store
                .update_status_if(id, WithdrawalStatus::Confirmed, WithdrawalStatus::Completed)
                .await
                .unwrap()
        );

        let w = store.get(id).await.unwrap().unwrap();
        assert_eq!(w.status, WithdrawalStatus::Completed);
        assert_eq!(w.on_chain_tx_id.as_deref(), Some("0xabc"));
        assert_eq!(w.ledger_tx_id.as_deref(), Some("tx-123"));
    }

    #[tokio::test]
    async fn test_stale_processing_recovery() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = WithdrawalStore::new(pool.clone());
        let id = WithdrawalStore::insert(&pool, &sample(None))
            .await
            .unwrap()
            .unwrap();
        store.claim(id).await.unwrap();

        // too fresh to recover
        let recovered = store
            .requeue_stale_processing(Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!recovered.contains(&id));

        sqlx::query(
            "UPDATE withdrawals SET updated_at = NOW() - INTERVAL '10 minutes' WHERE id = $1",
        )
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();

        let recovered = store
            .requeue_stale_processing(Duration::from_secs(60))
            .await
            .unwrap();
        assert!(recovered.contains(&id));
        assert!(store.claim(id).await.unwrap());
    }
}
