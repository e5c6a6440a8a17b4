//! Settlement Listener
//!
//! Polls the settlement network for deposit snapshots, dedupes them
//! against `processed_snapshots`, decodes each memo and routes the
//! deposit: binary memos go to payment reconciliation, spot text memos
//! go to the exchange intake, anything unreadable is refunded verbatim.
//! The poll cursor only advances after a whole batch was handled.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};

use crate::core_types::SnapshotId;
use crate::execution::SpotIntake;
use crate::memo::{Memo, TradingType};
use crate::reconcile::ReconcileEngine;
use crate::withdrawal::WithdrawalService;

use super::ListenerError;
use super::snapshot::{SettlementCursor, Snapshot};
use super::source::SnapshotSource;

const DEFAULT_BATCH_LIMIT: u32 = 100;

pub struct SettlementListener {
    pool: PgPool,
    source: Arc<dyn SnapshotSource>,
    engine: ReconcileEngine,
    intake: SpotIntake,
    withdrawals: WithdrawalService,
    source_id: String,
    poll_interval: Duration,
    batch_limit: u32,
}

impl SettlementListener {
    pub fn new(
        pool: PgPool,
        source: Arc<dyn SnapshotSource>,
        engine: ReconcileEngine,
        intake: SpotIntake,
        source_id: &str,
        poll_interval: Duration,
    ) -> Self {
        Self {
            withdrawals: WithdrawalService::new(pool.clone()),
            pool,
            source,
            engine,
            intake,
            source_id: source_id.to_string(),
            poll_interval,
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    pub fn set_batch_limit(&mut self, limit: u32) {
        self.batch_limit = limit;
    }

    pub async fn run(&self) {
        info!(
            source_id = %self.source_id,
            poll_interval = ?self.poll_interval,
            "Settlement listener starting"
        );
        loop {
            match self.poll_once().await {
                Ok(0) => {}
                Ok(handled) => debug!(count = handled, "Settlement batch handled"),
                Err(e) => error!(error = %e, "Settlement poll failed"),
            }
            sleep(self.poll_interval).await;
        }
    }

    /// One poll cycle. Returns how many snapshots were newly processed;
    /// duplicates and outbound transfers do not count.
    pub async fn poll_once(&self) -> Result<usize, ListenerError> {
        let after = match self.get_cursor().await? {
            Some(cursor) => cursor.last_created_at,
            None => DateTime::UNIX_EPOCH,
        };

        let snapshots = self.source.poll(after, self.batch_limit).await?;
        if snapshots.is_empty() {
            return Ok(0);
        }

        let mut handled = 0;
        for snapshot in &snapshots {
            match self.handle_snapshot(snapshot).await {
                Ok(true) => handled += 1,
                Ok(false) => {}
                Err(e) => {
                    // The snapshot is already recorded as seen; losing
                    // its effects here needs an operator, not a retry
                    // storm on every later poll.
                    error!(
                        snapshot_id = %snapshot.snapshot_id,
                        error = %e,
                        "Snapshot handling failed"
                    );
                }
            }
        }

        if let Some(last) = snapshots.last() {
            self.update_cursor(last.created_at, last.snapshot_id).await?;
        }
        Ok(handled)
    }

    /// Route one snapshot. True means it was seen for the first time and
    /// dispatched.
    async fn handle_snapshot(&self, snapshot: &Snapshot) -> Result<bool, ListenerError> {
        let Some(amount) = snapshot.parse_amount().filter(|a| *a > Decimal::ZERO) else {
            // Outbound transfers (our own refunds and releases) come back
            // through the same feed with negative amounts.
            debug!(snapshot_id = %snapshot.snapshot_id, "Skipping non-deposit snapshot");
            return Ok(false);
        };

        if !self.record_seen(snapshot, amount).await? {
            debug!(snapshot_id = %snapshot.snapshot_id, "Duplicate snapshot delivery, skipping");
            return Ok(false);
        }

        match Memo::decode(&snapshot.memo) {
            Ok(Memo::Binary(payload)) => {
                let outcome = self.engine.process(snapshot, &payload).await?;
                info!(
                    snapshot_id = %snapshot.snapshot_id,
                    trading_type = %payload.trading_type,
                    outcome = ?outcome,
                    "Deposit reconciled"
                );
            }
            Ok(Memo::Text(text)) => {
                if text.trading_type == TradingType::Spot {
                    let outcome = self.intake.handle(snapshot, &text).await?;
                    info!(
                        snapshot_id = %snapshot.snapshot_id,
                        outcome = ?outcome,
                        "Spot memo handled"
                    );
                } else {
                    self.refund(snapshot, amount, "text memo for unsupported strategy")
                        .await?;
                }
            }
            Err(_) => {
                self.refund(snapshot, amount, "unreadable memo").await?;
            }
        }
        Ok(true)
    }

    /// Dedupe insert. False means this snapshot was already handled.
    async fn record_seen(
        &self,
        snapshot: &Snapshot,
        amount: Decimal,
    ) -> Result<bool, ListenerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_snapshots
                (snapshot_id, trace_id, asset_id, amount, opponent_id, memo, snapshot_created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(snapshot.snapshot_id)
        .bind(snapshot.trace_id)
        .bind(snapshot.asset_id)
        .bind(amount)
        .bind(snapshot.opponent_id)
        .bind(&snapshot.memo)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn refund(
        &self,
        snapshot: &Snapshot,
        amount: Decimal,
        reason: &str,
    ) -> Result<(), ListenerError> {
        warn!(
            snapshot_id = %snapshot.snapshot_id,
            reason,
            "Refunding unroutable deposit"
        );
        self.withdrawals
            .request_refund(
                snapshot.opponent_id,
                snapshot.asset_id,
                amount,
                snapshot.snapshot_id,
                reason,
            )
            .await?;
        Ok(())
    }

    async fn get_cursor(&self) -> Result<Option<SettlementCursor>, ListenerError> {
        let row = sqlx::query(
            r#"SELECT source_id, last_created_at, last_snapshot_id
               FROM settlement_cursor WHERE source_id = $1"#,
        )
        .bind(&self.source_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| SettlementCursor {
            source_id: r.get("source_id"),
            last_created_at: r.get("last_created_at"),
            last_snapshot_id: r.get("last_snapshot_id"),
        }))
    }

    async fn update_cursor(
        &self,
        last_created_at: DateTime<Utc>,
        last_snapshot_id: SnapshotId,
    ) -> Result<(), ListenerError> {
        sqlx::query(
            r#"INSERT INTO settlement_cursor (source_id, last_created_at, last_snapshot_id)
               VALUES ($1, $2, $3)
               ON CONFLICT (source_id) DO UPDATE
               SET last_created_at = EXCLUDED.last_created_at,
                   last_snapshot_id = EXCLUDED.last_snapshot_id,
                   updated_at = NOW()"#,
        )
        .bind(&self.source_id)
        .bind(last_created_at)
        .bind(last_snapshot_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
