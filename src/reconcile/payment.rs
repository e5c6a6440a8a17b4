//! Payment State Store
//!
//! One row per funded order id, legs recorded in arrival order. Rows
//! are append-then-complete: the base leg inserts the row, the quote
//! leg completes it, and nothing ever deletes it.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction};

use crate::core_types::{AssetId, OrderId, SnapshotId};
use crate::memo::TradingType;

use super::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Created,
    Completed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::Completed => "completed",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "created" => Some(PaymentStatus::Created),
            "completed" => Some(PaymentStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PaymentState {
    pub order_id: OrderId,
    pub order_type: TradingType,
    pub symbol: String,
    /// First leg to arrive, whichever pair asset it carried.
    pub base_asset_id: AssetId,
    pub base_asset_amount: Decimal,
    pub base_asset_snapshot_id: SnapshotId,
    pub quote_asset_id: Option<AssetId>,
    pub quote_asset_amount: Option<Decimal>,
    pub quote_asset_snapshot_id: Option<SnapshotId>,
    pub base_fee_asset_id: Option<AssetId>,
    pub base_fee_amount: Option<Decimal>,
    pub quote_fee_asset_id: Option<AssetId>,
    pub quote_fee_amount: Option<Decimal>,
    pub required_base_withdrawal_fee: Decimal,
    pub required_quote_withdrawal_fee: Decimal,
    pub required_market_making_fee: Decimal,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentState {
    pub fn has_quote_leg(&self) -> bool {
        self.quote_asset_snapshot_id.is_some()
    }

    /// Deposited amount for one of the pair's assets, across both legs.
    pub fn amount_for(&self, asset_id: AssetId) -> Option<Decimal> {
        if self.base_asset_id == asset_id {
            return Some(self.base_asset_amount);
        }
        if self.quote_asset_id == Some(asset_id) {
            return self.quote_asset_amount;
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct PaymentStateStore {
    pool: PgPool,
}

impl PaymentStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the row with its first leg. `status` is `completed` for
    /// single-leg strategies. False means the row already exists.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_base_leg<'e>(
        exec: impl PgExecutor<'e>,
        order_id: OrderId,
        order_type: TradingType,
        symbol: &str,
        asset_id: AssetId,
        amount: Decimal,
        snapshot_id: SnapshotId,
        status: PaymentStatus,
    ) -> Result<bool, ReconcileError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_states
                (order_id, order_type, symbol, base_asset_id, base_asset_amount,
                 base_asset_snapshot_id, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order_id)
        .bind(order_type.as_str())
        .bind(symbol)
        .bind(asset_id)
        .bind(amount)
        .bind(snapshot_id)
        .bind(status.as_str())
        .execute(exec)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Lock the row for the duration of the caller's transaction. Leg
    /// ordering is decided inside this critical section.
    pub async fn get_for_update(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
    ) -> Result<Option<PaymentState>, ReconcileError> {
        let row = sqlx::query("SELECT * FROM payment_states WHERE order_id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(|r| row_to_state(&r)).transpose()
    }

    /// Fill the quote leg and complete the row. False when the quote
    /// leg is already set or the row is gone.
    pub async fn fill_quote_leg<'e>(
        exec: impl PgExecutor<'e>,
        order_id: OrderId,
        asset_id: AssetId,
        amount: Decimal,
        snapshot_id: SnapshotId,
    ) -> Result<bool, ReconcileError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_states
            SET quote_asset_id = $2,
                quote_asset_amount = $3,
                quote_asset_snapshot_id = $4,
                state = 'completed',
                updated_at = NOW()
            WHERE order_id = $1 AND quote_asset_snapshot_id IS NULL AND state = 'created'
            "#,
        )
        .bind(order_id)
        .bind(asset_id)
        .bind(amount)
        .bind(snapshot_id)
        .execute(exec)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, order_id: OrderId) -> Result<Option<PaymentState>, ReconcileError> {
        let row = sqlx::query("SELECT * FROM payment_states WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_state(&r)).transpose()
    }
}

fn row_to_state(row: &PgRow) -> Result<PaymentState, ReconcileError> {
    let type_name: String = row.get("order_type");
    let order_type = TradingType::from_name(&type_name)
        .ok_or_else(|| ReconcileError::UnknownState(type_name))?;

    let status_name: String = row.get("state");
    let status = PaymentStatus::from_name(&status_name)
        .ok_or(ReconcileError::UnknownState(status_name))?;

    Ok(PaymentState {
        order_id: row.get("order_id"),
        order_type,
        symbol: row.get("symbol"),
        base_asset_id: row.get("base_asset_id"),
        base_asset_amount: row.get("base_asset_amount"),
        base_asset_snapshot_id: row.get("base_asset_snapshot_id"),
        quote_asset_id: row.get("quote_asset_id"),
        quote_asset_amount: row.get("quote_asset_amount"),
        quote_asset_snapshot_id: row.get("quote_asset_snapshot_id"),
        base_fee_asset_id: row.get("base_fee_asset_id"),
        base_fee_amount: row.get("base_fee_amount"),
        quote_fee_asset_id: row.get("quote_fee_asset_id"),
        quote_fee_amount: row.get("quote_fee_amount"),
        required_base_withdrawal_fee: row.get("required_base_withdrawal_fee"),
        required_quote_withdrawal_fee: row.get("required_quote_withdrawal_fee"),
        required_market_making_fee: row.get("required_market_making_fee"),
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::create_test_pool;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_base_leg_insert_is_idempotent() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = PaymentStateStore::new(pool.clone());
        let order_id = Uuid::new_v4();

        let inserted = PaymentStateStore::insert_base_leg(
            &pool,
            order_id,
            TradingType::Arbitrage,
            "BTC/USDT",
            Uuid::new_v4(),
            Decimal::from(10),
            Uuid::new_v4(),
            PaymentStatus::Created,
        )
        .await
        .unwrap();
        assert!(inserted);

        let again = PaymentStateStore::insert_base_leg(
            &pool,
            order_id,
            TradingType::Arbitrage,
            "BTC/USDT",
            Uuid::new_v4(),
            Decimal::from(99),
            Uuid::new_v4(),
            PaymentStatus::Created,
        )
        .await
        .unwrap();
        assert!(!again);

        let state = store.get(order_id).await.unwrap().unwrap();
        assert_eq!(state.base_asset_amount, Decimal::from(10));
        assert_eq!(state.status, PaymentStatus::Created);
        assert!(!state.has_quote_leg());
    }

    #[tokio::test]
    async fn test_quote_leg_fills_exactly_once() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = PaymentStateStore::new(pool.clone());
        let order_id = Uuid::new_v4();
        let base_asset = Uuid::new_v4();
        let quote_asset = Uuid::new_v4();

        PaymentStateStore::insert_base_leg(
            &pool,
            order_id,
            TradingType::MarketMaking,
            "ETH/USDT",
            base_asset,
            Decimal::from(2),
            Uuid::new_v4(),
            PaymentStatus::Created,
        )
        .await
        .unwrap();

        let filled = PaymentStateStore::fill_quote_leg(
            &pool,
            order_id,
            quote_asset,
            Decimal::from(4000),
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        assert!(filled);

        // duplicate quote delivery is a no-op
        let again = PaymentStateStore::fill_quote_leg(
            &pool,
            order_id,
            quote_asset,
            Decimal::from(4000),
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        assert!(!again);

        let state = store.get(order_id).await.unwrap().unwrap();
        assert_eq!(state.status, PaymentStatus::Completed);
        assert_eq!(state.amount_for(base_asset), Some(Decimal::from(2)));
        assert_eq!(state.amount_for(quote_asset), Some(Decimal::from(4000)));
        assert_eq!(state.amount_for(Uuid::new_v4()), None);
    }

    #[tokio::test]
    async fn test_locked_read_inside_transaction() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let order_id = Uuid::new_v4();
        PaymentStateStore::insert_base_leg(
            &pool,
            order_id,
            TradingType::Arbitrage,
            "BTC/USDT",
            Uuid::new_v4(),
            Decimal::ONE,
            Uuid::new_v4(),
            PaymentStatus::Created,
        )
        .await
        .unwrap();

        let mut tx = pool.begin().await.unwrap();
        let state = PaymentStateStore::get_for_update(&mut tx, order_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.order_id, order_id);
        assert!(
            PaymentStateStore::get_for_update(&mut tx, Uuid::new_v4())
                .await
                .unwrap()
                .is_none()
        );
        tx.commit().await.unwrap();
    }
}
