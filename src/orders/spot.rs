//! Spot Order Store
//!
//! Spot orders are created directly from a decoded memo (no payment
//! reconciliation step) and keep the funding `snapshot_id` around for
//! refunds. Fill progress is written by the exchange poll worker only.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};

use crate::clients::{OrderKind, OrderSide};
use crate::core_types::{AssetId, OrderId, SnapshotId, UserId};

use super::error::OrderError;
use super::state::SpotOrderState;

#[derive(Debug, Clone)]
pub struct SpotOrder {
    pub order_id: OrderId,
    /// Funding deposit; refund target if the order cancels.
    pub snapshot_id: SnapshotId,
    pub user_id: UserId,
    pub exchange_name: String,
    pub order_kind: OrderKind,
    pub side: OrderSide,
    pub state: SpotOrderState,
    pub symbol: String,
    pub amount: Decimal,
    pub base_asset_id: AssetId,
    pub target_asset_id: AssetId,
    pub api_key_id: Option<uuid::Uuid>,
    pub limit_price: Option<Decimal>,
    pub exchange_order_id: Option<String>,
    pub filled_amount: Decimal,
    pub avg_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SpotOrderStore {
    pool: PgPool,
}

impl SpotOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a new spot order. Idempotent on both `order_id` and the
    /// funding `snapshot_id`; false means a duplicate delivery.
    pub async fn insert<'e>(
        exec: impl PgExecutor<'e>,
        order: &SpotOrder,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            INSERT INTO spot_orders
                (order_id, snapshot_id, user_id, exchange_name, order_kind, side, state,
                 symbol, amount, base_asset_id, target_asset_id, api_key_id, limit_price,
                 exchange_order_id, filled_amount, avg_price)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(order.order_id)
        .bind(order.snapshot_id)
        .bind(order.user_id)
        .bind(&order.exchange_name)
        .bind(order.order_kind.as_str())
        .bind(order.side.as_str())
        .bind(order.state.as_str())
        .bind(&order.symbol)
        .bind(order.amount)
        .bind(order.base_asset_id)
        .bind(order.target_asset_id)
        .bind(order.api_key_id)
        .bind(order.limit_price)
        .bind(&order.exchange_order_id)
        .bind(order.filled_amount)
        .bind(order.avg_price)
        .execute(exec)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, order_id: OrderId) -> Result<Option<SpotOrder>, OrderError> {
        let row = sqlx::query("SELECT * FROM spot_orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_order(&r)).transpose()
    }

    pub async fn get_by_snapshot(
        &self,
        snapshot_id: SnapshotId,
    ) -> Result<Option<SpotOrder>, OrderError> {
        let row = sqlx::query("SELECT * FROM spot_orders WHERE snapshot_id = $1")
            .bind(snapshot_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_order(&r)).transpose()
    }

    /// Orders the exchange poll worker still has to watch, restricted to
    /// the venues the worker holds clients for.
    pub async fn list_fillable(&self, venues: &[String]) -> Result<Vec<SpotOrder>, OrderError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM spot_orders
            WHERE state IN ('created', 'partially_filled') AND exchange_name = ANY($1)
            ORDER BY created_at
            "#,
        )
        .bind(venues)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    pub async fn list_in_state(
        &self,
        state: SpotOrderState,
        venues: &[String],
    ) -> Result<Vec<SpotOrder>, OrderError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM spot_orders
            WHERE state = $1 AND exchange_name = ANY($2)
            ORDER BY created_at
            "#,
        )
        .bind(state.as_str())
        .bind(venues)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    /// Attach the exchange-assigned order id; first writer wins.
    pub async fn set_exchange_order(
        &self,
        order_id: OrderId,
        exchange_order_id: &str,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            UPDATE spot_orders
            SET exchange_order_id = $1, updated_at = NOW()
            WHERE order_id = $2 AND exchange_order_id IS NULL
            "#,
        )
        .bind(exchange_order_id)
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write fill progress and the resulting state in one CAS step.
    /// Only fillable orders accept fills.
    pub async fn record_fill(
        &self,
        order_id: OrderId,
        filled_amount: Decimal,
        avg_price: Option<Decimal>,
        new_state: SpotOrderState,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            UPDATE spot_orders
            SET filled_amount = $1, avg_price = $2, state = $3, updated_at = NOW()
            WHERE order_id = $4 AND state IN ('created', 'partially_filled')
            "#,
        )
        .bind(filled_amount)
        .bind(avg_price)
        .bind(new_state.as_str())
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_state_if(
        &self,
        order_id: OrderId,
        expected: SpotOrderState,
        new: SpotOrderState,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            UPDATE spot_orders
            SET state = $1, updated_at = NOW()
            WHERE order_id = $2 AND state = $3
            "#,
        )
        .bind(new.as_str())
        .bind(order_id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cancel while still fillable.
    pub async fn mark_canceled(&self, order_id: OrderId) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            UPDATE spot_orders
            SET state = 'canceled', updated_at = NOW()
            WHERE order_id = $1 AND state IN ('created', 'partially_filled')
            "#,
        )
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Advance release_init -> released once the release withdrawal
    /// completed. Keyed by the shared snapshot id.
    pub async fn mark_released_by_snapshot(
        &self,
        snapshot_id: SnapshotId,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            UPDATE spot_orders
            SET state = 'released', updated_at = NOW()
            WHERE snapshot_id = $1 AND state = 'release_init'
            "#,
        )
        .bind(snapshot_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_release_failed_by_snapshot(
        &self,
        snapshot_id: SnapshotId,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            UPDATE spot_orders
            SET state = 'release_failed', updated_at = NOW()
            WHERE snapshot_id = $1 AND state = 'release_init'
            "#,
        )
        .bind(snapshot_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_order(row: &PgRow) -> Result<SpotOrder, OrderError> {
    let state_name: String = row.get("state");
    let state =
        SpotOrderState::from_name(&state_name).ok_or(OrderError::UnknownState(state_name))?;

    let kind_name: String = row.get("order_kind");
    let order_kind = OrderKind::from_name(&kind_name).ok_or(OrderError::UnknownField {
        field: "order_kind",
        value: kind_name,
    })?;

    let side_name: String = row.get("side");
    let side = OrderSide::from_name(&side_name).ok_or(OrderError::UnknownField {
        field: "side",
        value: side_name,
    })?;

    Ok(SpotOrder {
        order_id: row.get("order_id"),
        snapshot_id: row.get("snapshot_id"),
        user_id: row.get("user_id"),
        exchange_name: row.get("exchange_name"),
        order_kind,
        side,
        state,
        symbol: row.get("symbol"),
        amount: row.get("amount"),
        base_asset_id: row.get("base_asset_id"),
        target_asset_id: row.get("target_asset_id"),
        api_key_id: row.get("api_key_id"),
        limit_price: row.get("limit_price"),
        exchange_order_id: row.get("exchange_order_id"),
        filled_amount: row.get("filled_amount"),
        avg_price: row.get("avg_price"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::create_test_pool;
    use uuid::Uuid;

    fn sample_order() -> SpotOrder {
        SpotOrder {
            order_id: Uuid::new_v4(),
            snapshot_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            exchange_name: "binance".to_string(),
            order_kind: OrderKind::Limit,
            side: OrderSide::Buy,
            state: SpotOrderState::Created,
            symbol: "BTC/USDT".to_string(),
            amount: Decimal::ONE,
            base_asset_id: Uuid::new_v4(),
            target_asset_id: Uuid::new_v4(),
            api_key_id: None,
            limit_price: Some(Decimal::from(64000)),
            exchange_order_id: None,
            filled_amount: Decimal::ZERO,
            avg_price: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_dedupes_on_snapshot() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let order = sample_order();
        assert!(SpotOrderStore::insert(&pool, &order).await.unwrap());

        // same snapshot under a fresh order id is still a duplicate
        let mut dup = order.clone();
        dup.order_id = Uuid::new_v4();
        assert!(!SpotOrderStore::insert(&pool, &dup).await.unwrap());
    }

    #[tokio::test]
    async fn test_fill_and_release_path() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = SpotOrderStore::new(pool.clone());
        let order = sample_order();
        SpotOrderStore::insert(&pool, &order).await.unwrap();

        assert!(
            store
                .set_exchange_order(order.order_id, "ex-1")
                .await
                .unwrap()
        );
        // second writer loses
        assert!(
            !store
                .set_exchange_order(order.order_id, "ex-2")
                .await
                .unwrap()
        );

        assert!(
            store
                .record_fill(
                    order.order_id,
                    Decimal::new(5, 1),
                    Some(Decimal::from(64000)),
                    SpotOrderState::PartiallyFilled,
                )
                .await
                .unwrap()
        );
        assert!(
            store
                .record_fill(
                    order.order_id,
                    Decimal::ONE,
                    Some(Decimal::from(64001)),
                    SpotOrderState::Filled,
                )
                .await
                .unwrap()
        );
        // no fills once filled
        assert!(
            !store
                .record_fill(order.order_id, Decimal::ONE, None, SpotOrderState::Filled)
                .await
                .unwrap()
        );

        assert!(
            store
                .update_state_if(
                    order.order_id,
                    SpotOrderState::Filled,
                    SpotOrderState::ReleaseInit
                )
                .await
                .unwrap()
        );
        assert!(store.mark_released_by_snapshot(order.snapshot_id).await.unwrap());

        let loaded = store.get(order.order_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, SpotOrderState::Released);
        assert_eq!(loaded.exchange_order_id.as_deref(), Some("ex-1"));
        assert_eq!(loaded.filled_amount, Decimal::ONE);
    }

    #[tokio::test]
    async fn test_cancel_only_while_fillable() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = SpotOrderStore::new(pool.clone());
        let order = sample_order();
        SpotOrderStore::insert(&pool, &order).await.unwrap();

        store
            .record_fill(order.order_id, order.amount, None, SpotOrderState::Filled)
            .await
            .unwrap();
        assert!(!store.mark_canceled(order.order_id).await.unwrap());

        let other = sample_order();
        SpotOrderStore::insert(&pool, &other).await.unwrap();
        assert!(store.mark_canceled(other.order_id).await.unwrap());
    }
}
