//! Simply-Grow Order Store
//!
//! Single-asset yield orders. One deposit leg funds them, so the
//! reconciliation engine creates the order and completes the payment in
//! the same transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};

use crate::core_types::{AssetId, OrderId, UserId};

use super::error::OrderError;
use super::state::OrderState;

#[derive(Debug, Clone)]
pub struct SimplyGrowOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub amount: Decimal,
    pub state: OrderState,
    pub reward_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SimplyGrowOrderStore {
    pool: PgPool,
}

impl SimplyGrowOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent insert on `order_id`.
    pub async fn insert<'e>(
        exec: impl PgExecutor<'e>,
        order: &SimplyGrowOrder,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            INSERT INTO simply_grow_orders
                (order_id, user_id, asset_id, amount, state, reward_address)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order.order_id)
        .bind(order.user_id)
        .bind(order.asset_id)
        .bind(order.amount)
        .bind(order.state.as_str())
        .bind(&order.reward_address)
        .execute(exec)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, order_id: OrderId) -> Result<Option<SimplyGrowOrder>, OrderError> {
        let row = sqlx::query("SELECT * FROM simply_grow_orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_order(&r)).transpose()
    }

    pub async fn list_by_states(
        &self,
        states: &[OrderState],
    ) -> Result<Vec<SimplyGrowOrder>, OrderError> {
        let names: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(
            "SELECT * FROM simply_grow_orders WHERE state = ANY($1) ORDER BY created_at",
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    /// Top up the deposited amount (memo action `deposit`).
    pub async fn add_amount(&self, order_id: OrderId, delta: Decimal) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            UPDATE simply_grow_orders
            SET amount = amount + $1, updated_at = NOW()
            WHERE order_id = $2 AND state IN ('created', 'running', 'paused')
            "#,
        )
        .bind(delta)
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_state_if(
        &self,
        order_id: OrderId,
        expected: OrderState,
        new: OrderState,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            UPDATE simply_grow_orders
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
}

fn row_to_order(row: &PgRow) -> Result<SimplyGrowOrder, OrderError> {
    let state_name: String = row.get("state");
    let state =
        OrderState::from_name(&state_name).ok_or(OrderError::UnknownState(state_name))?;

    Ok(SimplyGrowOrder {
        order_id: row.get("order_id"),
        user_id: row.get("user_id"),
        asset_id: row.get("asset_id"),
        amount: row.get("amount"),
        state,
        reward_address: row.get("reward_address"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
