//! Arbitrage Order Store
//!
//! Cross-exchange arbitrage orders funded by a two-leg deposit. Creation
//! happens inside the reconciliation transaction, so the insert accepts
//! any executor and is idempotent on `order_id`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};

use crate::core_types::{OrderId, PairId, UserId};

use super::error::OrderError;
use super::state::OrderState;

#[derive(Debug, Clone)]
pub struct ArbitrageOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub pair_id: PairId,
    pub symbol: String,
    pub amount_to_trade: Decimal,
    /// Minimum cross-exchange spread, in percent, before the loop trades.
    pub min_profitability: Decimal,
    pub exchange_a_name: String,
    pub exchange_b_name: String,
    pub balance_a: Decimal,
    pub balance_b: Decimal,
    pub state: OrderState,
    pub reward_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ArbitrageOrderStore {
    pool: PgPool,
}

impl ArbitrageOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new order. Returns false when the order id already
    /// exists (duplicate leg delivery).
    pub async fn insert<'e>(
        exec: impl PgExecutor<'e>,
        order: &ArbitrageOrder,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            INSERT INTO arbitrage_orders
                (order_id, user_id, pair_id, symbol, amount_to_trade, min_profitability,
                 exchange_a_name, exchange_b_name, balance_a, balance_b, state, reward_address)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order.order_id)
        .bind(order.user_id)
        .bind(order.pair_id)
        .bind(&order.symbol)
        .bind(order.amount_to_trade)
        .bind(order.min_profitability)
        .bind(&order.exchange_a_name)
        .bind(&order.exchange_b_name)
        .bind(order.balance_a)
        .bind(order.balance_b)
        .bind(order.state.as_str())
        .bind(&order.reward_address)
        .execute(exec)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, order_id: OrderId) -> Result<Option<ArbitrageOrder>, OrderError> {
        let row = sqlx::query("SELECT * FROM arbitrage_orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_order(&r)).transpose()
    }

    pub async fn list_by_states(
        &self,
        states: &[OrderState],
    ) -> Result<Vec<ArbitrageOrder>, OrderError> {
        let names: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(
            "SELECT * FROM arbitrage_orders WHERE state = ANY($1) ORDER BY created_at",
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    /// CAS state update. Returns false when the current state is no
    /// longer `expected`.
    pub async fn update_state_if(
        &self,
        order_id: OrderId,
        expected: OrderState,
        new: OrderState,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            UPDATE arbitrage_orders
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

    /// Record balances after an executed cycle.
    pub async fn update_balances(
        &self,
        order_id: OrderId,
        balance_a: Decimal,
        balance_b: Decimal,
    ) -> Result<(), OrderError> {
        sqlx::query(
            r#"
            UPDATE arbitrage_orders
            SET balance_a = $1, balance_b = $2, updated_at = NOW()
            WHERE order_id = $3
            "#,
        )
        .bind(balance_a)
        .bind(balance_b)
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_order(row: &PgRow) -> Result<ArbitrageOrder, OrderError> {
    let state_name: String = row.get("state");
    let state =
        OrderState::from_name(&state_name).ok_or(OrderError::UnknownState(state_name))?;

    Ok(ArbitrageOrder {
        order_id: row.get("order_id"),
        user_id: row.get("user_id"),
        pair_id: row.get("pair_id"),
        symbol: row.get("symbol"),
        amount_to_trade: row.get("amount_to_trade"),
        min_profitability: row.get("min_profitability"),
        exchange_a_name: row.get("exchange_a_name"),
        exchange_b_name: row.get("exchange_b_name"),
        balance_a: row.get("balance_a"),
        balance_b: row.get("balance_b"),
        state,
        reward_address: row.get("reward_address"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::create_test_pool;
    use uuid::Uuid;

    fn sample_order() -> ArbitrageOrder {
        ArbitrageOrder {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            pair_id: Uuid::new_v4(),
            symbol: "BTC/USDT".to_string(),
            amount_to_trade: Decimal::new(1, 1),
            min_profitability: Decimal::new(5, 1),
            exchange_a_name: "binance".to_string(),
            exchange_b_name: "kraken".to_string(),
            balance_a: Decimal::from(10),
            balance_b: Decimal::from(10),
            state: OrderState::Created,
            reward_address: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = ArbitrageOrderStore::new(pool.clone());
        let order = sample_order();

        assert!(ArbitrageOrderStore::insert(&pool, &order).await.unwrap());
        assert!(!ArbitrageOrderStore::insert(&pool, &order).await.unwrap());

        let loaded = store.get(order.order_id).await.unwrap().unwrap();
        assert_eq!(loaded.symbol, "BTC/USDT");
        assert_eq!(loaded.state, OrderState::Created);
    }

    #[tokio::test]
    async fn test_cas_state_update() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = ArbitrageOrderStore::new(pool.clone());
        let order = sample_order();
        ArbitrageOrderStore::insert(&pool, &order).await.unwrap();

        assert!(
            store
                .update_state_if(order.order_id, OrderState::Created, OrderState::Running)
                .await
                .unwrap()
        );
        // stale CAS loses
        assert!(
            !store
                .update_state_if(order.order_id, OrderState::Created, OrderState::Running)
                .await
                .unwrap()
        );

        let loaded = store.get(order.order_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, OrderState::Running);
    }
}
