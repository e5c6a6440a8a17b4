//! Market-Making Order Store

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};

use crate::core_types::{OrderId, PairId, UserId};

use super::error::OrderError;
use super::state::OrderState;

/// How per-layer order size changes across quote layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountChangeType {
    Percent,
    Fixed,
}

impl AmountChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmountChangeType::Percent => "percent",
            AmountChangeType::Fixed => "fixed",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "percent" => Some(AmountChangeType::Percent),
            "fixed" => Some(AmountChangeType::Fixed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarketMakingOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub pair_id: PairId,
    pub symbol: String,
    pub exchange_name: String,
    /// Spreads in percent around the price source.
    pub bid_spread: Decimal,
    pub ask_spread: Decimal,
    pub order_amount: Decimal,
    pub order_refresh_secs: i64,
    pub number_of_layers: i32,
    /// Price source driving the quotes ("mid", "last", "best_bid", ...).
    pub price_source_type: String,
    pub amount_change_per_layer: Decimal,
    pub amount_change_type: AmountChangeType,
    pub ceiling_price: Option<Decimal>,
    pub floor_price: Option<Decimal>,
    pub balance_a: Decimal,
    pub balance_b: Decimal,
    pub state: OrderState,
    pub reward_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MarketMakingOrderStore {
    pool: PgPool,
}

impl MarketMakingOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent insert on `order_id`.
    pub async fn insert<'e>(
        exec: impl PgExecutor<'e>,
        order: &MarketMakingOrder,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            INSERT INTO market_making_orders
                (order_id, user_id, pair_id, symbol, exchange_name, bid_spread, ask_spread,
                 order_amount, order_refresh_secs, number_of_layers, price_source_type,
                 amount_change_per_layer, amount_change_type, ceiling_price, floor_price,
                 balance_a, balance_b, state, reward_address)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order.order_id)
        .bind(order.user_id)
        .bind(order.pair_id)
        .bind(&order.symbol)
        .bind(&order.exchange_name)
        .bind(order.bid_spread)
        .bind(order.ask_spread)
        .bind(order.order_amount)
        .bind(order.order_refresh_secs)
        .bind(order.number_of_layers)
        .bind(&order.price_source_type)
        .bind(order.amount_change_per_layer)
        .bind(order.amount_change_type.as_str())
        .bind(order.ceiling_price)
        .bind(order.floor_price)
        .bind(order.balance_a)
        .bind(order.balance_b)
        .bind(order.state.as_str())
        .bind(&order.reward_address)
        .execute(exec)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, order_id: OrderId) -> Result<Option<MarketMakingOrder>, OrderError> {
        let row = sqlx::query("SELECT * FROM market_making_orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_order(&r)).transpose()
    }

    pub async fn list_by_states(
        &self,
        states: &[OrderState],
    ) -> Result<Vec<MarketMakingOrder>, OrderError> {
        let names: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(
            "SELECT * FROM market_making_orders WHERE state = ANY($1) ORDER BY created_at",
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    pub async fn update_state_if(
        &self,
        order_id: OrderId,
        expected: OrderState,
        new: OrderState,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            UPDATE market_making_orders
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

    pub async fn update_balances(
        &self,
        order_id: OrderId,
        balance_a: Decimal,
        balance_b: Decimal,
    ) -> Result<(), OrderError> {
        sqlx::query(
            r#"
            UPDATE market_making_orders
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

fn row_to_order(row: &PgRow) -> Result<MarketMakingOrder, OrderError> {
    let state_name: String = row.get("state");
    let state =
        OrderState::from_name(&state_name).ok_or(OrderError::UnknownState(state_name))?;

    let change_type_name: String = row.get("amount_change_type");
    let amount_change_type = AmountChangeType::from_name(&change_type_name).ok_or(
        OrderError::UnknownField {
            field: "amount_change_type",
            value: change_type_name,
        },
    )?;

    Ok(MarketMakingOrder {
        order_id: row.get("order_id"),
        user_id: row.get("user_id"),
        pair_id: row.get("pair_id"),
        symbol: row.get("symbol"),
        exchange_name: row.get("exchange_name"),
        bid_spread: row.get("bid_spread"),
        ask_spread: row.get("ask_spread"),
        order_amount: row.get("order_amount"),
        order_refresh_secs: row.get("order_refresh_secs"),
        number_of_layers: row.get("number_of_layers"),
        price_source_type: row.get("price_source_type"),
        amount_change_per_layer: row.get("amount_change_per_layer"),
        amount_change_type,
        ceiling_price: row.get("ceiling_price"),
        floor_price: row.get("floor_price"),
        balance_a: row.get("balance_a"),
        balance_b: row.get("balance_b"),
        state,
        reward_address: row.get("reward_address"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
