//! Strategy History
//!
//! Append-only record of what each loop did: one row per executed or
//! dry-run cycle and per arbitrage/market-making execution decision.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::core_types::UserId;

use super::StrategyError;

#[derive(Debug, Clone)]
pub struct StrategyHistory {
    pub id: i64,
    pub strategy_key: String,
    pub user_id: UserId,
    pub client_id: Uuid,
    pub action: String,
    pub base_amount: Option<Decimal>,
    pub quote_amount: Option<Decimal>,
    pub price: Option<Decimal>,
    /// Exchange order ids or the on-chain tx hash, depending on action.
    pub tx_ref: Option<String>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewStrategyHistory {
    pub strategy_key: String,
    pub user_id: UserId,
    pub client_id: Uuid,
    pub action: String,
    pub base_amount: Option<Decimal>,
    pub quote_amount: Option<Decimal>,
    pub price: Option<Decimal>,
    pub tx_ref: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StrategyHistoryStore {
    pool: PgPool,
}

impl StrategyHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, entry: &NewStrategyHistory) -> Result<i64, StrategyError> {
        let row = sqlx::query(
            r#"
            INSERT INTO strategy_history
                (strategy_key, user_id, client_id, action, base_amount, quote_amount,
                 price, tx_ref, detail)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&entry.strategy_key)
        .bind(entry.user_id)
        .bind(entry.client_id)
        .bind(&entry.action)
        .bind(entry.base_amount)
        .bind(entry.quote_amount)
        .bind(entry.price)
        .bind(&entry.tx_ref)
        .bind(&entry.detail)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    /// Newest first.
    pub async fn list_recent(
        &self,
        strategy_key: &str,
        limit: i64,
    ) -> Result<Vec<StrategyHistory>, StrategyError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM strategy_history
            WHERE strategy_key = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(strategy_key)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_history).collect())
    }
}

fn row_to_history(row: &PgRow) -> StrategyHistory {
    StrategyHistory {
        id: row.get("id"),
        strategy_key: row.get("strategy_key"),
        user_id: row.get("user_id"),
        client_id: row.get("client_id"),
        action: row.get("action"),
        base_amount: row.get("base_amount"),
        quote_amount: row.get("quote_amount"),
        price: row.get("price"),
        tx_ref: row.get("tx_ref"),
        detail: row.get("detail"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::create_test_pool;
    use crate::strategy::key::{StrategyKey, StrategyKind};

    #[tokio::test]
    async fn test_insert_and_list_newest_first() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let store = StrategyHistoryStore::new(pool);
        let key = StrategyKey::new(StrategyKind::Volume, Uuid::new_v4(), Uuid::new_v4());

        let first = store
            .insert(&NewStrategyHistory {
                strategy_key: key.to_string(),
                user_id: key.user_id,
                client_id: key.client_id,
                action: "dry_run".to_string(),
                base_amount: Some(Decimal::from(10)),
                quote_amount: Some(Decimal::from(20)),
                price: Some(Decimal::from(2)),
                tx_ref: None,
                detail: None,
            })
            .await
            .unwrap();
        let second = store
            .insert(&NewStrategyHistory {
                strategy_key: key.to_string(),
                user_id: key.user_id,
                client_id: key.client_id,
                action: "swap".to_string(),
                base_amount: Some(Decimal::from(10)),
                quote_amount: Some(Decimal::from(19)),
                price: Some(Decimal::from(2)),
                tx_ref: Some("0xabc".to_string()),
                detail: Some("min_out=18".to_string()),
            })
            .await
            .unwrap();
        assert!(second > first);

        let rows = store.list_recent(&key.to_string(), 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, "swap");
        assert_eq!(rows[0].tx_ref.as_deref(), Some("0xabc"));
        assert_eq!(rows[1].action, "dry_run");
    }
}
