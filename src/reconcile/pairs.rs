//! Trading pair lookup.
//!
//! Pairs are operator-provisioned rows; the engine only reads them.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::core_types::{AssetId, PairId};

use super::ReconcileError;

#[derive(Debug, Clone)]
pub struct TradingPair {
    pub pair_id: PairId,
    pub symbol: String,
    pub base_asset_id: AssetId,
    pub quote_asset_id: AssetId,
    /// Exchanges quoting this pair, in operator preference order.
    pub exchange_ids: Vec<String>,
    pub enabled: bool,
}

impl TradingPair {
    pub fn covers_asset(&self, asset_id: AssetId) -> bool {
        asset_id == self.base_asset_id || asset_id == self.quote_asset_id
    }
}

#[derive(Debug, Clone)]
pub struct PairRegistry {
    pool: PgPool,
}

impl PairRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up an enabled pair. Disabled pairs are invisible to the
    /// engine, so deposits against them refund.
    pub async fn get(&self, pair_id: PairId) -> Result<Option<TradingPair>, ReconcileError> {
        let row = sqlx::query(
            "SELECT * FROM trading_pairs WHERE pair_id = $1 AND enabled = TRUE",
        )
        .bind(pair_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_pair(&r)).transpose()
    }

    pub async fn list_enabled(&self) -> Result<Vec<TradingPair>, ReconcileError> {
        let rows = sqlx::query("SELECT * FROM trading_pairs WHERE enabled = TRUE ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_pair).collect()
    }

    /// Provision or update a pair. Operator tooling and tests only.
    pub async fn upsert(&self, pair: &TradingPair) -> Result<(), ReconcileError> {
        sqlx::query(
            r#"
            INSERT INTO trading_pairs (pair_id, symbol, base_asset_id, quote_asset_id, exchange_ids, enabled)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (pair_id) DO UPDATE SET
                symbol = EXCLUDED.symbol,
                base_asset_id = EXCLUDED.base_asset_id,
                quote_asset_id = EXCLUDED.quote_asset_id,
                exchange_ids = EXCLUDED.exchange_ids,
                enabled = EXCLUDED.enabled
            "#,
        )
        .bind(pair.pair_id)
        .bind(&pair.symbol)
        .bind(pair.base_asset_id)
        .bind(pair.quote_asset_id)
        .bind(&pair.exchange_ids)
        .bind(pair.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_pair(row: &PgRow) -> Result<TradingPair, ReconcileError> {
    Ok(TradingPair {
        pair_id: row.get("pair_id"),
        symbol: row.get("symbol"),
        base_asset_id: row.get("base_asset_id"),
        quote_asset_id: row.get("quote_asset_id"),
        exchange_ids: row.get("exchange_ids"),
        enabled: row.get("enabled"),
    })
}
