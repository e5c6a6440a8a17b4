//! DEX Volume Strategy
//!
//! Operator-provisioned strategies that trade a fixed clip against an
//! AMM pool on a jittered timer, alternating between two signing keys
//! so the volume reads organic. A cycle aborts (but still reschedules)
//! when price impact or gas exceeds its caps; dry-run strategies log
//! and record history without swapping.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clients::{DexAdapter, PoolRef};
use crate::core_types::UserId;
use crate::orders::state::OrderState;

use super::history::{NewStrategyHistory, StrategyHistoryStore};
use super::key::{StrategyKey, StrategyKind};
use super::registry::StopSignal;
use super::{StrategyError, timing};

#[derive(Debug, Clone)]
pub struct VolumeStrategy {
    pub id: Uuid,
    pub user_id: UserId,
    pub client_id: Uuid,
    pub state: OrderState,
    pub base_interval_secs: i64,
    pub jitter_pct: i16,
    /// Abort the cycle when the quote implies more impact than this.
    pub max_price_impact_pct: Decimal,
    pub slippage_bps: i32,
    /// Skip the cycle when estimated gas (in token_out) exceeds this.
    pub gas_ceiling: Option<Decimal>,
    pub dry_run: bool,
    pub amount_per_cycle: Decimal,
    pub chain_id: i64,
    pub token_in: String,
    pub token_out: String,
    pub fee_tier: i32,
    pub signer_a: String,
    pub signer_b: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VolumeStrategy {
    pub fn key(&self) -> StrategyKey {
        StrategyKey::new(StrategyKind::Volume, self.user_id, self.client_id)
    }

    fn pool_ref(&self) -> PoolRef {
        PoolRef {
            chain_id: self.chain_id as u64,
            token_in: self.token_in.clone(),
            token_out: self.token_out.clone(),
            fee_tier: self.fee_tier as u32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VolumeStrategyStore {
    pool: PgPool,
}

impl VolumeStrategyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new strategy. False when one already exists for the
    /// same (user, client) pair.
    pub async fn insert(&self, strategy: &VolumeStrategy) -> Result<bool, StrategyError> {
        let result = sqlx::query(
            r#"
            INSERT INTO volume_strategies
                (id, user_id, client_id, state, base_interval_secs, jitter_pct,
                 max_price_impact_pct, slippage_bps, gas_ceiling, dry_run,
                 amount_per_cycle, chain_id, token_in, token_out, fee_tier,
                 signer_a, signer_b)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(strategy.id)
        .bind(strategy.user_id)
        .bind(strategy.client_id)
        .bind(strategy.state.as_str())
        .bind(strategy.base_interval_secs)
        .bind(strategy.jitter_pct)
        .bind(strategy.max_price_impact_pct)
        .bind(strategy.slippage_bps)
        .bind(strategy.gas_ceiling)
        .bind(strategy.dry_run)
        .bind(strategy.amount_per_cycle)
        .bind(strategy.chain_id)
        .bind(&strategy.token_in)
        .bind(&strategy.token_out)
        .bind(strategy.fee_tier)
        .bind(&strategy.signer_a)
        .bind(&strategy.signer_b)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<VolumeStrategy>, StrategyError> {
        let row = sqlx::query("SELECT * FROM volume_strategies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_strategy(&r)).transpose()
    }

    pub async fn list_by_states(
        &self,
        states: &[OrderState],
    ) -> Result<Vec<VolumeStrategy>, StrategyError> {
        let names: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(
            "SELECT * FROM volume_strategies WHERE state = ANY($1) ORDER BY created_at",
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_strategy).collect()
    }

    pub async fn update_state_if(
        &self,
        id: Uuid,
        expected: OrderState,
        new: OrderState,
    ) -> Result<bool, StrategyError> {
        let result = sqlx::query(
            r#"
            UPDATE volume_strategies
            SET state = $1, updated_at = NOW()
            WHERE id = $2 AND state = $3
            "#,
        )
        .bind(new.as_str())
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_strategy(row: &PgRow) -> Result<VolumeStrategy, StrategyError> {
    let state_name: String = row.get("state");
    let state =
        OrderState::from_name(&state_name).ok_or(StrategyError::UnknownState(state_name))?;

    Ok(VolumeStrategy {
        id: row.get("id"),
        user_id: row.get("user_id"),
        client_id: row.get("client_id"),
        state,
        base_interval_secs: row.get("base_interval_secs"),
        jitter_pct: row.get("jitter_pct"),
        max_price_impact_pct: row.get("max_price_impact_pct"),
        slippage_bps: row.get("slippage_bps"),
        gas_ceiling: row.get("gas_ceiling"),
        dry_run: row.get("dry_run"),
        amount_per_cycle: row.get("amount_per_cycle"),
        chain_id: row.get("chain_id"),
        token_in: row.get("token_in"),
        token_out: row.get("token_out"),
        fee_tier: row.get("fee_tier"),
        signer_a: row.get("signer_a"),
        signer_b: row.get("signer_b"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Executed { tx_hash: String },
    DryRun,
    Skipped(&'static str),
}

/// Adverse movement implied by the quote, in percent of the spot-priced
/// expectation. Never negative; a better-than-spot quote is no impact.
fn price_impact_pct(expected_out: Decimal, quoted_out: Decimal) -> Decimal {
    if expected_out <= Decimal::ZERO {
        return Decimal::ONE_HUNDRED;
    }
    let impact = (expected_out - quoted_out) / expected_out * Decimal::ONE_HUNDRED;
    impact.max(Decimal::ZERO)
}

fn min_output(quote: Decimal, slippage_bps: i32) -> Decimal {
    quote * Decimal::from(10_000 - i64::from(slippage_bps)) / Decimal::from(10_000)
}

pub struct VolumeBot {
    store: VolumeStrategyStore,
    history: StrategyHistoryStore,
    dex: Arc<dyn DexAdapter>,
    strategy_id: Uuid,
    buyer_is_a: AtomicBool,
}

impl VolumeBot {
    pub fn new(
        store: VolumeStrategyStore,
        history: StrategyHistoryStore,
        dex: Arc<dyn DexAdapter>,
        strategy_id: Uuid,
    ) -> Self {
        Self {
            store,
            history,
            dex,
            strategy_id,
            buyer_is_a: AtomicBool::new(true),
        }
    }

    pub async fn run(self, mut stop: StopSignal) {
        info!(strategy_id = %self.strategy_id, "Volume loop starting");
        loop {
            if stop.is_stopped() {
                break;
            }
            let strategy = match self.store.get(self.strategy_id).await {
                Ok(Some(s)) => s,
                Ok(None) => {
                    warn!(strategy_id = %self.strategy_id, "Volume strategy row disappeared");
                    break;
                }
                Err(e) => {
                    error!(strategy_id = %self.strategy_id, error = %e, "Volume strategy load failed");
                    tokio::select! {
                        _ = sleep(Duration::from_secs(5)) => {}
                        _ = stop.stopped() => break,
                    }
                    continue;
                }
            };
            if strategy.state != OrderState::Running {
                info!(
                    strategy_id = %self.strategy_id,
                    state = %strategy.state,
                    "Volume strategy no longer running, loop exiting"
                );
                break;
            }

            let base = Duration::from_secs(strategy.base_interval_secs.max(1) as u64);
            let jitter = strategy.jitter_pct.clamp(0, 100) as u8;
            let delay = match self.run_cycle(&strategy).await {
                Ok(outcome) => {
                    debug!(strategy_id = %self.strategy_id, outcome = ?outcome, "Volume cycle done");
                    timing::jittered(base, jitter)
                }
                Err(e) => {
                    warn!(strategy_id = %self.strategy_id, error = %e, "Volume cycle failed");
                    timing::error_backoff(base, jitter)
                }
            };
            tokio::select! {
                _ = sleep(delay) => {}
                _ = stop.stopped() => break,
            }
        }
        info!(strategy_id = %self.strategy_id, "Volume loop exited");
    }

    /// One trade attempt. Price-impact and gas caps skip the cycle,
    /// never fail it; the caller reschedules either way.
    pub async fn run_cycle(
        &self,
        strategy: &VolumeStrategy,
    ) -> Result<CycleOutcome, StrategyError> {
        let pool_ref = strategy.pool_ref();
        let amount_in = strategy.amount_per_cycle;

        let pool_info = self.dex.get_pool(&pool_ref).await?;
        let quote = self.dex.quote_exact_input_single(&pool_ref, amount_in).await?;

        let expected_out = amount_in * pool_info.spot_price;
        let impact = price_impact_pct(expected_out, quote);
        if impact > strategy.max_price_impact_pct {
            warn!(
                strategy_id = %strategy.id,
                impact = %impact,
                cap = %strategy.max_price_impact_pct,
                "Price impact above cap, skipping cycle"
            );
            return Ok(CycleOutcome::Skipped("price impact above cap"));
        }

        let min_out = min_output(quote, strategy.slippage_bps);

        if let Some(ceiling) = strategy.gas_ceiling {
            let gas = self.dex.estimate_gas(&pool_ref, amount_in).await?;
            if gas > ceiling {
                debug!(
                    strategy_id = %strategy.id,
                    gas = %gas,
                    ceiling = %ceiling,
                    "Gas above ceiling, skipping cycle"
                );
                return Ok(CycleOutcome::Skipped("gas above ceiling"));
            }
        }

        let buyer_a = self.buyer_is_a.load(Ordering::SeqCst);
        let signer = if buyer_a {
            &strategy.signer_a
        } else {
            &strategy.signer_b
        };

        let outcome = if strategy.dry_run {
            info!(
                strategy_id = %strategy.id,
                amount_in = %amount_in,
                quote = %quote,
                min_out = %min_out,
                signer,
                "Dry run, swap not sent"
            );
            self.record(strategy, "dry_run", amount_in, quote, pool_info.spot_price, None, signer)
                .await?;
            CycleOutcome::DryRun
        } else {
            let receipt = self
                .dex
                .exact_input_single(&pool_ref, signer, amount_in, min_out)
                .await?;
            info!(
                strategy_id = %strategy.id,
                amount_in = %amount_in,
                amount_out = %receipt.amount_out,
                tx_hash = %receipt.tx_hash,
                "Swap executed"
            );
            self.record(
                strategy,
                "swap",
                amount_in,
                receipt.amount_out,
                pool_info.spot_price,
                Some(receipt.tx_hash.clone()),
                signer,
            )
            .await?;
            CycleOutcome::Executed {
                tx_hash: receipt.tx_hash,
            }
        };

        // Alternation only counts cycles that traded (or would have).
        self.buyer_is_a.store(!buyer_a, Ordering::SeqCst);
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        strategy: &VolumeStrategy,
        action: &str,
        amount_in: Decimal,
        amount_out: Decimal,
        spot_price: Decimal,
        tx_ref: Option<String>,
        signer: &str,
    ) -> Result<(), StrategyError> {
        self.history
            .insert(&NewStrategyHistory {
                strategy_key: strategy.key().to_string(),
                user_id: strategy.user_id,
                client_id: strategy.client_id,
                action: action.to_string(),
                base_amount: Some(amount_in),
                quote_amount: Some(amount_out),
                price: Some(spot_price),
                tx_ref,
                detail: Some(format!("signer={signer}")),
            })
            .await?;
        Ok(())
    }
}
