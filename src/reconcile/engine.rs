//! Reconciliation Engine
//!
//! Folds decoded deposit memos into payment states and strategy
//! orders. Everything here is either idempotent or refunded: a deposit
//! the engine cannot accept goes straight back to its sender with an
//! explanatory memo, and a deposit it has already seen is a no-op.
//!
//! Create memos carry only the order id, the pair (or asset) id and an
//! optional reward address; per-strategy trading parameters come from
//! the configured defaults until an operator tunes the order.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::config::StrategyDefaults;
use crate::core_types::OrderId;
use crate::memo::{MemoAction, MemoPayload, TradingType};
use crate::orders::state::OrderState;
use crate::orders::{
    ArbitrageOrder, ArbitrageOrderStore, MarketMakingOrder, MarketMakingOrderStore,
    SimplyGrowOrder, SimplyGrowOrderStore,
};
use crate::settlement::Snapshot;
use crate::withdrawal::WithdrawalService;

use super::ReconcileError;
use super::pairs::{PairRegistry, TradingPair};
use super::payment::{PaymentStateStore, PaymentStatus};

/// What one deposit did to the books.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// First leg recorded; waiting for the other asset.
    LegRecorded(OrderId),
    /// Both legs in, strategy order created.
    OrderCreated(OrderId),
    /// Deposit action added funds to a live order.
    ToppedUp(OrderId),
    /// Already accounted for; nothing changed.
    Duplicate,
    /// Deposit bounced back to the sender.
    Refunded(String),
}

pub struct ReconcileEngine {
    pool: PgPool,
    pairs: PairRegistry,
    arbitrage: ArbitrageOrderStore,
    market_making: MarketMakingOrderStore,
    simply_grow: SimplyGrowOrderStore,
    withdrawals: WithdrawalService,
    defaults: StrategyDefaults,
}

impl ReconcileEngine {
    pub fn new(pool: PgPool, withdrawals: WithdrawalService, defaults: StrategyDefaults) -> Self {
        Self {
            pairs: PairRegistry::new(pool.clone()),
            arbitrage: ArbitrageOrderStore::new(pool.clone()),
            market_making: MarketMakingOrderStore::new(pool.clone()),
            simply_grow: SimplyGrowOrderStore::new(pool.clone()),
            pool,
            withdrawals,
            defaults,
        }
    }

    /// Apply one decoded deposit. The caller has already deduped the
    /// snapshot and verified it is an inbound deposit.
    pub async fn process(
        &self,
        snapshot: &Snapshot,
        payload: &MemoPayload,
    ) -> Result<Outcome, ReconcileError> {
        let amount = snapshot
            .parse_amount()
            .filter(|a| *a > Decimal::ZERO)
            .ok_or_else(|| ReconcileError::BadAmount(snapshot.amount.clone()))?;

        let Some(order_id) = payload.order_id() else {
            return self.refund(snapshot, amount, "memo carries no order id").await;
        };

        match payload.trading_type {
            TradingType::SimplyGrow => {
                self.process_simply_grow(snapshot, amount, payload, order_id)
                    .await
            }
            TradingType::Arbitrage | TradingType::MarketMaking => {
                self.process_two_leg(snapshot, amount, payload, order_id)
                    .await
            }
            other => {
                self.refund(
                    snapshot,
                    amount,
                    &format!("strategy {} does not accept deposits here", other),
                )
                .await
            }
        }
    }

    async fn process_simply_grow(
        &self,
        snapshot: &Snapshot,
        amount: Decimal,
        payload: &MemoPayload,
        order_id: OrderId,
    ) -> Result<Outcome, ReconcileError> {
        if payload.action == MemoAction::Deposit {
            // Top-up of a live order; no payment state involved.
            if self.simply_grow.add_amount(order_id, amount).await? {
                info!(order_id = %order_id, amount = %amount, "Simply grow top-up");
                return Ok(Outcome::ToppedUp(order_id));
            }
            return self.refund(snapshot, amount, "no active simply grow order").await;
        }

        // The second ref names the asset the user meant to deposit.
        match payload.refs.get(1) {
            Some(asset) if *asset == snapshot.asset_id => {}
            _ => {
                return self
                    .refund(snapshot, amount, "memo asset does not match deposit")
                    .await;
            }
        }

        let mut tx = self.pool.begin().await?;
        let inserted = PaymentStateStore::insert_base_leg(
            &mut *tx,
            order_id,
            TradingType::SimplyGrow,
            &snapshot.asset_id.to_string(),
            snapshot.asset_id,
            amount,
            snapshot.snapshot_id,
            PaymentStatus::Completed,
        )
        .await?;
        if !inserted {
            tx.rollback().await?;
            return Ok(Outcome::Duplicate);
        }

        let now = Utc::now();
        SimplyGrowOrderStore::insert(
            &mut *tx,
            &SimplyGrowOrder {
                order_id,
                user_id: snapshot.opponent_id,
                asset_id: snapshot.asset_id,
                amount,
                state: OrderState::Created,
                reward_address: payload.reward_address.map(|a| a.to_string()),
                created_at: now,
                updated_at: now,
            },
        )
        .await?;
        tx.commit().await?;

        info!(order_id = %order_id, amount = %amount, "Simply grow order created");
        Ok(Outcome::OrderCreated(order_id))
    }

    async fn process_two_leg(
        &self,
        snapshot: &Snapshot,
        amount: Decimal,
        payload: &MemoPayload,
        order_id: OrderId,
    ) -> Result<Outcome, ReconcileError> {
        if payload.action != MemoAction::Create {
            return self
                .refund(snapshot, amount, "two-leg strategies fund through create memos")
                .await;
        }
        let Some(pair_id) = payload.pair_id() else {
            return self.refund(snapshot, amount, "memo carries no pair id").await;
        };
        let Some(pair) = self.pairs.get(pair_id).await? else {
            return self.refund(snapshot, amount, "unknown trading pair").await;
        };
        if !pair.covers_asset(snapshot.asset_id) {
            return self
                .refund(snapshot, amount, "deposit asset does not belong to the pair")
                .await;
        }
        let min_exchanges = match payload.trading_type {
            TradingType::Arbitrage => 2,
            _ => 1,
        };
        if pair.exchange_ids.len() < min_exchanges {
            return self
                .refund(snapshot, amount, "pair has no exchange route")
                .await;
        }

        // The unlocked read and the insert can race another leg; one
        // retry re-reads under the lock the winner released.
        for _ in 0..2 {
            let mut tx = self.pool.begin().await?;
            let state = PaymentStateStore::get_for_update(&mut tx, order_id).await?;
            match state {
                None => {
                    let inserted = PaymentStateStore::insert_base_leg(
                        &mut *tx,
                        order_id,
                        payload.trading_type,
                        &pair.symbol,
                        snapshot.asset_id,
                        amount,
                        snapshot.snapshot_id,
                        PaymentStatus::Created,
                    )
                    .await?;
                    if !inserted {
                        tx.rollback().await?;
                        continue;
                    }
                    tx.commit().await?;
                    info!(
                        order_id = %order_id,
                        asset_id = %snapshot.asset_id,
                        amount = %amount,
                        "First funding leg recorded"
                    );
                    return Ok(Outcome::LegRecorded(order_id));
                }
                Some(ps) if !ps.has_quote_leg() => {
                    if ps.base_asset_snapshot_id == snapshot.snapshot_id {
                        tx.rollback().await?;
                        return Ok(Outcome::Duplicate);
                    }
                    if ps.base_asset_id == snapshot.asset_id {
                        tx.rollback().await?;
                        return self
                            .refund(snapshot, amount, "second leg repeats the first asset")
                            .await;
                    }

                    PaymentStateStore::fill_quote_leg(
                        &mut *tx,
                        order_id,
                        snapshot.asset_id,
                        amount,
                        snapshot.snapshot_id,
                    )
                    .await?;

                    // Balances line up with the pair, not arrival order.
                    let (balance_a, balance_b) = if ps.base_asset_id == pair.base_asset_id {
                        (ps.base_asset_amount, amount)
                    } else {
                        (amount, ps.base_asset_amount)
                    };
                    self.create_order(
                        &mut tx, payload, order_id, &pair, balance_a, balance_b, snapshot,
                    )
                    .await?;
                    tx.commit().await?;

                    info!(
                        order_id = %order_id,
                        strategy = %payload.trading_type,
                        balance_a = %balance_a,
                        balance_b = %balance_b,
                        "Both legs funded, order created"
                    );
                    return Ok(Outcome::OrderCreated(order_id));
                }
                Some(_) => {
                    tx.rollback().await?;
                    return Ok(Outcome::Duplicate);
                }
            }
        }
        Err(ReconcileError::LegConflict(order_id))
    }

    async fn create_order(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        payload: &MemoPayload,
        order_id: OrderId,
        pair: &TradingPair,
        balance_a: Decimal,
        balance_b: Decimal,
        snapshot: &Snapshot,
    ) -> Result<(), ReconcileError> {
        let now = Utc::now();
        let reward_address = payload.reward_address.map(|a| a.to_string());
        match payload.trading_type {
            TradingType::Arbitrage => {
                ArbitrageOrderStore::insert(
                    &mut **tx,
                    &ArbitrageOrder {
                        order_id,
                        user_id: snapshot.opponent_id,
                        pair_id: pair.pair_id,
                        symbol: pair.symbol.clone(),
                        amount_to_trade: self.defaults.arbitrage_amount_to_trade,
                        min_profitability: self.defaults.arbitrage_min_profitability_pct,
                        exchange_a_name: pair.exchange_ids[0].clone(),
                        exchange_b_name: pair.exchange_ids[1].clone(),
                        balance_a,
                        balance_b,
                        state: OrderState::Created,
                        reward_address,
                        created_at: now,
                        updated_at: now,
                    },
                )
                .await?;
            }
            TradingType::MarketMaking => {
                MarketMakingOrderStore::insert(
                    &mut **tx,
                    &MarketMakingOrder {
                        order_id,
                        user_id: snapshot.opponent_id,
                        pair_id: pair.pair_id,
                        symbol: pair.symbol.clone(),
                        exchange_name: pair.exchange_ids[0].clone(),
                        bid_spread: self.defaults.mm_bid_spread_pct,
                        ask_spread: self.defaults.mm_ask_spread_pct,
                        order_amount: self.defaults.mm_order_amount,
                        order_refresh_secs: self.defaults.mm_order_refresh_secs as i64,
                        number_of_layers: self.defaults.mm_number_of_layers,
                        price_source_type: "mid_price".to_string(),
                        amount_change_per_layer: Decimal::ZERO,
                        amount_change_type: crate::orders::AmountChangeType::Percent,
                        ceiling_price: None,
                        floor_price: None,
                        balance_a,
                        balance_b,
                        state: OrderState::Created,
                        reward_address,
                        created_at: now,
                        updated_at: now,
                    },
                )
                .await?;
            }
            other => {
                // process() routes only two-leg types here
                warn!(order_id = %order_id, strategy = %other, "Unexpected strategy in two-leg path");
            }
        }
        Ok(())
    }

    async fn refund(
        &self,
        snapshot: &Snapshot,
        amount: Decimal,
        reason: &str,
    ) -> Result<Outcome, ReconcileError> {
        warn!(
            snapshot_id = %snapshot.snapshot_id,
            opponent_id = %snapshot.opponent_id,
            reason,
            "Refunding deposit"
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
        Ok(Outcome::Refunded(reason.to_string()))
    }
}
