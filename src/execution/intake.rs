//! Spot Order Intake
//!
//! Spot create memos travel in the delimited text form:
//! `exchange : kind : side : pair_id [: limit_price]`. The order id is
//! the snapshot's trace id, so re-delivery maps to the same row.

use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::{ExchangeRegistry, OrderKind, OrderSide};
use crate::core_types::OrderId;
use crate::memo::TextMemo;
use crate::orders::state::SpotOrderState;
use crate::orders::{SpotOrder, SpotOrderStore};
use crate::reconcile::PairRegistry;
use crate::settlement::Snapshot;
use crate::withdrawal::WithdrawalService;

use super::ExecutionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpotOutcome {
    Created(OrderId),
    Duplicate,
    Refunded(String),
}

pub struct SpotIntake {
    spot_orders: SpotOrderStore,
    pairs: PairRegistry,
    exchanges: ExchangeRegistry,
    withdrawals: WithdrawalService,
}

/// Order parameters parsed out of the memo fields.
struct SpotRequest {
    exchange_name: String,
    kind: OrderKind,
    side: OrderSide,
    pair_id: Uuid,
    limit_price: Option<Decimal>,
}

fn parse_fields(fields: &[String]) -> Result<SpotRequest, String> {
    if fields.len() < 4 {
        return Err(format!("expected at least 4 memo fields, got {}", fields.len()));
    }
    let kind = OrderKind::from_name(&fields[1])
        .ok_or_else(|| format!("unknown order kind: {}", fields[1]))?;
    let side = OrderSide::from_name(&fields[2])
        .ok_or_else(|| format!("unknown order side: {}", fields[2]))?;
    let pair_id =
        Uuid::parse_str(&fields[3]).map_err(|_| format!("bad pair id: {}", fields[3]))?;
    let limit_price = match fields.get(4) {
        Some(raw) => Some(
            raw.parse::<Decimal>()
                .map_err(|_| format!("bad limit price: {raw}"))?,
        ),
        None => None,
    };
    if kind == OrderKind::Limit && limit_price.is_none() {
        return Err("limit order without a limit price".to_string());
    }
    Ok(SpotRequest {
        exchange_name: fields[0].clone(),
        kind,
        side,
        pair_id,
        limit_price,
    })
}

impl SpotIntake {
    pub fn new(
        spot_orders: SpotOrderStore,
        pairs: PairRegistry,
        exchanges: ExchangeRegistry,
        withdrawals: WithdrawalService,
    ) -> Self {
        Self {
            spot_orders,
            pairs,
            exchanges,
            withdrawals,
        }
    }

    pub async fn handle(
        &self,
        snapshot: &Snapshot,
        memo: &TextMemo,
    ) -> Result<SpotOutcome, ExecutionError> {
        let Some(amount) = snapshot.parse_amount().filter(|a| *a > Decimal::ZERO) else {
            warn!(snapshot_id = %snapshot.snapshot_id, "Spot deposit without usable amount");
            return Ok(SpotOutcome::Refunded("unusable amount".to_string()));
        };

        let request = match parse_fields(&memo.fields) {
            Ok(r) => r,
            Err(reason) => return self.refund(snapshot, amount, &reason).await,
        };

        let Some(pair) = self.pairs.get(request.pair_id).await? else {
            return self.refund(snapshot, amount, "unknown trading pair").await;
        };
        // Buys spend the quote asset, sells spend the base asset.
        let (funding_asset, target_asset) = match request.side {
            OrderSide::Buy => (pair.quote_asset_id, pair.base_asset_id),
            OrderSide::Sell => (pair.base_asset_id, pair.quote_asset_id),
        };
        if snapshot.asset_id != funding_asset {
            return self
                .refund(snapshot, amount, "deposit asset does not fund this side")
                .await;
        }
        if self.exchanges.get(&request.exchange_name).is_err() {
            return self
                .refund(
                    snapshot,
                    amount,
                    &format!("unknown exchange: {}", request.exchange_name),
                )
                .await;
        }

        let order_id = snapshot.trace_id;
        let now = chrono::Utc::now();
        let order = SpotOrder {
            order_id,
            snapshot_id: snapshot.snapshot_id,
            user_id: snapshot.opponent_id,
            exchange_name: request.exchange_name.clone(),
            order_kind: request.kind,
            side: request.side,
            state: SpotOrderState::Created,
            symbol: pair.symbol.clone(),
            amount,
            base_asset_id: funding_asset,
            target_asset_id: target_asset,
            api_key_id: None,
            limit_price: request.limit_price,
            exchange_order_id: None,
            filled_amount: Decimal::ZERO,
            avg_price: None,
            created_at: now,
            updated_at: now,
        };
        if !SpotOrderStore::insert(self.spot_orders.pool(), &order).await? {
            return Ok(SpotOutcome::Duplicate);
        }
        info!(
            order_id = %order_id,
            exchange = %request.exchange_name,
            symbol = %pair.symbol,
            side = %request.side.as_str(),
            amount = %amount,
            "Spot order created"
        );

        // Best effort; the poll worker retries placement for rows that
        // still have no exchange order id.
        if let Err(e) = place(&self.spot_orders, &self.exchanges, &order).await {
            warn!(order_id = %order_id, error = %e, "Initial order placement failed");
        }
        Ok(SpotOutcome::Created(order_id))
    }

    async fn refund(
        &self,
        snapshot: &Snapshot,
        amount: Decimal,
        reason: &str,
    ) -> Result<SpotOutcome, ExecutionError> {
        warn!(
            snapshot_id = %snapshot.snapshot_id,
            reason,
            "Refunding spot deposit"
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
        Ok(SpotOutcome::Refunded(reason.to_string()))
    }
}

/// Place an order on its exchange and attach the returned id. Shared by
/// the intake fast path and the poll worker's placement retry.
pub(super) async fn place(
    spot_orders: &SpotOrderStore,
    exchanges: &ExchangeRegistry,
    order: &SpotOrder,
) -> Result<(), ExecutionError> {
    let client = exchanges.get(&order.exchange_name)?;
    let exchange_order_id = client
        .place_order(
            &order.symbol,
            order.order_kind,
            order.side,
            order.amount,
            order.limit_price,
        )
        .await?;
    spot_orders
        .set_exchange_order(order.order_id, &exchange_order_id)
        .await?;
    info!(
        order_id = %order.order_id,
        exchange_order_id = %exchange_order_id,
        "Exchange order placed"
    );
    Ok(())
}
