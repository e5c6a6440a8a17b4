//! Market-Making Loop
//!
//! Requotes a ladder of resting bids and asks around the exchange's
//! own price every `order_refresh_secs`. Each cycle pulls the previous
//! ladder before placing the next one, so at most one generation of
//! quotes rests on the book.

use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};

use crate::clients::{ExchangeClient, ExchangeRegistry, OrderKind, OrderSide};
use crate::core_types::OrderId;
use crate::orders::state::OrderState;
use crate::orders::{AmountChangeType, MarketMakingOrder, MarketMakingOrderStore};

use super::history::{NewStrategyHistory, StrategyHistoryStore};
use super::key::{StrategyKey, StrategyKind};
use super::registry::StopSignal;
use super::{StrategyError, timing};

/// Per-layer order size. Layer 0 quotes the configured amount, each
/// further layer grows it by `change` percent or fixed units.
fn layer_amount(
    base: Decimal,
    change: Decimal,
    change_type: AmountChangeType,
    layer: i32,
) -> Decimal {
    match change_type {
        AmountChangeType::Percent => {
            let factor = Decimal::ONE + change / Decimal::ONE_HUNDRED;
            let mut amount = base;
            for _ in 0..layer {
                amount *= factor;
            }
            amount
        }
        AmountChangeType::Fixed => base + change * Decimal::from(layer),
    }
}

/// Quotes never cross the configured floor or ceiling.
fn clamp_price(price: Decimal, floor: Option<Decimal>, ceiling: Option<Decimal>) -> Decimal {
    let mut clamped = price;
    if let Some(f) = floor {
        clamped = clamped.max(f);
    }
    if let Some(c) = ceiling {
        clamped = clamped.min(c);
    }
    clamped
}

pub struct MarketMakingLoop {
    orders: MarketMakingOrderStore,
    history: StrategyHistoryStore,
    exchanges: ExchangeRegistry,
    order_id: OrderId,
    jitter_pct: u8,
    /// Exchange order ids of the resting ladder.
    open_quotes: Mutex<Vec<String>>,
}

impl MarketMakingLoop {
    pub fn new(
        orders: MarketMakingOrderStore,
        history: StrategyHistoryStore,
        exchanges: ExchangeRegistry,
        order_id: OrderId,
        jitter_pct: u8,
    ) -> Self {
        Self {
            orders,
            history,
            exchanges,
            order_id,
            jitter_pct,
            open_quotes: Mutex::new(Vec::new()),
        }
    }

    pub async fn run(self, mut stop: StopSignal) {
        info!(order_id = %self.order_id, "Market-making loop starting");
        let mut last_seen: Option<MarketMakingOrder> = None;
        loop {
            if stop.is_stopped() {
                break;
            }
            let order = match self.orders.get(self.order_id).await {
                Ok(Some(o)) => o,
                Ok(None) => {
                    warn!(order_id = %self.order_id, "Market-making order row disappeared");
                    break;
                }
                Err(e) => {
                    error!(order_id = %self.order_id, error = %e, "Market-making order load failed");
                    tokio::select! {
                        _ = sleep(Duration::from_secs(5)) => {}
                        _ = stop.stopped() => break,
                    }
                    continue;
                }
            };
            if order.state != OrderState::Running {
                info!(
                    order_id = %self.order_id,
                    state = %order.state,
                    "Market-making order no longer running, loop exiting"
                );
                last_seen = Some(order);
                break;
            }

            let interval = Duration::from_secs(order.order_refresh_secs.max(1) as u64);
            let delay = match self.run_cycle(&order).await {
                Ok(placed) => {
                    debug!(order_id = %self.order_id, quotes = placed, "Ladder refreshed");
                    timing::jittered(interval, self.jitter_pct)
                }
                Err(e) => {
                    warn!(order_id = %self.order_id, error = %e, "Requote cycle failed");
                    timing::error_backoff(interval, self.jitter_pct)
                }
            };
            last_seen = Some(order);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = stop.stopped() => break,
            }
        }

        // Pull the resting ladder on the way out so no orphan quotes
        // keep trading a stopped strategy.
        if let Some(order) = last_seen {
            if let Ok(client) = self.exchanges.get(&order.exchange_name) {
                self.cancel_quotes(&client, &order.symbol).await;
            }
        }
        info!(order_id = %self.order_id, "Market-making loop exited");
    }

    /// One requote: cancel the previous ladder, read the price source,
    /// place `number_of_layers` bid/ask pairs around it. Returns the
    /// number of quotes placed.
    pub async fn run_cycle(&self, order: &MarketMakingOrder) -> Result<usize, StrategyError> {
        let client = self.exchanges.get(&order.exchange_name)?;
        self.cancel_quotes(&client, &order.symbol).await;

        let candles = client.fetch_ohlcv(&order.symbol, "1m", 1).await?;
        let mid = candles
            .last()
            .map(|c| c.close)
            .ok_or_else(|| StrategyError::NoPrice(order.symbol.clone()))?;
        if mid <= Decimal::ZERO {
            return Err(StrategyError::NoPrice(order.symbol.clone()));
        }

        let mut placed = Vec::new();
        for layer in 0..order.number_of_layers.max(1) {
            let amount = layer_amount(
                order.order_amount,
                order.amount_change_per_layer,
                order.amount_change_type,
                layer,
            );
            // Spreads widen linearly with the layer index.
            let step = Decimal::from(layer + 1);
            let bid = clamp_price(
                mid * (Decimal::ONE_HUNDRED - order.bid_spread * step) / Decimal::ONE_HUNDRED,
                order.floor_price,
                order.ceiling_price,
            );
            let ask = clamp_price(
                mid * (Decimal::ONE_HUNDRED + order.ask_spread * step) / Decimal::ONE_HUNDRED,
                order.floor_price,
                order.ceiling_price,
            );

            let bid_id = client
                .place_order(&order.symbol, OrderKind::Limit, OrderSide::Buy, amount, Some(bid))
                .await?;
            let ask_id = client
                .place_order(&order.symbol, OrderKind::Limit, OrderSide::Sell, amount, Some(ask))
                .await?;
            placed.push(bid_id);
            placed.push(ask_id);
        }

        let count = placed.len();
        self.open_quotes.lock().unwrap().extend(placed);

        let key = StrategyKey::new(StrategyKind::MarketMaking, order.user_id, order.order_id);
        self.history
            .insert(&NewStrategyHistory {
                strategy_key: key.to_string(),
                user_id: order.user_id,
                client_id: order.order_id,
                action: "requote".to_string(),
                base_amount: Some(order.order_amount),
                quote_amount: None,
                price: Some(mid),
                tx_ref: None,
                detail: Some(format!(
                    "{} layers on {} around {mid}",
                    order.number_of_layers.max(1),
                    order.exchange_name
                )),
            })
            .await?;

        debug!(
            order_id = %order.order_id,
            mid = %mid,
            quotes = count,
            "Ladder placed"
        );
        Ok(count)
    }

    /// Cancels every tracked quote. Ids whose cancel fails stay
    /// tracked and are retried on the next refresh.
    async fn cancel_quotes(&self, client: &Arc<dyn ExchangeClient>, symbol: &str) {
        let ids: Vec<String> = {
            let mut quotes = self.open_quotes.lock().unwrap();
            quotes.drain(..).collect()
        };
        let mut kept = Vec::new();
        for id in ids {
            if let Err(e) = client.cancel_order(&id, symbol).await {
                warn!(exchange_order_id = %id, error = %e, "Quote cancel failed");
                kept.push(id);
            }
        }
        if !kept.is_empty() {
            self.open_quotes.lock().unwrap().extend(kept);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MockExchange;
    use crate::db::tests::create_test_pool;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_layer_amount_grows_by_percent() {
        let base = Decimal::from(10);
        let change = Decimal::from(50);
        assert_eq!(
            layer_amount(base, change, AmountChangeType::Percent, 0),
            Decimal::from(10)
        );
        assert_eq!(
            layer_amount(base, change, AmountChangeType::Percent, 1),
            Decimal::from(15)
        );
        assert_eq!(
            layer_amount(base, change, AmountChangeType::Percent, 2),
            Decimal::new(225, 1)
        );
    }

    #[test]
    fn test_layer_amount_grows_by_fixed_step() {
        let base = Decimal::from(10);
        let change = Decimal::from(2);
        assert_eq!(
            layer_amount(base, change, AmountChangeType::Fixed, 0),
            Decimal::from(10)
        );
        assert_eq!(
            layer_amount(base, change, AmountChangeType::Fixed, 3),
            Decimal::from(16)
        );
    }

    #[test]
    fn test_clamp_price_honors_floor_and_ceiling() {
        let floor = Some(Decimal::from(95));
        let ceiling = Some(Decimal::from(105));
        assert_eq!(clamp_price(Decimal::from(90), floor, ceiling), Decimal::from(95));
        assert_eq!(clamp_price(Decimal::from(110), floor, ceiling), Decimal::from(105));
        assert_eq!(clamp_price(Decimal::from(100), floor, ceiling), Decimal::from(100));
        assert_eq!(clamp_price(Decimal::from(90), None, None), Decimal::from(90));
    }

    fn sample_order(exchange: &str) -> MarketMakingOrder {
        let now = Utc::now();
        MarketMakingOrder {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            pair_id: Uuid::new_v4(),
            symbol: "ETH/USDT".to_string(),
            exchange_name: exchange.to_string(),
            bid_spread: Decimal::new(2, 1),
            ask_spread: Decimal::new(2, 1),
            order_amount: Decimal::ONE,
            order_refresh_secs: 30,
            number_of_layers: 2,
            price_source_type: "mid_price".to_string(),
            amount_change_per_layer: Decimal::from(10),
            amount_change_type: AmountChangeType::Percent,
            ceiling_price: None,
            floor_price: None,
            balance_a: Decimal::from(5),
            balance_b: Decimal::from(10_000),
            state: OrderState::Running,
            reward_address: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_refresh_replaces_previous_ladder() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let exchange = Arc::new(MockExchange::new("mm_quoter"));
        exchange.set_price("ETH/USDT", Decimal::from(2_000));

        let order = sample_order("mm_quoter");
        assert!(
            MarketMakingOrderStore::insert(&pool, &order)
                .await
                .unwrap()
        );
        let mut exchanges = ExchangeRegistry::new();
        exchanges.register(exchange.clone());
        let looper = MarketMakingLoop::new(
            MarketMakingOrderStore::new(pool.clone()),
            StrategyHistoryStore::new(pool.clone()),
            exchanges,
            order.order_id,
            0,
        );

        // Two layers, bid and ask each.
        assert_eq!(looper.run_cycle(&order).await.unwrap(), 4);
        assert_eq!(exchange.place_count(), 4);
        assert_eq!(exchange.cancel_count(), 0);

        // The second refresh pulls the first ladder before quoting.
        assert_eq!(looper.run_cycle(&order).await.unwrap(), 4);
        assert_eq!(exchange.place_count(), 8);
        assert_eq!(exchange.cancel_count(), 4);

        let key = StrategyKey::new(StrategyKind::MarketMaking, order.user_id, order.order_id);
        let rows = StrategyHistoryStore::new(pool)
            .list_recent(&key.to_string(), 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.action == "requote"));
    }
}
