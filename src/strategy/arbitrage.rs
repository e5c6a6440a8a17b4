//! Arbitrage Loop
//!
//! Watches the same symbol on two exchanges and fires one bounded
//! buy/sell pair whenever the cross-exchange spread clears the order's
//! minimum profitability. No other trigger exists; the stored
//! parameters are the whole strategy.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};

use crate::clients::{ExchangeClient, ExchangeRegistry, OrderKind, OrderSide};
use crate::core_types::OrderId;
use crate::orders::state::OrderState;
use crate::orders::{ArbitrageOrder, ArbitrageOrderStore};

use super::history::{NewStrategyHistory, StrategyHistoryStore};
use super::key::{StrategyKey, StrategyKind};
use super::registry::StopSignal;
use super::{StrategyError, timing};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbOutcome {
    Traded { amount: Decimal, spread_pct: Decimal },
    /// Spread below the order's minimum profitability.
    NoEdge,
    /// Balances cannot fund even a partial clip.
    Starved,
}

pub struct ArbitrageLoop {
    orders: ArbitrageOrderStore,
    history: StrategyHistoryStore,
    exchanges: ExchangeRegistry,
    order_id: OrderId,
    interval: Duration,
    jitter_pct: u8,
}

impl ArbitrageLoop {
    pub fn new(
        orders: ArbitrageOrderStore,
        history: StrategyHistoryStore,
        exchanges: ExchangeRegistry,
        order_id: OrderId,
        interval: Duration,
        jitter_pct: u8,
    ) -> Self {
        Self {
            orders,
            history,
            exchanges,
            order_id,
            interval,
            jitter_pct,
        }
    }

    pub async fn run(self, mut stop: StopSignal) {
        info!(order_id = %self.order_id, "Arbitrage loop starting");
        loop {
            if stop.is_stopped() {
                break;
            }
            let order = match self.orders.get(self.order_id).await {
                Ok(Some(o)) => o,
                Ok(None) => {
                    warn!(order_id = %self.order_id, "Arbitrage order row disappeared");
                    break;
                }
                Err(e) => {
                    error!(order_id = %self.order_id, error = %e, "Arbitrage order load failed");
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
                    "Arbitrage order no longer running, loop exiting"
                );
                break;
            }

            let delay = match self.run_cycle(&order).await {
                Ok(outcome) => {
                    debug!(order_id = %self.order_id, outcome = ?outcome, "Arbitrage cycle done");
                    timing::jittered(self.interval, self.jitter_pct)
                }
                Err(e) => {
                    warn!(order_id = %self.order_id, error = %e, "Arbitrage cycle failed");
                    timing::error_backoff(self.interval, self.jitter_pct)
                }
            };
            tokio::select! {
                _ = sleep(delay) => {}
                _ = stop.stopped() => break,
            }
        }
        info!(order_id = %self.order_id, "Arbitrage loop exited");
    }

    pub async fn run_cycle(&self, order: &ArbitrageOrder) -> Result<ArbOutcome, StrategyError> {
        let a = self.exchanges.get(&order.exchange_a_name)?;
        let b = self.exchanges.get(&order.exchange_b_name)?;
        let price_a = self.top_of_book(&a, &order.symbol).await?;
        let price_b = self.top_of_book(&b, &order.symbol).await?;

        // Buy where it is cheap, sell where it is dear.
        let (buy, buy_price, sell, sell_price) = if price_a <= price_b {
            (&a, price_a, &b, price_b)
        } else {
            (&b, price_b, &a, price_a)
        };
        if buy_price <= Decimal::ZERO {
            return Err(StrategyError::NoPrice(order.symbol.clone()));
        }

        let spread_pct = (sell_price - buy_price) / buy_price * Decimal::ONE_HUNDRED;
        if spread_pct <= order.min_profitability {
            return Ok(ArbOutcome::NoEdge);
        }

        // The clip is bounded by the configured size, the base balance
        // backing the sell and the quote balance backing the buy.
        let amount = order
            .amount_to_trade
            .min(order.balance_a)
            .min(order.balance_b / buy_price);
        if amount <= Decimal::ZERO {
            warn!(order_id = %order.order_id, "Balances exhausted, no clip placed");
            return Ok(ArbOutcome::Starved);
        }

        let buy_id = buy
            .place_order(&order.symbol, OrderKind::Market, OrderSide::Buy, amount, None)
            .await?;
        let sell_id = sell
            .place_order(&order.symbol, OrderKind::Market, OrderSide::Sell, amount, None)
            .await?;

        // The base leg nets out across the two venues; the captured
        // edge lands in the quote balance.
        let edge = amount * (sell_price - buy_price);
        let new_balance_b = order.balance_b + edge;
        self.orders
            .update_balances(order.order_id, order.balance_a, new_balance_b)
            .await?;

        let key = StrategyKey::new(StrategyKind::Arbitrage, order.user_id, order.order_id);
        self.history
            .insert(&NewStrategyHistory {
                strategy_key: key.to_string(),
                user_id: order.user_id,
                client_id: order.order_id,
                action: "arbitrage".to_string(),
                base_amount: Some(amount),
                quote_amount: Some(edge),
                price: Some(buy_price),
                tx_ref: Some(format!("{buy_id}/{sell_id}")),
                detail: Some(format!(
                    "buy {} at {buy_price}, sell {} at {sell_price}",
                    buy.name(),
                    sell.name()
                )),
            })
            .await?;

        info!(
            order_id = %order.order_id,
            amount = %amount,
            spread_pct = %spread_pct,
            buy_exchange = %buy.name(),
            sell_exchange = %sell.name(),
            "Arbitrage pair executed"
        );
        Ok(ArbOutcome::Traded { amount, spread_pct })
    }

    async fn top_of_book(
        &self,
        client: &Arc<dyn ExchangeClient>,
        symbol: &str,
    ) -> Result<Decimal, StrategyError> {
        let candles = client.fetch_ohlcv(symbol, "1m", 1).await?;
        candles
            .last()
            .map(|c| c.close)
            .ok_or_else(|| StrategyError::NoPrice(symbol.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MockExchange;
    use crate::db::tests::create_test_pool;
    use chrono::Utc;
    use sqlx::PgPool;
    use uuid::Uuid;

    fn sample_order(exchange_a: &str, exchange_b: &str) -> ArbitrageOrder {
        let now = Utc::now();
        ArbitrageOrder {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            pair_id: Uuid::new_v4(),
            symbol: "BTC/USDT".to_string(),
            amount_to_trade: Decimal::new(1, 1),
            min_profitability: Decimal::new(5, 1),
            exchange_a_name: exchange_a.to_string(),
            exchange_b_name: exchange_b.to_string(),
            balance_a: Decimal::from(10),
            balance_b: Decimal::from(2_000),
            state: OrderState::Running,
            reward_address: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn arb_loop(
        pool: PgPool,
        a: Arc<MockExchange>,
        b: Arc<MockExchange>,
        order_id: OrderId,
    ) -> ArbitrageLoop {
        let mut exchanges = ExchangeRegistry::new();
        exchanges.register(a);
        exchanges.register(b);
        ArbitrageLoop::new(
            ArbitrageOrderStore::new(pool.clone()),
            StrategyHistoryStore::new(pool),
            exchanges,
            order_id,
            Duration::from_secs(10),
            20,
        )
    }

    #[tokio::test]
    async fn test_no_trade_below_min_profitability() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let a = Arc::new(MockExchange::new("arb_a_quiet"));
        let b = Arc::new(MockExchange::new("arb_b_quiet"));
        a.set_price("BTC/USDT", Decimal::from(100));
        b.set_price("BTC/USDT", Decimal::new(1004, 1)); // 0.4% < 0.5%

        let order = sample_order("arb_a_quiet", "arb_b_quiet");
        assert!(ArbitrageOrderStore::insert(&pool, &order).await.unwrap());
        let looper = arb_loop(pool, a.clone(), b.clone(), order.order_id);

        assert_eq!(looper.run_cycle(&order).await.unwrap(), ArbOutcome::NoEdge);
        assert_eq!(a.place_count(), 0);
        assert_eq!(b.place_count(), 0);
    }

    #[tokio::test]
    async fn test_spread_executes_bounded_pair() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let a = Arc::new(MockExchange::new("arb_a_edge"));
        let b = Arc::new(MockExchange::new("arb_b_edge"));
        a.set_price("BTC/USDT", Decimal::from(100));
        b.set_price("BTC/USDT", Decimal::from(103)); // 3% spread

        let order = sample_order("arb_a_edge", "arb_b_edge");
        assert!(ArbitrageOrderStore::insert(&pool, &order).await.unwrap());
        let looper = arb_loop(pool.clone(), a.clone(), b.clone(), order.order_id);

        let outcome = looper.run_cycle(&order).await.unwrap();
        assert_eq!(
            outcome,
            ArbOutcome::Traded {
                amount: Decimal::new(1, 1),
                spread_pct: Decimal::from(3),
            }
        );
        // Buy on the cheap venue, sell on the dear one.
        assert_eq!(a.place_count(), 1);
        assert_eq!(b.place_count(), 1);

        let updated = ArbitrageOrderStore::new(pool.clone())
            .get(order.order_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.balance_a, Decimal::from(10));
        // 0.1 clip times the 3 quote edge.
        assert_eq!(updated.balance_b, Decimal::from(2_000) + Decimal::new(3, 1));

        let key = StrategyKey::new(StrategyKind::Arbitrage, order.user_id, order.order_id);
        let rows = StrategyHistoryStore::new(pool)
            .list_recent(&key.to_string(), 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, "arbitrage");
        assert_eq!(rows[0].base_amount, Some(Decimal::new(1, 1)));
    }

    #[tokio::test]
    async fn test_exhausted_balances_starve_the_clip() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let a = Arc::new(MockExchange::new("arb_a_dry"));
        let b = Arc::new(MockExchange::new("arb_b_dry"));
        a.set_price("BTC/USDT", Decimal::from(100));
        b.set_price("BTC/USDT", Decimal::from(103));

        let order = ArbitrageOrder {
            balance_a: Decimal::ZERO,
            balance_b: Decimal::ZERO,
            ..sample_order("arb_a_dry", "arb_b_dry")
        };
        assert!(ArbitrageOrderStore::insert(&pool, &order).await.unwrap());
        let looper = arb_loop(pool, a.clone(), b.clone(), order.order_id);

        assert_eq!(looper.run_cycle(&order).await.unwrap(), ArbOutcome::Starved);
        assert_eq!(a.place_count(), 0);
        assert_eq!(b.place_count(), 0);
    }
}
