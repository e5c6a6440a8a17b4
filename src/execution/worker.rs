//! Exchange Poll Worker
//!
//! Watches open spot orders by polling the exchange (fill webhooks are
//! treated as unreliable), records fill progress, and drives settlement:
//! filled orders release their proceeds back to the user, terminal
//! cancels refund the original deposit via the stored snapshot id.

use rust_decimal::Decimal;
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};

use crate::clients::{ExchangeOrderStatus, ExchangeRegistry, OrderSide};
use crate::core_types::AssetId;
use crate::orders::state::SpotOrderState;
use crate::orders::{SpotOrder, SpotOrderStore};
use crate::withdrawal::WithdrawalService;

use super::ExecutionError;
use super::intake;

pub struct SpotWorker {
    spot_orders: SpotOrderStore,
    exchanges: ExchangeRegistry,
    withdrawals: WithdrawalService,
    poll_interval: Duration,
}

impl SpotWorker {
    pub fn new(
        spot_orders: SpotOrderStore,
        exchanges: ExchangeRegistry,
        withdrawals: WithdrawalService,
        poll_interval: Duration,
    ) -> Self {
        Self {
            spot_orders,
            exchanges,
            withdrawals,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!(poll_interval = ?self.poll_interval, "Spot poll worker starting");
        loop {
            if let Err(e) = self.poll_once().await {
                error!(error = %e, "Spot poll sweep failed");
            }
            sleep(self.poll_interval).await;
        }
    }

    /// One full sweep: poll open orders for fills, then push every
    /// settled order through its release. All sweeps are scoped to the
    /// venues this worker has clients for; orders on other venues belong
    /// to another worker.
    pub async fn poll_once(&self) -> Result<(), ExecutionError> {
        let venues = self.exchanges.names();
        for order in self.spot_orders.list_fillable(&venues).await? {
            if let Err(e) = self.poll_order(&order).await {
                warn!(order_id = %order.order_id, error = %e, "Order poll failed");
            }
        }
        // Filled rows wait for their release to start; release_init rows
        // had theirs interrupted. Both sweeps are idempotent on the
        // withdrawal's snapshot key.
        for order in self
            .spot_orders
            .list_in_state(SpotOrderState::Filled, &venues)
            .await?
        {
            if let Err(e) = self.init_release(&order).await {
                warn!(order_id = %order.order_id, error = %e, "Release init failed");
            }
        }
        for order in self
            .spot_orders
            .list_in_state(SpotOrderState::ReleaseInit, &venues)
            .await?
        {
            if let Err(e) = self.send_release(&order).await {
                warn!(order_id = %order.order_id, error = %e, "Release request failed");
            }
        }
        Ok(())
    }

    async fn poll_order(&self, order: &SpotOrder) -> Result<(), ExecutionError> {
        let Some(exchange_order_id) = order.exchange_order_id.as_deref() else {
            // Initial placement failed at intake; retry it here.
            return intake::place(&self.spot_orders, &self.exchanges, order).await;
        };

        let client = self.exchanges.get(&order.exchange_name)?;
        let report = client.fetch_order(exchange_order_id, &order.symbol).await?;

        match report.status {
            ExchangeOrderStatus::Open => {}
            ExchangeOrderStatus::PartiallyFilled => {
                if report.filled_amount > order.filled_amount {
                    self.spot_orders
                        .record_fill(
                            order.order_id,
                            report.filled_amount,
                            report.avg_price,
                            SpotOrderState::PartiallyFilled,
                        )
                        .await?;
                    debug!(
                        order_id = %order.order_id,
                        filled = %report.filled_amount,
                        "Partial fill recorded"
                    );
                }
            }
            ExchangeOrderStatus::Filled => {
                self.spot_orders
                    .record_fill(
                        order.order_id,
                        report.filled_amount,
                        report.avg_price,
                        SpotOrderState::Filled,
                    )
                    .await?;
                info!(
                    order_id = %order.order_id,
                    filled = %report.filled_amount,
                    "Exchange order filled"
                );
            }
            ExchangeOrderStatus::Canceled
            | ExchangeOrderStatus::Rejected
            | ExchangeOrderStatus::Expired => {
                if self.spot_orders.mark_canceled(order.order_id).await? {
                    warn!(
                        order_id = %order.order_id,
                        status = ?report.status,
                        "Exchange order closed without fill, refunding deposit"
                    );
                    self.withdrawals
                        .request_refund(
                            order.user_id,
                            order.base_asset_id,
                            order.amount,
                            order.snapshot_id,
                            "exchange order canceled",
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Move a filled order into release and fire the withdrawal.
    async fn init_release(&self, order: &SpotOrder) -> Result<(), ExecutionError> {
        let Some((asset_id, amount)) = proceeds(order) else {
            // A sell without an average fill price cannot be settled.
            // The row stays in `filled` and is reported every sweep.
            warn!(
                order_id = %order.order_id,
                "Cannot compute proceeds, order held in filled state"
            );
            return Ok(());
        };
        if !self
            .spot_orders
            .update_state_if(order.order_id, SpotOrderState::Filled, SpotOrderState::ReleaseInit)
            .await?
        {
            return Ok(());
        }
        self.request_release(order, asset_id, amount).await
    }

    /// Re-request the release for an order already in `release_init`.
    /// The withdrawal insert is keyed on the funding snapshot, so a
    /// repeat after a crash lands on the existing row.
    async fn send_release(&self, order: &SpotOrder) -> Result<(), ExecutionError> {
        let Some((asset_id, amount)) = proceeds(order) else {
            warn!(order_id = %order.order_id, "Release pending without computable proceeds");
            return Ok(());
        };
        self.request_release(order, asset_id, amount).await
    }

    async fn request_release(
        &self,
        order: &SpotOrder,
        asset_id: AssetId,
        amount: Decimal,
    ) -> Result<(), ExecutionError> {
        let created = self
            .withdrawals
            .request_release(
                order.user_id,
                asset_id,
                amount,
                Some(order.snapshot_id),
                None,
                &format!("spot proceeds: {}", order.order_id),
            )
            .await?;
        if created.is_some() {
            info!(
                order_id = %order.order_id,
                asset_id = %asset_id,
                amount = %amount,
                "Spot proceeds release requested"
            );
        }
        Ok(())
    }
}

/// What the user gets back once the order filled. Buys hand over the
/// acquired base amount; sells hand over `filled × avg_price` in quote.
fn proceeds(order: &SpotOrder) -> Option<(AssetId, Decimal)> {
    if order.filled_amount <= Decimal::ZERO {
        return None;
    }
    match order.side {
        OrderSide::Buy => Some((order.target_asset_id, order.filled_amount)),
        OrderSide::Sell => order
            .avg_price
            .map(|price| (order.target_asset_id, order.filled_amount * price)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ExchangeClient, MockExchange, OrderKind};
    use crate::db::tests::create_test_pool;
    use crate::withdrawal::{WithdrawalKind, WithdrawalStore};
    use chrono::Utc;
    use sqlx::PgPool;
    use std::sync::Arc;
    use uuid::Uuid;

    fn sample_order(side: OrderSide, exchange: &str) -> SpotOrder {
        let now = Utc::now();
        SpotOrder {
            order_id: Uuid::new_v4(),
            snapshot_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            exchange_name: exchange.to_string(),
            order_kind: OrderKind::Market,
            side,
            state: SpotOrderState::Created,
            symbol: "BTC/USDT".to_string(),
            amount: Decimal::from(100),
            base_asset_id: Uuid::new_v4(),
            target_asset_id: Uuid::new_v4(),
            api_key_id: None,
            limit_price: None,
            exchange_order_id: None,
            filled_amount: Decimal::ZERO,
            avg_price: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn worker(pool: PgPool, exchange: Arc<MockExchange>) -> SpotWorker {
        let mut exchanges = ExchangeRegistry::new();
        exchanges.register(exchange);
        SpotWorker::new(
            SpotOrderStore::new(pool.clone()),
            exchanges,
            WithdrawalService::new(pool),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_fill_releases_proceeds() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let exchange = Arc::new(MockExchange::new("mock_fill_release"));
        let store = SpotOrderStore::new(pool.clone());
        let order = sample_order(OrderSide::Buy, "mock_fill_release");
        assert!(SpotOrderStore::insert(&pool, &order).await.unwrap());

        let worker = worker(pool.clone(), exchange.clone());

        // First sweep places the order on the exchange.
        worker.poll_once().await.unwrap();
        let placed = store.get(order.order_id).await.unwrap().unwrap();
        let exchange_order_id = placed.exchange_order_id.clone().unwrap();
        assert_eq!(exchange.place_count(), 1);

        // Script the fill, then sweep again: state walks filled ->
        // release_init and the release withdrawal appears.
        exchange.fill_order(&exchange_order_id, Decimal::from(2), Decimal::from(50));
        worker.poll_once().await.unwrap();

        let settled = store.get(order.order_id).await.unwrap().unwrap();
        assert_eq!(settled.state, SpotOrderState::ReleaseInit);
        assert_eq!(settled.filled_amount, Decimal::from(2));

        let withdrawal = WithdrawalStore::new(pool.clone())
            .get_by_snapshot(order.snapshot_id)
            .await
            .unwrap()
            .expect("release withdrawal");
        assert_eq!(withdrawal.kind, WithdrawalKind::Release);
        assert_eq!(withdrawal.asset_id, order.target_asset_id);
        assert_eq!(withdrawal.amount, Decimal::from(2));

        // Another sweep re-requests idempotently; still one withdrawal.
        worker.poll_once().await.unwrap();
        assert_eq!(
            WithdrawalStore::new(pool)
                .get_by_snapshot(order.snapshot_id)
                .await
                .unwrap()
                .unwrap()
                .id,
            withdrawal.id
        );
    }

    #[test]
    fn test_sell_proceeds_use_avg_price() {
        let order = SpotOrder {
            side: OrderSide::Sell,
            filled_amount: Decimal::from(3),
            avg_price: Some(Decimal::from(40)),
            ..sample_order(OrderSide::Sell, "mock")
        };
        let (asset, amount) = proceeds(&order).unwrap();
        assert_eq!(asset, order.target_asset_id);
        assert_eq!(amount, Decimal::from(120));

        let unpriced = SpotOrder {
            avg_price: None,
            ..order
        };
        assert!(proceeds(&unpriced).is_none());
    }

    #[tokio::test]
    async fn test_cancel_refunds_original_deposit() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let exchange = Arc::new(MockExchange::new("mock_cancel_refund"));
        let store = SpotOrderStore::new(pool.clone());
        let order = sample_order(OrderSide::Buy, "mock_cancel_refund");
        assert!(SpotOrderStore::insert(&pool, &order).await.unwrap());

        let worker = worker(pool.clone(), exchange.clone());
        worker.poll_once().await.unwrap();
        let exchange_order_id = store
            .get(order.order_id)
            .await
            .unwrap()
            .unwrap()
            .exchange_order_id
            .unwrap();

        exchange
            .cancel_order(&exchange_order_id, &order.symbol)
            .await
            .unwrap();
        worker.poll_once().await.unwrap();

        let canceled = store.get(order.order_id).await.unwrap().unwrap();
        assert_eq!(canceled.state, SpotOrderState::Canceled);

        let refund = WithdrawalStore::new(pool)
            .get_by_snapshot(order.snapshot_id)
            .await
            .unwrap()
            .expect("refund withdrawal");
        assert_eq!(refund.kind, WithdrawalKind::Refund);
        assert_eq!(refund.asset_id, order.base_asset_id);
        assert_eq!(refund.amount, Decimal::from(100));
        assert_eq!(refund.user_id, order.user_id);
    }

    #[tokio::test]
    async fn test_partial_fill_keeps_order_open() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let exchange = Arc::new(MockExchange::new("mock_partial"));
        let store = SpotOrderStore::new(pool.clone());
        let order = sample_order(OrderSide::Buy, "mock_partial");
        assert!(SpotOrderStore::insert(&pool, &order).await.unwrap());

        let worker = worker(pool.clone(), exchange.clone());
        worker.poll_once().await.unwrap();
        let exchange_order_id = store
            .get(order.order_id)
            .await
            .unwrap()
            .unwrap()
            .exchange_order_id
            .unwrap();

        exchange.partially_fill_order(&exchange_order_id, Decimal::from(1), Decimal::from(50));
        worker.poll_once().await.unwrap();

        let partial = store.get(order.order_id).await.unwrap().unwrap();
        assert_eq!(partial.state, SpotOrderState::PartiallyFilled);
        assert_eq!(partial.filled_amount, Decimal::from(1));
        assert!(
            WithdrawalStore::new(pool)
                .get_by_snapshot(order.snapshot_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_placement_retried_until_exchange_accepts() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let exchange = Arc::new(MockExchange::new("mock_replace"));
        exchange.set_fail_place(true);
        let store = SpotOrderStore::new(pool.clone());
        let order = sample_order(OrderSide::Buy, "mock_replace");
        assert!(SpotOrderStore::insert(&pool, &order).await.unwrap());

        let worker = worker(pool, exchange.clone());
        worker.poll_once().await.unwrap();
        assert!(
            store
                .get(order.order_id)
                .await
                .unwrap()
                .unwrap()
                .exchange_order_id
                .is_none()
        );

        exchange.set_fail_place(false);
        worker.poll_once().await.unwrap();
        assert!(
            store
                .get(order.order_id)
                .await
                .unwrap()
                .unwrap()
                .exchange_order_id
                .is_some()
        );
        assert_eq!(exchange.place_count(), 2);
    }
}
