//! Strategy Scheduler
//!
//! Periodically sweeps the order tables and spawns a loop for every
//! strategy that should be running but has none. Claiming an order is
//! a state CAS, so two scheduler instances sharing the database cannot
//! both adopt it; rows already in `running` with no registered loop
//! are adoptions after a restart. Stopping goes through here too so
//! the loop teardown and the release of custodied balances stay in one
//! place.

use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clients::{DexAdapter, ExchangeRegistry};
use crate::config::StrategyDefaults;
use crate::core_types::{OrderId, PairId, UserId};
use crate::orders::state::OrderState;
use crate::orders::{
    ArbitrageOrder, ArbitrageOrderStore, MarketMakingOrder, MarketMakingOrderStore,
    SimplyGrowOrder, SimplyGrowOrderStore,
};
use crate::reconcile::{PairRegistry, PaymentStateStore};
use crate::withdrawal::WithdrawalService;

use super::arbitrage::ArbitrageLoop;
use super::history::StrategyHistoryStore;
use super::key::{StrategyKey, StrategyKind};
use super::market_making::MarketMakingLoop;
use super::registry::LoopRegistry;
use super::simply_grow::SimplyGrowLoop;
use super::volume::{VolumeBot, VolumeStrategy, VolumeStrategyStore};
use super::StrategyError;

/// States a scan considers. Terminal rows never respawn.
const SCANNED_STATES: [OrderState; 3] = [
    OrderState::Created,
    OrderState::Paused,
    OrderState::Running,
];

pub struct StrategyScheduler {
    arbitrage: ArbitrageOrderStore,
    market_making: MarketMakingOrderStore,
    simply_grow: SimplyGrowOrderStore,
    volumes: VolumeStrategyStore,
    pairs: PairRegistry,
    payments: PaymentStateStore,
    history: StrategyHistoryStore,
    exchanges: ExchangeRegistry,
    dex: Arc<dyn DexAdapter>,
    withdrawals: WithdrawalService,
    registry: Arc<LoopRegistry>,
    defaults: StrategyDefaults,
    scan_interval: Duration,
}

impl StrategyScheduler {
    pub fn new(
        pool: PgPool,
        exchanges: ExchangeRegistry,
        dex: Arc<dyn DexAdapter>,
        defaults: StrategyDefaults,
        scan_interval: Duration,
    ) -> Self {
        Self {
            arbitrage: ArbitrageOrderStore::new(pool.clone()),
            market_making: MarketMakingOrderStore::new(pool.clone()),
            simply_grow: SimplyGrowOrderStore::new(pool.clone()),
            volumes: VolumeStrategyStore::new(pool.clone()),
            pairs: PairRegistry::new(pool.clone()),
            payments: PaymentStateStore::new(pool.clone()),
            history: StrategyHistoryStore::new(pool.clone()),
            exchanges,
            dex,
            withdrawals: WithdrawalService::new(pool),
            registry: Arc::new(LoopRegistry::new()),
            defaults,
            scan_interval,
        }
    }

    pub fn registry(&self) -> Arc<LoopRegistry> {
        self.registry.clone()
    }

    pub async fn run(&self) {
        info!(interval = ?self.scan_interval, "Strategy scheduler starting");
        loop {
            match self.scan_once().await {
                Ok(0) => {}
                Ok(n) => info!(count = n, "Strategy loops started"),
                Err(e) => error!(error = %e, "Strategy scan failed"),
            }
            sleep(self.scan_interval).await;
        }
    }

    /// One sweep over all strategy tables. Returns how many loops were
    /// started. A failure on one row never blocks the rest.
    pub async fn scan_once(&self) -> Result<usize, StrategyError> {
        let reaped = self.registry.reap_finished();
        if reaped > 0 {
            debug!(count = reaped, "Finished loops reaped");
        }

        let mut started = 0;
        for order in self.arbitrage.list_by_states(&SCANNED_STATES).await? {
            match self.start_arbitrage_loop(&order).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "Arbitrage loop start failed");
                }
            }
        }
        for order in self.market_making.list_by_states(&SCANNED_STATES).await? {
            match self.start_market_making_loop(&order).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "Market-making loop start failed");
                }
            }
        }
        for order in self.simply_grow.list_by_states(&SCANNED_STATES).await? {
            match self.start_simply_grow_loop(&order).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "Simply-grow loop start failed");
                }
            }
        }
        for strategy in self.volumes.list_by_states(&SCANNED_STATES).await? {
            match self.start_volume_loop(&strategy).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(strategy_id = %strategy.id, error = %e, "Volume loop start failed");
                }
            }
        }
        Ok(started)
    }

    pub async fn start_arbitrage_loop(
        &self,
        order: &ArbitrageOrder,
    ) -> Result<bool, StrategyError> {
        let key = StrategyKey::new(StrategyKind::Arbitrage, order.user_id, order.order_id);
        if self.registry.contains(&key) {
            return Ok(false);
        }
        let claimed = match order.state {
            OrderState::Created => {
                self.arbitrage
                    .update_state_if(order.order_id, OrderState::Created, OrderState::Running)
                    .await?
            }
            OrderState::Paused => {
                self.arbitrage
                    .update_state_if(order.order_id, OrderState::Paused, OrderState::Running)
                    .await?
            }
            // A running row with no loop is an adoption after restart.
            OrderState::Running => true,
            _ => false,
        };
        if !claimed {
            return Ok(false);
        }
        let looper = ArbitrageLoop::new(
            self.arbitrage.clone(),
            self.history.clone(),
            self.exchanges.clone(),
            order.order_id,
            Duration::from_secs(self.defaults.arbitrage_interval_secs),
            self.defaults.loop_jitter_pct,
        );
        let started = self.registry.start(key, |stop| tokio::spawn(looper.run(stop)));
        if started {
            info!(order_id = %order.order_id, "Arbitrage loop started");
        }
        Ok(started)
    }

    pub async fn start_market_making_loop(
        &self,
        order: &MarketMakingOrder,
    ) -> Result<bool, StrategyError> {
        let key = StrategyKey::new(StrategyKind::MarketMaking, order.user_id, order.order_id);
        if self.registry.contains(&key) {
            return Ok(false);
        }
        let claimed = match order.state {
            OrderState::Created => {
                self.market_making
                    .update_state_if(order.order_id, OrderState::Created, OrderState::Running)
                    .await?
            }
            OrderState::Paused => {
                self.market_making
                    .update_state_if(order.order_id, OrderState::Paused, OrderState::Running)
                    .await?
            }
            OrderState::Running => true,
            _ => false,
        };
        if !claimed {
            return Ok(false);
        }
        let looper = MarketMakingLoop::new(
            self.market_making.clone(),
            self.history.clone(),
            self.exchanges.clone(),
            order.order_id,
            self.defaults.loop_jitter_pct,
        );
        let started = self.registry.start(key, |stop| tokio::spawn(looper.run(stop)));
        if started {
            info!(order_id = %order.order_id, "Market-making loop started");
        }
        Ok(started)
    }

    pub async fn start_simply_grow_loop(
        &self,
        order: &SimplyGrowOrder,
    ) -> Result<bool, StrategyError> {
        let key = StrategyKey::new(StrategyKind::SimplyGrow, order.user_id, order.order_id);
        if self.registry.contains(&key) {
            return Ok(false);
        }
        let claimed = match order.state {
            OrderState::Created => {
                self.simply_grow
                    .update_state_if(order.order_id, OrderState::Created, OrderState::Running)
                    .await?
            }
            OrderState::Paused => {
                self.simply_grow
                    .update_state_if(order.order_id, OrderState::Paused, OrderState::Running)
                    .await?
            }
            OrderState::Running => true,
            _ => false,
        };
        if !claimed {
            return Ok(false);
        }
        let looper = SimplyGrowLoop::new(self.simply_grow.clone(), order.order_id);
        let started = self.registry.start(key, |stop| tokio::spawn(looper.run(stop)));
        if started {
            info!(order_id = %order.order_id, "Simply-grow loop started");
        }
        Ok(started)
    }

    pub async fn start_volume_loop(&self, strategy: &VolumeStrategy) -> Result<bool, StrategyError> {
        let key = strategy.key();
        if self.registry.contains(&key) {
            return Ok(false);
        }
        let claimed = match strategy.state {
            OrderState::Created => {
                self.volumes
                    .update_state_if(strategy.id, OrderState::Created, OrderState::Running)
                    .await?
            }
            OrderState::Paused => {
                self.volumes
                    .update_state_if(strategy.id, OrderState::Paused, OrderState::Running)
                    .await?
            }
            OrderState::Running => true,
            _ => false,
        };
        if !claimed {
            return Ok(false);
        }
        let bot = VolumeBot::new(
            self.volumes.clone(),
            self.history.clone(),
            self.dex.clone(),
            strategy.id,
        );
        let started = self.registry.start(key, |stop| tokio::spawn(bot.run(stop)));
        if started {
            info!(strategy_id = %strategy.id, "Volume loop started");
        }
        Ok(started)
    }

    /// Stop a strategy: CAS the row to `stopped`, signal its loop and
    /// release whatever balance it still custodies. Returns false when
    /// the row was already terminal (releases are still retried then,
    /// they dedupe on the funding snapshot ids).
    pub async fn stop_order(&self, kind: StrategyKind, id: Uuid) -> Result<bool, StrategyError> {
        match kind {
            StrategyKind::Arbitrage => self.stop_arbitrage(id).await,
            StrategyKind::MarketMaking => self.stop_market_making(id).await,
            StrategyKind::SimplyGrow => self.stop_simply_grow(id).await,
            StrategyKind::Volume => self.stop_volume(id).await,
        }
    }

    async fn stop_arbitrage(&self, order_id: OrderId) -> Result<bool, StrategyError> {
        let Some(order) = self.arbitrage.get(order_id).await? else {
            return Ok(false);
        };
        let claimed = match order.state {
            s @ (OrderState::Created | OrderState::Paused | OrderState::Running) => {
                self.arbitrage
                    .update_state_if(order_id, s, OrderState::Stopped)
                    .await?
            }
            _ => false,
        };
        if claimed {
            self.registry
                .stop(&StrategyKey::new(StrategyKind::Arbitrage, order.user_id, order_id));
            info!(order_id = %order_id, "Arbitrage order stopped");
        }
        if claimed || order.state == OrderState::Stopped {
            self.release_pair_balances(
                order_id,
                order.user_id,
                order.pair_id,
                order.balance_a,
                order.balance_b,
                order.reward_address.clone(),
            )
            .await?;
        }
        Ok(claimed)
    }

    async fn stop_market_making(&self, order_id: OrderId) -> Result<bool, StrategyError> {
        let Some(order) = self.market_making.get(order_id).await? else {
            return Ok(false);
        };
        let claimed = match order.state {
            s @ (OrderState::Created | OrderState::Paused | OrderState::Running) => {
                self.market_making
                    .update_state_if(order_id, s, OrderState::Stopped)
                    .await?
            }
            _ => false,
        };
        if claimed {
            self.registry.stop(&StrategyKey::new(
                StrategyKind::MarketMaking,
                order.user_id,
                order_id,
            ));
            info!(order_id = %order_id, "Market-making order stopped");
        }
        if claimed || order.state == OrderState::Stopped {
            self.release_pair_balances(
                order_id,
                order.user_id,
                order.pair_id,
                order.balance_a,
                order.balance_b,
                order.reward_address.clone(),
            )
            .await?;
        }
        Ok(claimed)
    }

    async fn stop_simply_grow(&self, order_id: OrderId) -> Result<bool, StrategyError> {
        let Some(order) = self.simply_grow.get(order_id).await? else {
            return Ok(false);
        };
        let claimed = match order.state {
            s @ (OrderState::Created | OrderState::Paused | OrderState::Running) => {
                self.simply_grow
                    .update_state_if(order_id, s, OrderState::Stopped)
                    .await?
            }
            _ => false,
        };
        if claimed {
            self.registry
                .stop(&StrategyKey::new(StrategyKind::SimplyGrow, order.user_id, order_id));
            info!(order_id = %order_id, "Simply-grow order stopped");
        }
        if (claimed || order.state == OrderState::Stopped) && order.amount > Decimal::ZERO {
            let snapshot = self
                .payments
                .get(order_id)
                .await?
                .map(|ps| ps.base_asset_snapshot_id);
            self.withdrawals
                .request_release(
                    order.user_id,
                    order.asset_id,
                    order.amount,
                    snapshot,
                    order.reward_address.clone(),
                    &format!("strategy release: {order_id}"),
                )
                .await?;
        }
        Ok(claimed)
    }

    // Volume cycles spend from the user's own signer wallets, so there
    // is no custodied balance to release.
    async fn stop_volume(&self, id: Uuid) -> Result<bool, StrategyError> {
        let Some(strategy) = self.volumes.get(id).await? else {
            return Ok(false);
        };
        let claimed = match strategy.state {
            s @ (OrderState::Created | OrderState::Paused | OrderState::Running) => {
                self.volumes.update_state_if(id, s, OrderState::Stopped).await?
            }
            _ => false,
        };
        if claimed {
            self.registry.stop(&strategy.key());
            info!(strategy_id = %id, "Volume strategy stopped");
        }
        Ok(claimed)
    }

    /// Release both pair balances back to the user, each keyed on the
    /// deposit leg that funded its asset. `balance_a` is always the
    /// pair's base asset, while the payment legs are recorded in
    /// arrival order, so the legs may need swapping.
    async fn release_pair_balances(
        &self,
        order_id: OrderId,
        user_id: UserId,
        pair_id: PairId,
        balance_a: Decimal,
        balance_b: Decimal,
        reward_address: Option<String>,
    ) -> Result<(), StrategyError> {
        let Some(pair) = self.pairs.get(pair_id).await? else {
            // A disabled pair must not swallow the release silently.
            return Err(StrategyError::UnknownPair(pair_id));
        };
        let Some(ps) = self.payments.get(order_id).await? else {
            warn!(order_id = %order_id, "No payment legs recorded, nothing to release");
            return Ok(());
        };
        let (base_snapshot, quote_snapshot) = if ps.base_asset_id == pair.base_asset_id {
            (Some(ps.base_asset_snapshot_id), ps.quote_asset_snapshot_id)
        } else {
            (ps.quote_asset_snapshot_id, Some(ps.base_asset_snapshot_id))
        };

        let memo = format!("strategy release: {order_id}");
        if balance_a > Decimal::ZERO {
            self.withdrawals
                .request_release(
                    user_id,
                    pair.base_asset_id,
                    balance_a,
                    base_snapshot,
                    reward_address.clone(),
                    &memo,
                )
                .await?;
        }
        if balance_b > Decimal::ZERO {
            self.withdrawals
                .request_release(
                    user_id,
                    pair.quote_asset_id,
                    balance_b,
                    quote_snapshot,
                    reward_address,
                    &memo,
                )
                .await?;
        }
        Ok(())
    }
}
