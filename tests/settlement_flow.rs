//! End-to-end deposit flows through the public surface: snapshots come
//! in from a scripted source, orders and withdrawals come out of the
//! stores. Needs a reachable PostgreSQL; every test skips without
//! DATABASE_URL.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use tradewind::clients::{ExchangeRegistry, MockExchange, MockLedger};
use tradewind::config::StrategyDefaults;
use tradewind::db::Database;
use tradewind::execution::{SpotIntake, SpotWorker};
use tradewind::jobs::{JobQueue, JobRunner};
use tradewind::memo::{
    MemoAction, MemoPayload, RewardAddress, TextMemo, TradingType, encode_binary, encode_text,
};
use tradewind::orders::{ArbitrageOrderStore, OrderState, SpotOrderStore};
use tradewind::reconcile::payment::{PaymentStateStore, PaymentStatus};
use tradewind::reconcile::{PairRegistry, ReconcileEngine, TradingPair};
use tradewind::settlement::{MockSnapshotSource, SettlementListener, Snapshot};
use tradewind::withdrawal::{
    ProcessWithdrawalHandler, WithdrawalKind, WithdrawalService, WithdrawalStatus, WithdrawalStore,
};

/// Sibling of the in-crate pool helper: skip when no database is
/// reachable, bootstrap the schema when one is.
async fn create_test_pool() -> Option<sqlx::PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let db = Database::connect(&url).await.ok()?;
    db.ensure_schema().await.ok()?;
    Some(db.pool().clone())
}

fn snapshot(asset_id: Uuid, amount: &str, memo: String) -> Snapshot {
    Snapshot {
        trace_id: Uuid::new_v4(),
        snapshot_id: Uuid::new_v4(),
        asset_id,
        amount: amount.to_string(),
        opponent_id: Uuid::new_v4(),
        memo,
        created_at: Utc::now(),
    }
}

async fn seed_pair(pool: &sqlx::PgPool, exchange: &str) -> TradingPair {
    let pair = TradingPair {
        pair_id: Uuid::new_v4(),
        symbol: "BTC/USDT".to_string(),
        base_asset_id: Uuid::new_v4(),
        quote_asset_id: Uuid::new_v4(),
        exchange_ids: vec![exchange.to_string()],
        enabled: true,
    };
    PairRegistry::new(pool.clone()).upsert(&pair).await.unwrap();
    pair
}

struct Flow {
    source: Arc<MockSnapshotSource>,
    listener: SettlementListener,
    exchange: Arc<MockExchange>,
}

/// Full listener wiring against one mock exchange and a scripted
/// snapshot source, with a fresh cursor per test.
fn flow(pool: sqlx::PgPool, exchange_name: &str) -> Flow {
    let exchange = Arc::new(MockExchange::new(exchange_name));
    let mut exchanges = ExchangeRegistry::new();
    exchanges.register(exchange.clone());
    let source = Arc::new(MockSnapshotSource::new());
    let engine = ReconcileEngine::new(
        pool.clone(),
        WithdrawalService::new(pool.clone()),
        StrategyDefaults::default(),
    );
    let intake = SpotIntake::new(
        SpotOrderStore::new(pool.clone()),
        PairRegistry::new(pool.clone()),
        exchanges,
        WithdrawalService::new(pool.clone()),
    );
    let listener = SettlementListener::new(
        pool,
        source.clone(),
        engine,
        intake,
        &format!("flow-{}", Uuid::new_v4()),
        Duration::from_millis(50),
    );
    Flow {
        source,
        listener,
        exchange,
    }
}

#[tokio::test]
async fn arbitrage_legs_fold_into_one_order() {
    let Some(pool) = create_test_pool().await else {
        return;
    };
    let f = flow(pool.clone(), "flow_arb");
    let pair = seed_pair(&pool, "flow_arb").await;

    let order_id = Uuid::new_v4();
    let reward = RewardAddress([0x42; 20]);
    let memo = encode_binary(&MemoPayload {
        version: 1,
        trading_type: TradingType::Arbitrage,
        action: MemoAction::Create,
        refs: vec![order_id, pair.pair_id],
        reward_address: Some(reward),
    });

    // First leg funds the pair's base asset. No order yet.
    let base_leg = snapshot(pair.base_asset_id, "10", memo.clone());
    f.source.push_batch(vec![base_leg.clone()]);
    assert_eq!(f.listener.poll_once().await.unwrap(), 1);
    let orders = ArbitrageOrderStore::new(pool.clone());
    assert!(orders.get(order_id).await.unwrap().is_none());

    // Second leg completes the payment and creates the order.
    f.source
        .push_batch(vec![snapshot(pair.quote_asset_id, "10", memo.clone())]);
    assert_eq!(f.listener.poll_once().await.unwrap(), 1);

    let order = orders
        .get(order_id)
        .await
        .unwrap()
        .expect("order created on second leg");
    assert_eq!(order.state, OrderState::Created);
    assert_eq!(order.pair_id, pair.pair_id);
    assert_eq!(order.symbol, "BTC/USDT");
    assert_eq!(order.balance_a, Decimal::from(10));
    assert_eq!(order.balance_b, Decimal::from(10));
    assert_eq!(order.reward_address.as_deref(), Some(reward.to_string().as_str()));

    let ps = PaymentStateStore::new(pool)
        .get(order_id)
        .await
        .unwrap()
        .expect("payment state");
    assert_eq!(ps.status, PaymentStatus::Completed);
    assert!(ps.has_quote_leg());

    // Redelivering the first leg changes nothing.
    f.source.push_batch(vec![base_leg]);
    assert_eq!(f.listener.poll_once().await.unwrap(), 0);
    let again = orders.get(order_id).await.unwrap().unwrap();
    assert_eq!(again.balance_a, Decimal::from(10));
}

#[tokio::test]
async fn unreadable_memo_refunds_through_the_job_queue() {
    let Some(pool) = create_test_pool().await else {
        return;
    };
    let f = flow(pool.clone(), "flow_refund");

    let deposit = snapshot(Uuid::new_v4(), "7.5", "!!not-a-memo!!".to_string());
    f.source.push_batch(vec![deposit.clone()]);
    assert_eq!(f.listener.poll_once().await.unwrap(), 1);

    let store = WithdrawalStore::new(pool.clone());
    let refund = store
        .get_by_snapshot(deposit.snapshot_id)
        .await
        .unwrap()
        .expect("refund recorded");
    assert_eq!(refund.kind, WithdrawalKind::Refund);
    assert_eq!(refund.amount, Decimal::new(75, 1));
    assert_eq!(refund.user_id, deposit.opponent_id);
    assert!(refund.memo.contains("unreadable memo"));
    assert_eq!(refund.status, WithdrawalStatus::Pending);

    // The runner moves the money over the ledger. Claims are oldest
    // first, so drain in passes until this job's turn comes up.
    let ledger = Arc::new(MockLedger::new());
    let mut runner = JobRunner::new(JobQueue::new(pool.clone()), Duration::from_millis(50), 10);
    runner.register(Arc::new(ProcessWithdrawalHandler::new(
        WithdrawalStore::new(pool.clone()),
        ledger.clone(),
    )));
    let mut sent = refund.clone();
    for _ in 0..20 {
        runner.run_once().await.unwrap();
        sent = store.get(refund.id).await.unwrap().unwrap();
        if sent.status != WithdrawalStatus::Pending {
            break;
        }
    }
    assert_eq!(sent.status, WithdrawalStatus::Sent);
    assert!(sent.ledger_tx_id.is_some());
    assert!(
        ledger
            .transfers()
            .iter()
            .any(|t| t.opponent_id == deposit.opponent_id && t.amount == Decimal::new(75, 1))
    );
}

#[tokio::test]
async fn spot_deposit_places_fills_and_releases() {
    let Some(pool) = create_test_pool().await else {
        return;
    };
    let f = flow(pool.clone(), "flow_spot");
    let pair = seed_pair(&pool, "flow_spot").await;

    let memo = encode_text(&TextMemo {
        trading_type: TradingType::Spot,
        action: MemoAction::Create,
        fields: vec![
            "flow_spot".to_string(),
            "M".to_string(),
            "B".to_string(),
            pair.pair_id.to_string(),
        ],
    });
    let deposit = snapshot(pair.quote_asset_id, "250", memo);
    f.source.push_batch(vec![deposit.clone()]);
    assert_eq!(f.listener.poll_once().await.unwrap(), 1);

    // The intake keyed the order on the transfer trace and placed it.
    let spot = SpotOrderStore::new(pool.clone());
    let order = spot
        .get(deposit.trace_id)
        .await
        .unwrap()
        .expect("spot order");
    assert_eq!(order.snapshot_id, deposit.snapshot_id);
    assert_eq!(order.amount, Decimal::from(250));
    let exchange_order_id = order.exchange_order_id.clone().expect("placed on intake");

    // The venue fills it for 5 base units; one worker sweep records the
    // fill and requests the proceeds release.
    f.exchange
        .fill_order(&exchange_order_id, Decimal::from(5), Decimal::from(50));
    let mut exchanges = ExchangeRegistry::new();
    exchanges.register(f.exchange.clone());
    let worker = SpotWorker::new(
        spot.clone(),
        exchanges,
        WithdrawalService::new(pool.clone()),
        Duration::from_secs(5),
    );
    worker.poll_once().await.unwrap();

    let release = WithdrawalStore::new(pool)
        .get_by_snapshot(deposit.snapshot_id)
        .await
        .unwrap()
        .expect("proceeds release");
    assert_eq!(release.kind, WithdrawalKind::Release);
    assert_eq!(release.asset_id, order.target_asset_id);
    assert_eq!(release.amount, Decimal::from(5));
    assert_eq!(release.user_id, deposit.opponent_id);
}
