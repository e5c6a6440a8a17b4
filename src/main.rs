//! Tradewind engine entry point.
//!
//! Wires the four long-running services around one PostgreSQL pool:
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌────────────┐
//! │ Snapshot │──▶│ Reconcile │──▶│ Strategy │──▶│ Withdrawal │
//! │ Listener │   │  Engine   │   │  Loops   │   │  Pipeline  │
//! └──────────┘   └───────────┘   └──────────┘   └────────────┘
//! ```
//!
//! The listener feeds deposits in, the scheduler keeps one loop per
//! running order, the spot worker polls exchange fills and the job
//! runner drives transfers out. Everything restarts from the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use tradewind::clients::{
    DexAdapter, ExchangeRegistry, LedgerClient, MockDex, MockExchange, MockLedger,
};
use tradewind::config::AppConfig;
use tradewind::db::Database;
use tradewind::execution::{SpotIntake, SpotWorker};
use tradewind::jobs::{JobQueue, JobRunner};
use tradewind::orders::SpotOrderStore;
use tradewind::reconcile::{PairRegistry, ReconcileEngine};
use tradewind::settlement::{
    HttpSnapshotSource, MockSnapshotSource, SettlementListener, SnapshotSource,
};
use tradewind::strategy::StrategyScheduler;
use tradewind::withdrawal::{
    ConfirmWithdrawalsHandler, JOB_CONFIRM_WITHDRAWALS, ProcessWithdrawalHandler,
    WithdrawalService, WithdrawalStore,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn main() {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _log_guard = tradewind::logging::init_logging(&config);

    tracing::info!("Starting Tradewind engine in {} mode", env);

    let rt = tokio::runtime::Runtime::new().expect("failed to build tokio runtime");
    if let Err(e) = rt.block_on(run(config)) {
        tracing::error!(error = %e, "Engine exited with error");
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let db = Database::connect(&config.postgres_url).await?;
    db.ensure_schema().await?;
    let pool = db.pool().clone();

    // Client stack. Real venue adapters slot in behind the same traits;
    // the mocks keep a full deposit-to-withdrawal path runnable locally.
    let mut exchanges = ExchangeRegistry::new();
    exchanges.register(Arc::new(MockExchange::new("binance")));
    exchanges.register(Arc::new(MockExchange::new("okx")));
    let dex: Arc<dyn DexAdapter> = Arc::new(MockDex::new());
    let ledger: Arc<dyn LedgerClient> = Arc::new(MockLedger::new());

    let source: Arc<dyn SnapshotSource> = if config.settlement.source_url == "mock" {
        Arc::new(MockSnapshotSource::new())
    } else {
        Arc::new(HttpSnapshotSource::new(
            &config.settlement.source_url,
            Duration::from_millis(config.settlement.request_timeout_ms),
        )?)
    };

    // Withdrawal pipeline on the durable job queue.
    let queue = JobQueue::new(pool.clone());
    let mut runner = JobRunner::new(
        queue.clone(),
        Duration::from_millis(config.scheduler.job_poll_interval_ms),
        config.scheduler.job_batch_size,
    )
    .with_backoff_base(Duration::from_secs(config.withdrawal.backoff_base_secs));
    runner.register(Arc::new(
        ProcessWithdrawalHandler::new(WithdrawalStore::new(pool.clone()), ledger.clone())
            .with_max_retries(config.withdrawal.max_retries),
    ));
    runner.register(Arc::new(ConfirmWithdrawalsHandler::new(
        WithdrawalStore::new(pool.clone()),
        SpotOrderStore::new(pool.clone()),
        queue.clone(),
        ledger.clone(),
        Duration::from_secs(config.withdrawal.confirm_interval_secs),
    )));
    // First link of the self-rescheduling confirmation chain.
    if !queue.has_pending(JOB_CONFIRM_WITHDRAWALS).await? {
        queue
            .enqueue(JOB_CONFIRM_WITHDRAWALS, json!({}), Utc::now(), 5)
            .await?;
    }

    // Deposit intake: the reconcile engine plus the spot fast path.
    let engine = ReconcileEngine::new(
        pool.clone(),
        WithdrawalService::new(pool.clone()),
        config.strategy_defaults.clone(),
    );
    let intake = SpotIntake::new(
        SpotOrderStore::new(pool.clone()),
        PairRegistry::new(pool.clone()),
        exchanges.clone(),
        WithdrawalService::new(pool.clone()),
    );
    let mut listener = SettlementListener::new(
        pool.clone(),
        source,
        engine,
        intake,
        "settlement-main",
        Duration::from_millis(config.settlement.poll_interval_ms),
    );
    listener.set_batch_limit(config.settlement.batch_size);

    let worker = SpotWorker::new(
        SpotOrderStore::new(pool.clone()),
        exchanges.clone(),
        WithdrawalService::new(pool.clone()),
        Duration::from_secs(config.scheduler.spot_poll_interval_secs),
    );

    let scheduler = StrategyScheduler::new(
        pool,
        exchanges,
        dex,
        config.strategy_defaults.clone(),
        Duration::from_secs(config.scheduler.scan_interval_secs),
    );
    let registry = scheduler.registry();

    tokio::spawn(async move { runner.run().await });
    tokio::spawn(async move { listener.run().await });
    tokio::spawn(async move { worker.run().await });
    tokio::spawn(async move { scheduler.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping strategy loops");
    registry.stop_all();
    Ok(())
}
