use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL; the store is the source of truth for every
    /// state machine, so the engine refuses to start without it.
    pub postgres_url: String,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub withdrawal: WithdrawalConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub strategy_defaults: StrategyDefaults,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettlementConfig {
    /// Snapshot source endpoint. `mock` wires the in-process mock source.
    pub source_url: String,
    pub poll_interval_ms: u64,
    pub batch_size: u32,
    /// Request timeout for one poll; a timeout is transient, never terminal.
    pub request_timeout_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            source_url: "mock".to_string(),
            poll_interval_ms: 2_000,
            batch_size: 100,
            request_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WithdrawalConfig {
    /// Attempts before a withdrawal is marked failed for the operator.
    pub max_retries: i32,
    /// Base delay for the job queue's exponential backoff.
    pub backoff_base_secs: u64,
    /// Fixed re-enqueue delay of the confirmation worker.
    pub confirm_interval_secs: u64,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_secs: 5,
            confirm_interval_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// How often the order scan looks for created/paused/orphaned orders.
    pub scan_interval_secs: u64,
    /// How often the spot worker polls exchange order status.
    pub spot_poll_interval_secs: u64,
    /// How often the job queue runner claims due jobs.
    pub job_poll_interval_ms: u64,
    pub job_batch_size: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 10,
            spot_poll_interval_secs: 5,
            job_poll_interval_ms: 1_000,
            job_batch_size: 20,
        }
    }
}

/// Per-strategy parameters the create memo cannot carry (it only holds the
/// pair and order ids). Orders are created with these until an operator
/// overrides them per order.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StrategyDefaults {
    pub arbitrage_min_profitability_pct: rust_decimal::Decimal,
    pub arbitrage_amount_to_trade: rust_decimal::Decimal,
    pub arbitrage_interval_secs: u64,
    pub mm_bid_spread_pct: rust_decimal::Decimal,
    pub mm_ask_spread_pct: rust_decimal::Decimal,
    pub mm_order_amount: rust_decimal::Decimal,
    pub mm_order_refresh_secs: u64,
    pub mm_number_of_layers: i32,
    pub loop_jitter_pct: u8,
}

impl Default for StrategyDefaults {
    fn default() -> Self {
        Self {
            arbitrage_min_profitability_pct: rust_decimal::Decimal::new(5, 1), // 0.5%
            arbitrage_amount_to_trade: rust_decimal::Decimal::new(1, 1),       // 0.1
            arbitrage_interval_secs: 10,
            mm_bid_spread_pct: rust_decimal::Decimal::new(2, 1), // 0.2%
            mm_ask_spread_pct: rust_decimal::Decimal::new(2, 1),
            mm_order_amount: rust_decimal::Decimal::new(1, 1),
            mm_order_refresh_secs: 30,
            mm_number_of_layers: 1,
            loop_jitter_pct: 20,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}
