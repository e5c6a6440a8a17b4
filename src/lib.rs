//! Tradewind - Settlement-Triggered Strategy Engine
//!
//! Deposits on the settlement network drive everything: a memo names
//! the strategy, reconciliation folds funding legs into orders, loops
//! trade them and the withdrawal pipeline returns funds.
//!
//! # Modules
//!
//! - [`core_types`] - Shared id aliases (AssetId, UserId, OrderId, ...)
//! - [`config`] - YAML configuration per environment
//! - [`logging`] - tracing setup with file rotation
//! - [`db`] - PostgreSQL pool and schema bootstrap
//! - [`memo`] - Binary and text deposit memo codec
//! - [`clients`] - Exchange, DEX and ledger client traits plus mocks
//! - [`settlement`] - Snapshot feed listener with dedupe and cursor
//! - [`reconcile`] - Two-leg payment reconciliation into orders
//! - [`orders`] - Strategy and spot order stores with state machines
//! - [`execution`] - Spot intake and the exchange polling worker
//! - [`strategy`] - Per-order trading loops and their scheduler
//! - [`jobs`] - Durable Postgres job queue
//! - [`withdrawal`] - Refund/release pipeline with confirmation sweep

// Core types - must be first!
pub mod core_types;

// Ambient stack
pub mod config;
pub mod db;
pub mod logging;

// Settlement-network plumbing
pub mod clients;
pub mod memo;
pub mod settlement;

// Order creation and execution
pub mod execution;
pub mod orders;
pub mod reconcile;
pub mod strategy;

// Durable background work
pub mod jobs;
pub mod withdrawal;

// Convenient re-exports at crate root
pub use core_types::{AssetId, OrderId, PairId, SnapshotId, TraceId, UserId};
pub use memo::{Memo, MemoAction, MemoPayload, TradingType};
pub use orders::OrderState;
pub use reconcile::ReconcileEngine;
pub use settlement::SettlementListener;
pub use strategy::StrategyScheduler;
pub use withdrawal::WithdrawalService;
