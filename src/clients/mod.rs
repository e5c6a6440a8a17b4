//! Capability Clients
//!
//! Thin trait boundaries for every external system the engine talks to:
//! the settlement-network ledger, named spot exchanges, and DEX routers.
//! Each trait ships with a mock implementation selectable from config so
//! the whole engine runs without live connectivity.
//!
//! Every call returns an explicit `Result`; a remote failure is never
//! smoothed over with an empty default object.

pub mod dex;
pub mod error;
pub mod exchange;
pub mod ledger;

pub use dex::{DexAdapter, MockDex, PoolInfo, PoolRef, SwapReceipt};
pub use error::ClientError;
pub use exchange::{
    Candle, ExchangeClient, ExchangeOrder, ExchangeOrderStatus, ExchangeRegistry, MockExchange,
    OrderKind, OrderSide,
};
pub use ledger::{LedgerClient, LedgerTxState, LedgerTxStatus, MockLedger, TransferReceipt};
