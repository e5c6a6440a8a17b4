//! Spot Exchange Client
//!
//! One client per named exchange. Status strings coming back from an
//! exchange are normalized into a closed enum; an unrecognized string is
//! an error the caller must handle, never silently mapped.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    /// Accepts storage names and the single-letter memo shorthand.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "buy" | "B" | "b" => Some(OrderSide::Buy),
            "sell" | "S" | "s" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Limit,
    Market,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Limit => "limit",
            OrderKind::Market => "market",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "limit" | "L" | "l" => Some(OrderKind::Limit),
            "market" | "M" | "m" => Some(OrderKind::Market),
            _ => None,
        }
    }
}

/// Normalized exchange order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl ExchangeOrderStatus {
    /// Map a raw exchange status string onto the closed set.
    pub fn normalize(raw: &str) -> Result<Self, ClientError> {
        match raw.to_ascii_lowercase().as_str() {
            "new" | "open" | "live" | "accepted" | "pending" => Ok(ExchangeOrderStatus::Open),
            "partially_filled" | "partial" | "partial_fill" => {
                Ok(ExchangeOrderStatus::PartiallyFilled)
            }
            "filled" | "closed" | "done" => Ok(ExchangeOrderStatus::Filled),
            "canceled" | "cancelled" => Ok(ExchangeOrderStatus::Canceled),
            "rejected" => Ok(ExchangeOrderStatus::Rejected),
            "expired" => Ok(ExchangeOrderStatus::Expired),
            other => Err(ClientError::UnknownOrderStatus(other.to_string())),
        }
    }

    /// No further fills can arrive in this status.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangeOrderStatus::Filled
                | ExchangeOrderStatus::Canceled
                | ExchangeOrderStatus::Rejected
                | ExchangeOrderStatus::Expired
        )
    }
}

/// Execution state of one order as reported by the exchange.
#[derive(Debug, Clone)]
pub struct ExchangeOrder {
    pub exchange_order_id: String,
    pub status: ExchangeOrderStatus,
    pub filled_amount: Decimal,
    pub avg_price: Option<Decimal>,
}

/// One OHLCV bar.
#[derive(Debug, Clone)]
pub struct Candle {
    pub ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[async_trait]
pub trait ExchangeClient: Send + Sync + Debug {
    /// Exchange name as stored on orders, lowercase.
    fn name(&self) -> &str;

    /// Place an order; returns the exchange-assigned order id.
    async fn place_order(
        &self,
        symbol: &str,
        kind: OrderKind,
        side: OrderSide,
        amount: Decimal,
        limit_price: Option<Decimal>,
    ) -> Result<String, ClientError>;

    async fn fetch_order(
        &self,
        exchange_order_id: &str,
        symbol: &str,
    ) -> Result<ExchangeOrder, ClientError>;

    async fn cancel_order(&self, exchange_order_id: &str, symbol: &str)
        -> Result<(), ClientError>;

    async fn fetch_balance(&self, asset: &str) -> Result<Decimal, ClientError>;

    /// Most recent bars, newest last.
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ClientError>;
}

/// Name-indexed set of exchange clients, shared by workers and loops.
#[derive(Debug, Clone, Default)]
pub struct ExchangeRegistry {
    clients: HashMap<String, Arc<dyn ExchangeClient>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn ExchangeClient>) {
        self.clients.insert(client.name().to_string(), client);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ExchangeClient>, ClientError> {
        self.clients
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::UnknownExchange(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }
}

/// In-memory exchange for development and tests. Orders fill only when a
/// test scripts them via [`MockExchange::fill_order`].
#[derive(Debug)]
pub struct MockExchange {
    name: String,
    orders: Mutex<HashMap<String, ExchangeOrder>>,
    prices: Mutex<HashMap<String, Decimal>>,
    balances: Mutex<HashMap<String, Decimal>>,
    place_count: AtomicUsize,
    cancel_count: AtomicUsize,
    next_id: AtomicUsize,
    fail_place: Mutex<bool>,
}

impl MockExchange {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            orders: Mutex::new(HashMap::new()),
            prices: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            place_count: AtomicUsize::new(0),
            cancel_count: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
            fail_place: Mutex::new(false),
        }
    }

    pub fn set_fail_place(&self, fail: bool) {
        *self.fail_place.lock().unwrap() = fail;
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn set_balance(&self, asset: &str, balance: Decimal) {
        self.balances
            .lock()
            .unwrap()
            .insert(asset.to_string(), balance);
    }

    /// Script a fill for a placed order.
    pub fn fill_order(&self, exchange_order_id: &str, filled: Decimal, price: Decimal) {
        let mut orders = self.orders.lock().unwrap();
        if let Some(order) = orders.get_mut(exchange_order_id) {
            order.filled_amount = filled;
            order.avg_price = Some(price);
            order.status = ExchangeOrderStatus::Filled;
        }
    }

    /// Script a partial fill.
    pub fn partially_fill_order(&self, exchange_order_id: &str, filled: Decimal, price: Decimal) {
        let mut orders = self.orders.lock().unwrap();
        if let Some(order) = orders.get_mut(exchange_order_id) {
            order.filled_amount = filled;
            order.avg_price = Some(price);
            order.status = ExchangeOrderStatus::PartiallyFilled;
        }
    }

    pub fn place_count(&self) -> usize {
        self.place_count.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancel_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn place_order(
        &self,
        _symbol: &str,
        _kind: OrderKind,
        _side: OrderSide,
        _amount: Decimal,
        _limit_price: Option<Decimal>,
    ) -> Result<String, ClientError> {
        self.place_count.fetch_add(1, Ordering::SeqCst);
        if *self.fail_place.lock().unwrap() {
            return Err(ClientError::Rejected("mock place failure".to_string()));
        }
        let id = format!("{}-{}", self.name, self.next_id.fetch_add(1, Ordering::SeqCst));
        self.orders.lock().unwrap().insert(
            id.clone(),
            ExchangeOrder {
                exchange_order_id: id.clone(),
                status: ExchangeOrderStatus::Open,
                filled_amount: Decimal::ZERO,
                avg_price: None,
            },
        );
        Ok(id)
    }

    async fn fetch_order(
        &self,
        exchange_order_id: &str,
        _symbol: &str,
    ) -> Result<ExchangeOrder, ClientError> {
        self.orders
            .lock()
            .unwrap()
            .get(exchange_order_id)
            .cloned()
            .ok_or_else(|| {
                ClientError::MalformedResponse(format!("unknown order: {exchange_order_id}"))
            })
    }

    async fn cancel_order(
        &self,
        exchange_order_id: &str,
        _symbol: &str,
    ) -> Result<(), ClientError> {
        self.cancel_count.fetch_add(1, Ordering::SeqCst);
        let mut orders = self.orders.lock().unwrap();
        if let Some(order) = orders.get_mut(exchange_order_id) {
            if !order.status.is_terminal() {
                order.status = ExchangeOrderStatus::Canceled;
            }
        }
        Ok(())
    }

    async fn fetch_balance(&self, asset: &str) -> Result<Decimal, ClientError> {
        let balances = self.balances.lock().unwrap();
        Ok(balances
            .get(asset)
            .copied()
            .unwrap_or_else(|| Decimal::from(1_000_000)))
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        _timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ClientError> {
        let price = self
            .prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ONE_HUNDRED);
        let now = Utc::now();
        Ok((0..limit.max(1))
            .map(|_| Candle {
                ts: now,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: Decimal::ONE,
            })
            .collect())
    }
}
