//! Strategy Keys
//!
//! A loop is identified by `{kind, user_id, client_id}`. For
//! deposit-created orders the client id is the order id; volume
//! strategies carry their own client id column.

use std::fmt;
use uuid::Uuid;

use crate::core_types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Arbitrage,
    MarketMaking,
    SimplyGrow,
    Volume,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Arbitrage => "arbitrage",
            StrategyKind::MarketMaking => "market_making",
            StrategyKind::SimplyGrow => "simply_grow",
            StrategyKind::Volume => "volume",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrategyKey {
    pub kind: StrategyKind,
    pub user_id: UserId,
    pub client_id: Uuid,
}

impl StrategyKey {
    pub fn new(kind: StrategyKind, user_id: UserId, client_id: Uuid) -> Self {
        Self {
            kind,
            user_id,
            client_id,
        }
    }
}

/// Rendered form stored in `strategy_history.strategy_key`.
impl fmt::Display for StrategyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.user_id, self.client_id)
    }
}
