//! Memo Type Definitions
//!
//! Numeric codes match the wire protocol and are stored untranslated in
//! PostgreSQL, so every variant keeps an explicit discriminant.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MemoError;

/// Strategy family a memo refers to.
///
/// Codes are part of the wire protocol. Unknown codes must be rejected
/// at decode time, never mapped to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TradingType {
    Spot = 1,
    Swap = 2,
    SimplyGrow = 3,
    MarketMaking = 4,
    Arbitrage = 5,
    Leverage = 6,
    Perpetual = 7,
}

impl TradingType {
    /// Wire code for this trading type.
    #[inline]
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Convert from a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(TradingType::Spot),
            2 => Some(TradingType::Swap),
            3 => Some(TradingType::SimplyGrow),
            4 => Some(TradingType::MarketMaking),
            5 => Some(TradingType::Arbitrage),
            6 => Some(TradingType::Leverage),
            7 => Some(TradingType::Perpetual),
            _ => None,
        }
    }

    /// Lowercase name used in storage and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingType::Spot => "spot",
            TradingType::Swap => "swap",
            TradingType::SimplyGrow => "simply_grow",
            TradingType::MarketMaking => "market_making",
            TradingType::Arbitrage => "arbitrage",
            TradingType::Leverage => "leverage",
            TradingType::Perpetual => "perpetual",
        }
    }

    /// Payment legs this trading type requires before its order activates.
    /// Two-leg strategies wait for both base and quote deposits.
    #[inline]
    pub fn funding_legs(&self) -> u8 {
        match self {
            TradingType::Arbitrage | TradingType::MarketMaking => 2,
            _ => 1,
        }
    }

    /// Convert from the lowercase storage name.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "spot" => Some(TradingType::Spot),
            "swap" => Some(TradingType::Swap),
            "simply_grow" => Some(TradingType::SimplyGrow),
            "market_making" => Some(TradingType::MarketMaking),
            "arbitrage" => Some(TradingType::Arbitrage),
            "leverage" => Some(TradingType::Leverage),
            "perpetual" => Some(TradingType::Perpetual),
            _ => None,
        }
    }
}

impl FromStr for TradingType {
    type Err = MemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TradingType::from_name(s).ok_or(MemoError::Undecodable)
    }
}

impl fmt::Display for TradingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the deposit carrying the memo is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MemoAction {
    /// Open a new order; the deposit funds one of its legs.
    Create = 1,
    /// Top up an existing order.
    Deposit = 2,
}

impl MemoAction {
    #[inline]
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MemoAction::Create),
            2 => Some(MemoAction::Deposit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoAction::Create => "create",
            MemoAction::Deposit => "deposit",
        }
    }
}

impl fmt::Display for MemoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 20-byte chain address nominated to receive strategy rewards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RewardAddress(pub [u8; 20]);

impl RewardAddress {
    pub const LEN: usize = 20;

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(RewardAddress(arr))
    }

    /// Parse a 0x-prefixed or bare hex address.
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for RewardAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Fully parsed binary memo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoPayload {
    pub version: u8,
    pub trading_type: TradingType,
    pub action: MemoAction,
    /// Entity references, 16 bytes each on the wire. For `Create` these
    /// are (order_id, trading_pair_id); for `Deposit` the existing
    /// order_id.
    pub refs: Vec<Uuid>,
    pub reward_address: Option<RewardAddress>,
}

impl MemoPayload {
    /// First reference, by convention the order id.
    pub fn order_id(&self) -> Option<Uuid> {
        self.refs.first().copied()
    }

    /// Second reference, by convention the trading pair id.
    pub fn pair_id(&self) -> Option<Uuid> {
        self.refs.get(1).copied()
    }
}

/// Parsed colon-delimited text memo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMemo {
    pub trading_type: TradingType,
    pub action: MemoAction,
    /// Remaining fields after the two leading codes, protocol dependent.
    pub fields: Vec<String>,
}

/// Either decoded form of a raw memo string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Memo {
    Binary(MemoPayload),
    Text(TextMemo),
}

impl Memo {
    pub fn trading_type(&self) -> TradingType {
        match self {
            Memo::Binary(p) => p.trading_type,
            Memo::Text(t) => t.trading_type,
        }
    }

    pub fn action(&self) -> MemoAction {
        match self {
            Memo::Binary(p) => p.action,
            Memo::Text(t) => t.action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trading_type_code_roundtrip() {
        let all = [
            TradingType::Spot,
            TradingType::Swap,
            TradingType::SimplyGrow,
            TradingType::MarketMaking,
            TradingType::Arbitrage,
            TradingType::Leverage,
            TradingType::Perpetual,
        ];
        for t in all {
            assert_eq!(TradingType::from_code(t.code()), Some(t));
            assert_eq!(t.as_str().parse::<TradingType>().unwrap(), t);
        }
    }

    #[test]
    fn test_unknown_codes_rejected() {
        assert_eq!(TradingType::from_code(0), None);
        assert_eq!(TradingType::from_code(8), None);
        assert_eq!(TradingType::from_code(255), None);
        assert_eq!(MemoAction::from_code(0), None);
        assert_eq!(MemoAction::from_code(3), None);
    }

    #[test]
    fn test_funding_legs() {
        assert_eq!(TradingType::Arbitrage.funding_legs(), 2);
        assert_eq!(TradingType::MarketMaking.funding_legs(), 2);
        assert_eq!(TradingType::SimplyGrow.funding_legs(), 1);
        assert_eq!(TradingType::Spot.funding_legs(), 1);
    }

    #[test]
    fn test_reward_address_hex_roundtrip() {
        let addr = RewardAddress([0xab; 20]);
        let s = addr.to_string();
        assert!(s.starts_with("0x"));
        assert_eq!(RewardAddress::from_hex(&s), Some(addr));
        assert_eq!(RewardAddress::from_hex(s.trim_start_matches("0x")), Some(addr));
    }

    #[test]
    fn test_reward_address_bad_input() {
        assert_eq!(RewardAddress::from_hex("0x1234"), None);
        assert_eq!(RewardAddress::from_hex("zz"), None);
        assert_eq!(RewardAddress::from_slice(&[0u8; 19]), None);
    }
}
