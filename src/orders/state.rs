//! Order FSM State Definitions
//!
//! States are stored as TEXT in PostgreSQL using the canonical lowercase
//! names; `from_name` is the only way back in.

use std::fmt;

/// Lifecycle of a long-running strategy order (arbitrage, market making,
/// simply grow).
///
/// ```text
/// created -> running <-> paused -> stopped
///    \________|____________|----> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderState {
    Created,
    Running,
    Paused,
    Stopped,
    Failed,
}

impl OrderState {
    /// Terminal states admit no further transitions.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Stopped | OrderState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Created => "created",
            OrderState::Running => "running",
            OrderState::Paused => "paused",
            OrderState::Stopped => "stopped",
            OrderState::Failed => "failed",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "created" => Some(OrderState::Created),
            "running" => Some(OrderState::Running),
            "paused" => Some(OrderState::Paused),
            "stopped" => Some(OrderState::Stopped),
            "failed" => Some(OrderState::Failed),
            _ => None,
        }
    }

    /// Whether `self -> to` is a legal lifecycle edge.
    pub fn can_transition_to(&self, to: OrderState) -> bool {
        use OrderState::*;
        match (self, to) {
            (Created, Running) | (Created, Stopped) => true,
            (Running, Paused) | (Running, Stopped) => true,
            (Paused, Running) | (Paused, Stopped) => true,
            (_, Failed) => !self.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a one-shot spot order.
///
/// Fill transitions are driven by polling the exchange; release states
/// track the outbound transfer of proceeds back to the user.
///
/// ```text
/// created -> partially_filled* -> filled -> release_init -> released
///    |            |                              |
///    +-> canceled <+                             +-> release_failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpotOrderState {
    Created,
    PartiallyFilled,
    Filled,
    ReleaseInit,
    Released,
    ReleaseFailed,
    Canceled,
}

impl SpotOrderState {
    /// Released and canceled are final; release_failed stays open so the
    /// release can be retried.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SpotOrderState::Released | SpotOrderState::Canceled)
    }

    /// States the exchange poll worker still cares about.
    #[inline]
    pub fn is_fillable(&self) -> bool {
        matches!(self, SpotOrderState::Created | SpotOrderState::PartiallyFilled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpotOrderState::Created => "created",
            SpotOrderState::PartiallyFilled => "partially_filled",
            SpotOrderState::Filled => "filled",
            SpotOrderState::ReleaseInit => "release_init",
            SpotOrderState::Released => "released",
            SpotOrderState::ReleaseFailed => "release_failed",
            SpotOrderState::Canceled => "canceled",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "created" => Some(SpotOrderState::Created),
            "partially_filled" => Some(SpotOrderState::PartiallyFilled),
            "filled" => Some(SpotOrderState::Filled),
            "release_init" => Some(SpotOrderState::ReleaseInit),
            "released" => Some(SpotOrderState::Released),
            "release_failed" => Some(SpotOrderState::ReleaseFailed),
            "canceled" => Some(SpotOrderState::Canceled),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, to: SpotOrderState) -> bool {
        use SpotOrderState::*;
        matches!(
            (self, to),
            (Created, PartiallyFilled)
                | (Created, Filled)
                | (Created, Canceled)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Canceled)
                | (Filled, ReleaseInit)
                | (ReleaseInit, Released)
                | (ReleaseInit, ReleaseFailed)
                | (ReleaseFailed, ReleaseInit)
        )
    }
}

impl fmt::Display for SpotOrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
