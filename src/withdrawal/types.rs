//! Withdrawal Type Definitions

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::core_types::{AssetId, SnapshotId, UserId};

/// Withdrawal lifecycle.
///
/// ```text
/// pending -> queued -> processing -> sent -> confirmed -> completed
///               ^          |
///               +----------+ (bounded retry)
/// ```
///
/// The only backward edge is the bounded `processing -> queued` retry.
/// `completed`, `failed` and `refunded` are final; `failed` and
/// `refunded` are reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalStatus {
    Pending,
    Queued,
    Processing,
    Sent,
    Confirmed,
    Completed,
    Failed,
    Refunded,
}

impl WithdrawalStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Completed | WithdrawalStatus::Failed | WithdrawalStatus::Refunded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Queued => "queued",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Sent => "sent",
            WithdrawalStatus::Confirmed => "confirmed",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
            WithdrawalStatus::Refunded => "refunded",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WithdrawalStatus::Pending),
            "queued" => Some(WithdrawalStatus::Queued),
            "processing" => Some(WithdrawalStatus::Processing),
            "sent" => Some(WithdrawalStatus::Sent),
            "confirmed" => Some(WithdrawalStatus::Confirmed),
            "completed" => Some(WithdrawalStatus::Completed),
            "failed" => Some(WithdrawalStatus::Failed),
            "refunded" => Some(WithdrawalStatus::Refunded),
            _ => None,
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why the funds are leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalKind {
    /// Strategy proceeds going back to the user.
    Release,
    /// Deposit bounced back because it could not be accepted.
    Refund,
    /// Reward payout.
    Payout,
}

impl WithdrawalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalKind::Release => "release",
            WithdrawalKind::Refund => "refund",
            WithdrawalKind::Payout => "payout",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "release" => Some(WithdrawalKind::Release),
            "refund" => Some(WithdrawalKind::Refund),
            "payout" => Some(WithdrawalKind::Payout),
            _ => None,
        }
    }
}

impl fmt::Display for WithdrawalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: UserId,
    pub amount: Decimal,
    pub asset_id: AssetId,
    /// Ledger user receiving the funds, stored as its UUID string.
    pub destination: String,
    /// Auxiliary routing info (reward address when one was nominated).
    pub destination_tag: Option<String>,
    pub kind: WithdrawalKind,
    /// Travels verbatim with the transfer; refunds carry the reason here.
    pub memo: String,
    pub status: WithdrawalStatus,
    pub retry_count: i32,
    pub ledger_tx_id: Option<String>,
    pub on_chain_tx_id: Option<String>,
    pub error_message: Option<String>,
    /// Originating deposit; the idempotency key when present.
    pub snapshot_id: Option<SnapshotId>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new withdrawal.
#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub amount: Decimal,
    pub destination: String,
    pub destination_tag: Option<String>,
    pub kind: WithdrawalKind,
    pub memo: String,
    pub snapshot_id: Option<SnapshotId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_and_terminal() {
        let all = [
            WithdrawalStatus::Pending,
            WithdrawalStatus::Queued,
            WithdrawalStatus::Processing,
            WithdrawalStatus::Sent,
            WithdrawalStatus::Confirmed,
            WithdrawalStatus::Completed,
            WithdrawalStatus::Failed,
            WithdrawalStatus::Refunded,
        ];
        for s in all {
            assert_eq!(WithdrawalStatus::from_name(s.as_str()), Some(s));
        }
        assert!(WithdrawalStatus::Completed.is_terminal());
        assert!(WithdrawalStatus::Failed.is_terminal());
        assert!(WithdrawalStatus::Refunded.is_terminal());
        assert!(!WithdrawalStatus::Sent.is_terminal());
    }

    #[test]
    fn test_kind_roundtrip() {
        for k in [
            WithdrawalKind::Release,
            WithdrawalKind::Refund,
            WithdrawalKind::Payout,
        ] {
            assert_eq!(WithdrawalKind::from_name(k.as_str()), Some(k));
        }
        assert_eq!(WithdrawalKind::from_name("reward"), None);
    }
}
