//! Inbound deposit notifications.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{AssetId, SnapshotId, TraceId, UserId};

/// One transfer snapshot from the settlement network. Delivered at
/// least once and in no guaranteed order; `snapshot_id` dedupes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub trace_id: TraceId,
    pub snapshot_id: SnapshotId,
    pub asset_id: AssetId,
    /// Decimal string exactly as the network reports it. Outbound
    /// transfers show up negative and are not deposits.
    pub amount: String,
    /// The counterparty account, the depositor for inbound transfers.
    pub opponent_id: UserId,
    #[serde(default)]
    pub memo: String,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn parse_amount(&self) -> Option<Decimal> {
        self.amount.trim().parse().ok()
    }

    /// Inbound deposits carry a strictly positive amount.
    pub fn is_deposit(&self) -> bool {
        self.parse_amount().is_some_and(|a| a > Decimal::ZERO)
    }
}

/// Poll position per source, persisted so a restart resumes where the
/// previous run left off instead of re-reading history.
#[derive(Debug, Clone)]
pub struct SettlementCursor {
    pub source_id: String,
    pub last_created_at: DateTime<Utc>,
    pub last_snapshot_id: Option<SnapshotId>,
}
