//! Core types used throughout the system
//!
//! Identifiers on the settlement network are UUIDs; these aliases keep the
//! signatures readable and leave room for future newtype hardening.

use uuid::Uuid;

/// Asset ID - the settlement network's identifier for an asset.
pub type AssetId = Uuid;

/// User ID - the settlement network's identifier for an account.
pub type UserId = Uuid;

/// Order ID - identifies one strategy order across deposits, payment
/// reconciliation and execution. Carried inside create memos.
pub type OrderId = Uuid;

/// Trading pair ID - resolves through the pair registry.
pub type PairId = Uuid;

/// Snapshot ID - unique per deposit notification; the dedupe key.
pub type SnapshotId = Uuid;

/// Trace ID - the settlement network's transfer trace. Doubles as the order
/// id for legacy spot memos that do not carry one.
pub type TraceId = Uuid;
