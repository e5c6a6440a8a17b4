//! Settlement Ledger Client
//!
//! Outbound transfers and balance queries against the settlement network.
//! Transfers return a list of receipts; an empty list is a ledger-side
//! rejection and must be treated as failure by the caller.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::core_types::{AssetId, UserId};

use super::error::ClientError;

/// Lifecycle of one outbound ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerTxState {
    /// Accepted by the ledger, not yet finalized.
    Pending,
    /// Finalized on the settlement network.
    Confirmed,
    /// Rejected or reverted; funds never left.
    Failed,
    /// Sent but bounced back by the receiving side.
    Returned,
}

impl LedgerTxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerTxState::Pending => "pending",
            LedgerTxState::Confirmed => "confirmed",
            LedgerTxState::Failed => "failed",
            LedgerTxState::Returned => "returned",
        }
    }
}

/// Status snapshot for one ledger transaction.
#[derive(Debug, Clone)]
pub struct LedgerTxStatus {
    pub state: LedgerTxState,
    /// Hash once the transfer landed on chain, if the network exposes one.
    pub on_chain_hash: Option<String>,
}

/// One receipt per transfer output.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub request_id: String,
    pub transaction_hash: Option<String>,
    pub state: LedgerTxState,
}

#[async_trait]
pub trait LedgerClient: Send + Sync + Debug {
    /// Send `amount` of `asset_id` to `opponent_id`. The memo travels
    /// verbatim to the recipient (refunds carry an explanatory message).
    ///
    /// An `Ok` with an empty receipt list means the ledger accepted the
    /// request but produced no transfer.
    async fn transfer(
        &self,
        opponent_id: UserId,
        asset_id: AssetId,
        amount: Decimal,
        memo: &str,
    ) -> Result<Vec<TransferReceipt>, ClientError>;

    /// Look up the current state of a previously submitted transfer.
    async fn fetch_status(&self, tx_id: &str) -> Result<LedgerTxStatus, ClientError>;

    /// Spendable balance of the engine's own ledger account.
    async fn fetch_balance(&self, asset_id: AssetId) -> Result<Decimal, ClientError>;
}

/// A transfer captured by [`MockLedger`] for assertions.
#[derive(Debug, Clone)]
pub struct RecordedTransfer {
    pub opponent_id: UserId,
    pub asset_id: AssetId,
    pub amount: Decimal,
    pub memo: String,
}

/// In-memory ledger for development and tests.
#[derive(Debug)]
pub struct MockLedger {
    transfers: Mutex<Vec<RecordedTransfer>>,
    transfer_count: AtomicUsize,
    statuses: Mutex<HashMap<String, LedgerTxStatus>>,
    balances: Mutex<HashMap<AssetId, Decimal>>,
    /// Next transfer returns an error.
    fail_transfer: AtomicBool,
    /// Next transfer returns Ok with zero receipts.
    empty_transfer: AtomicBool,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            transfers: Mutex::new(Vec::new()),
            transfer_count: AtomicUsize::new(0),
            statuses: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            fail_transfer: AtomicBool::new(false),
            empty_transfer: AtomicBool::new(false),
        }
    }

    pub fn set_fail_transfer(&self, fail: bool) {
        self.fail_transfer.store(fail, Ordering::SeqCst);
    }

    pub fn set_empty_transfer(&self, empty: bool) {
        self.empty_transfer.store(empty, Ordering::SeqCst);
    }

    pub fn set_balance(&self, asset_id: AssetId, balance: Decimal) {
        self.balances.lock().unwrap().insert(asset_id, balance);
    }

    pub fn set_status(&self, tx_id: &str, status: LedgerTxStatus) {
        self.statuses.lock().unwrap().insert(tx_id.to_string(), status);
    }

    pub fn transfer_count(&self) -> usize {
        self.transfer_count.load(Ordering::SeqCst)
    }

    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn transfer(
        &self,
        opponent_id: UserId,
        asset_id: AssetId,
        amount: Decimal,
        memo: &str,
    ) -> Result<Vec<TransferReceipt>, ClientError> {
        self.transfer_count.fetch_add(1, Ordering::SeqCst);

        if self.fail_transfer.load(Ordering::SeqCst) {
            return Err(ClientError::Network("mock transfer failure".to_string()));
        }

        self.transfers.lock().unwrap().push(RecordedTransfer {
            opponent_id,
            asset_id,
            amount,
            memo: memo.to_string(),
        });

        if self.empty_transfer.load(Ordering::SeqCst) {
            return Ok(vec![]);
        }

        let request_id = Uuid::new_v4().to_string();
        self.statuses.lock().unwrap().insert(
            request_id.clone(),
            LedgerTxStatus {
                state: LedgerTxState::Pending,
                on_chain_hash: None,
            },
        );
        Ok(vec![TransferReceipt {
            request_id,
            transaction_hash: None,
            state: LedgerTxState::Pending,
        }])
    }

    async fn fetch_status(&self, tx_id: &str) -> Result<LedgerTxStatus, ClientError> {
        self.statuses
            .lock()
            .unwrap()
            .get(tx_id)
            .cloned()
            .ok_or_else(|| ClientError::MalformedResponse(format!("unknown tx: {tx_id}")))
    }

    async fn fetch_balance(&self, asset_id: AssetId) -> Result<Decimal, ClientError> {
        let balances = self.balances.lock().unwrap();
        Ok(balances
            .get(&asset_id)
            .copied()
            .unwrap_or_else(|| Decimal::from(1_000_000)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transfer_records_and_counts() {
        let ledger = MockLedger::new();
        let user = Uuid::new_v4();
        let asset = Uuid::new_v4();

        let receipts = ledger
            .transfer(user, asset, Decimal::from(5), "hello")
            .await
            .unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(ledger.transfer_count(), 1);

        let recorded = ledger.transfers();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].opponent_id, user);
        assert_eq!(recorded[0].memo, "hello");

        let status = ledger.fetch_status(&receipts[0].request_id).await.unwrap();
        assert_eq!(status.state, LedgerTxState::Pending);
    }

    #[tokio::test]
    async fn test_mock_empty_and_failed_transfer() {
        let ledger = MockLedger::new();
        ledger.set_empty_transfer(true);
        let receipts = ledger
            .transfer(Uuid::new_v4(), Uuid::new_v4(), Decimal::ONE, "")
            .await
            .unwrap();
        assert!(receipts.is_empty());

        ledger.set_fail_transfer(true);
        let err = ledger
            .transfer(Uuid::new_v4(), Uuid::new_v4(), Decimal::ONE, "")
            .await;
        assert!(err.is_err());
        // failed call still counted, nothing recorded for it
        assert_eq!(ledger.transfer_count(), 2);
        assert_eq!(ledger.transfers().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_balance_override() {
        let ledger = MockLedger::new();
        let asset = Uuid::new_v4();
        ledger.set_balance(asset, Decimal::from(3));
        assert_eq!(ledger.fetch_balance(asset).await.unwrap(), Decimal::from(3));
    }
}
