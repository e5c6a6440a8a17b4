//! Snapshot Sources
//!
//! The listener only knows the `SnapshotSource` trait. Production polls
//! the settlement network's REST endpoint; tests and development script
//! batches through the mock.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::clients::ClientError;

use super::snapshot::Snapshot;

#[async_trait]
pub trait SnapshotSource: Send + Sync + Debug {
    /// Snapshots created strictly after `after`, oldest first, at most
    /// `limit`. Delivery is at least once; the caller dedupes.
    async fn poll(&self, after: DateTime<Utc>, limit: u32) -> Result<Vec<Snapshot>, ClientError>;
}

#[derive(Debug, Deserialize)]
struct SnapshotPage {
    data: Vec<Snapshot>,
}

/// REST source for the settlement network's snapshot feed.
#[derive(Debug)]
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn poll(&self, after: DateTime<Utc>, limit: u32) -> Result<Vec<Snapshot>, ClientError> {
        let url = format!("{}/snapshots", self.base_url);
        let page: SnapshotPage = self
            .client
            .get(&url)
            .query(&[
                ("offset", after.to_rfc3339()),
                ("limit", limit.to_string()),
                ("order", "ASC".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(page.data)
    }
}

/// Scripted source for tests and the `mock` driver.
#[derive(Debug, Default)]
pub struct MockSnapshotSource {
    batches: Mutex<VecDeque<Vec<Snapshot>>>,
    poll_count: AtomicUsize,
    fail_poll: AtomicBool,
}

impl MockSnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, batch: Vec<Snapshot>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn poll_count(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }

    pub fn set_fail_poll(&self, fail: bool) {
        self.fail_poll.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SnapshotSource for MockSnapshotSource {
    async fn poll(&self, _after: DateTime<Utc>, _limit: u32) -> Result<Vec<Snapshot>, ClientError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_poll.load(Ordering::SeqCst) {
            return Err(ClientError::Network("scripted poll failure".to_string()));
        }
        Ok(self
            .batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn snapshot() -> Snapshot {
        Snapshot {
            trace_id: Uuid::new_v4(),
            snapshot_id: Uuid::new_v4(),
            asset_id: Uuid::new_v4(),
            amount: "1".to_string(),
            opponent_id: Uuid::new_v4(),
            memo: String::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_mock_source_scripts_batches() {
        let source = MockSnapshotSource::new();
        source.push_batch(vec![snapshot(), snapshot()]);
        source.push_batch(vec![snapshot()]);

        assert_eq!(source.poll(Utc::now(), 100).await.unwrap().len(), 2);
        assert_eq!(source.poll(Utc::now(), 100).await.unwrap().len(), 1);
        assert!(source.poll(Utc::now(), 100).await.unwrap().is_empty());
        assert_eq!(source.poll_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_source_scripted_failure() {
        let source = MockSnapshotSource::new();
        source.set_fail_poll(true);
        assert!(source.poll(Utc::now(), 100).await.is_err());
    }
}
