//! Loop Registry
//!
//! One running loop per strategy key, held under a single mutex. The
//! registry is a fast-path guard against double-spawning inside this
//! process; durable exclusivity comes from the order state CAS.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::key::StrategyKey;

/// Receiver half of a loop's stop channel.
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once stop was requested. A dropped sender means the
    /// registry entry is gone; that counts as a stop too.
    pub async fn stopped(&mut self) {
        let _ = self.0.wait_for(|stopped| *stopped).await;
    }
}

/// Detached stop channel for driving a loop without a registry.
#[cfg(test)]
pub(crate) fn stop_signal_pair() -> (watch::Sender<bool>, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (tx, StopSignal(rx))
}

struct LoopHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub struct LoopRegistry {
    loops: Mutex<HashMap<StrategyKey, LoopHandle>>,
}

impl LoopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &StrategyKey) -> bool {
        self.loops.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.loops.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn and register a loop for `key` unless one is already
    /// registered. Registration and the existence check happen under one
    /// lock, so two concurrent scans cannot both spawn.
    pub fn start<F>(&self, key: StrategyKey, spawn: F) -> bool
    where
        F: FnOnce(StopSignal) -> JoinHandle<()>,
    {
        let mut loops = self.loops.lock().unwrap();
        if loops.contains_key(&key) {
            return false;
        }
        let (tx, rx) = watch::channel(false);
        let task = spawn(StopSignal(rx));
        loops.insert(key, LoopHandle { stop: tx, task });
        debug!(key = %key, "Strategy loop registered");
        true
    }

    /// Signal the loop for `key` and drop its registration. The loop
    /// observes the signal at its next cycle boundary; in-flight calls
    /// are not aborted.
    pub fn stop(&self, key: &StrategyKey) -> bool {
        let handle = self.loops.lock().unwrap().remove(key);
        match handle {
            Some(handle) => {
                let _ = handle.stop.send(true);
                debug!(key = %key, "Strategy loop stop requested");
                true
            }
            None => false,
        }
    }

    /// Signal every registered loop. Used at shutdown.
    pub fn stop_all(&self) {
        let mut loops = self.loops.lock().unwrap();
        for (key, handle) in loops.drain() {
            let _ = handle.stop.send(true);
            debug!(key = %key, "Strategy loop stop requested");
        }
    }

    /// Drop entries whose task has already ended, so a later scan can
    /// start a fresh loop for the same key.
    pub fn reap_finished(&self) -> usize {
        let mut loops = self.loops.lock().unwrap();
        let before = loops.len();
        loops.retain(|_, handle| !handle.task.is_finished());
        before - loops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::key::StrategyKind;
    use tokio::time::{Duration, sleep};
    use uuid::Uuid;

    fn key() -> StrategyKey {
        StrategyKey::new(StrategyKind::Volume, Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_second_start_for_same_key_is_rejected() {
        let registry = LoopRegistry::new();
        let k = key();
        assert!(registry.start(k, |mut stop| tokio::spawn(async move { stop.stopped().await })));
        assert!(!registry.start(k, |_| tokio::spawn(async {})));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_wakes_the_loop() {
        let registry = LoopRegistry::new();
        let k = key();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        registry.start(k, |mut stop| {
            tokio::spawn(async move {
                stop.stopped().await;
                let _ = done_tx.send(());
            })
        });

        assert!(registry.stop(&k));
        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .expect("loop must observe stop")
            .unwrap();
        assert!(!registry.contains(&k));
        assert!(!registry.stop(&k));
    }

    #[tokio::test]
    async fn test_reap_clears_finished_loops() {
        let registry = LoopRegistry::new();
        let k = key();
        registry.start(k, |_| tokio::spawn(async {}));

        // Give the no-op task a moment to finish.
        sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.reap_finished(), 1);
        assert!(registry.is_empty());
    }
}
