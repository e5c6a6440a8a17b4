//! Job dispatch loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::queue::{Job, JobQueue, JobStatus, backoff_delay};
use super::JobError;

/// One handler per job kind. A handler returning `Ok` marks the job
/// done even when the underlying work ended in a terminal failure state
/// (the failure then lives on the domain row, not the job).
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> &str;

    async fn run(&self, job: &Job) -> Result<(), JobError>;
}

pub struct JobRunner {
    queue: JobQueue,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    poll_interval: Duration,
    batch_size: i64,
    backoff_base: Duration,
    stale_after: Duration,
}

impl JobRunner {
    pub fn new(queue: JobQueue, poll_interval: Duration, batch_size: i64) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            poll_interval,
            batch_size,
            backoff_base: Duration::from_secs(5),
            stale_after: Duration::from_secs(10 * 60),
        }
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        info!(kind = handler.kind(), "Registering job handler");
        self.handlers.insert(handler.kind().to_string(), handler);
    }

    /// Main loop; runs until the task is aborted.
    pub async fn run(&self) {
        info!(
            handlers = self.handlers.len(),
            poll_interval = ?self.poll_interval,
            "Job runner starting"
        );
        loop {
            match self.queue.recover_stale(self.stale_after).await {
                Ok(ids) if !ids.is_empty() => {
                    warn!(jobs = ids.len(), "Recovered jobs from a stalled runner");
                }
                Ok(_) => {}
                Err(e) => error!("Stale job recovery failed: {e}"),
            }
            match self.run_once().await {
                Ok(0) => {}
                Ok(n) => debug!(jobs = n, "Processed job batch"),
                Err(e) => error!("Job batch failed: {e}"),
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Claim and execute one batch. Only kinds with a registered
    /// handler are claimed; anything else stays queued for a runner
    /// that can dispatch it. Returns the number of claimed jobs.
    pub async fn run_once(&self) -> Result<usize, JobError> {
        let kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        let jobs = self.queue.claim_due(&kinds, self.batch_size).await?;
        let count = jobs.len();

        for job in jobs {
            self.dispatch(&job).await;
        }

        Ok(count)
    }

    async fn dispatch(&self, job: &Job) {
        let Some(handler) = self.handlers.get(job.kind.as_str()) else {
            warn!(job_id = %job.id, kind = %job.kind, "No handler for claimed job");
            let _ = self
                .queue
                .fail(job.id, "no handler registered", self.backoff_base)
                .await;
            return;
        };

        match handler.run(job).await {
            Ok(()) => {
                if let Err(e) = self.queue.complete(job.id).await {
                    error!(job_id = %job.id, "Failed to mark job done: {e}");
                }
            }
            Err(e) => {
                let delay = backoff_delay(self.backoff_base, job.attempts);
                warn!(
                    job_id = %job.id,
                    kind = %job.kind,
                    attempt = job.attempts,
                    delay = ?delay,
                    "Job failed: {e}"
                );
                match self.queue.fail(job.id, &e.to_string(), delay).await {
                    Ok(JobStatus::Failed) => {
                        error!(job_id = %job.id, kind = %job.kind, "Job parked as failed: {e}");
                    }
                    Ok(_) => {}
                    Err(db_err) => {
                        error!(job_id = %job.id, "Failed to record job failure: {db_err}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::create_test_pool;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingHandler {
        kind: String,
        runs: AtomicUsize,
        fail: bool,
    }

    impl CountingHandler {
        fn new(prefix: &str, fail: bool) -> Self {
            Self {
                kind: format!("{prefix}_{}", Uuid::new_v4().simple()),
                runs: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        fn kind(&self) -> &str {
            &self.kind
        }

        async fn run(&self, _job: &Job) -> Result<(), JobError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(JobError::Handler("scripted failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_runner_completes_and_retries() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let queue = JobQueue::new(pool);

        let ok_handler = Arc::new(CountingHandler::new("runner_ok", false));
        let bad_handler = Arc::new(CountingHandler::new("runner_bad", true));

        let mut runner = JobRunner::new(queue.clone(), Duration::from_millis(10), 50)
            .with_backoff_base(Duration::ZERO);
        runner.register(ok_handler.clone());
        runner.register(bad_handler.clone());

        let ok_id = queue
            .enqueue(ok_handler.kind(), json!({}), Utc::now(), 3)
            .await
            .unwrap();
        let bad_id = queue
            .enqueue(bad_handler.kind(), json!({}), Utc::now(), 2)
            .await
            .unwrap();

        runner.run_once().await.unwrap();
        assert_eq!(ok_handler.runs.load(Ordering::SeqCst), 1);
        assert_eq!(queue.get(ok_id).await.unwrap().unwrap().status, JobStatus::Done);
        assert_eq!(
            queue.get(bad_id).await.unwrap().unwrap().status,
            JobStatus::Queued
        );

        // second round exhausts the failing job's budget
        runner.run_once().await.unwrap();
        assert_eq!(
            queue.get(bad_id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
        assert_eq!(bad_handler.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unregistered_kind_stays_queued() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let queue = JobQueue::new(pool);
        let handler = Arc::new(CountingHandler::new("runner_only", false));
        let mut runner = JobRunner::new(queue.clone(), Duration::from_millis(10), 50)
            .with_backoff_base(Duration::ZERO);
        runner.register(handler);

        let kind_free = format!("no_handler_{}", Uuid::new_v4().simple());
        let id = queue
            .enqueue(&kind_free, json!({}), Utc::now(), 1)
            .await
            .unwrap();

        runner.run_once().await.unwrap();
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }
}
