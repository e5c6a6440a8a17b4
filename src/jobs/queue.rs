//! Job persistence and claim/complete/fail operations.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use super::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub run_at: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Exponential backoff for the nth failed attempt (1-based), capped at
/// one hour.
pub fn backoff_delay(base: Duration, attempt: i32) -> Duration {
    const CAP: Duration = Duration::from_secs(3600);
    let exp = attempt.saturating_sub(1).clamp(0, 30) as u32;
    let delay = base.saturating_mul(2u32.saturating_pow(exp));
    delay.min(CAP)
}

#[derive(Debug, Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a job to run at `run_at`.
    pub async fn enqueue(
        &self,
        kind: &str,
        payload: serde_json::Value,
        run_at: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Uuid, JobError> {
        Self::enqueue_with(&self.pool, kind, payload, run_at, max_attempts).await
    }

    /// Executor variant so callers can enqueue inside their own
    /// transaction (row + job commit or roll back together).
    pub async fn enqueue_with<'e>(
        exec: impl PgExecutor<'e>,
        kind: &str,
        payload: serde_json::Value,
        run_at: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Uuid, JobError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (id, kind, payload, status, run_at, max_attempts)
            VALUES ($1, $2, $3, 'queued', $4, $5)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(kind)
        .bind(payload)
        .bind(run_at)
        .bind(max_attempts)
        .fetch_one(exec)
        .await?;
        Ok(id)
    }

    /// Claim up to `batch` due jobs of the given kinds. The nested CAS
    /// re-checks `status = 'queued'` under the row lock, so two runners
    /// never claim the same job. Restricting to kinds keeps a runner
    /// from hoarding jobs it has no handler for.
    pub async fn claim_due(&self, kinds: &[&str], batch: i64) -> Result<Vec<Job>, JobError> {
        let kinds: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running', attempts = attempts + 1, updated_at = NOW()
            WHERE status = 'queued' AND id IN (
                SELECT id FROM jobs
                WHERE status = 'queued' AND kind = ANY($2) AND run_at <= NOW()
                ORDER BY run_at
                LIMIT $1
            )
            RETURNING *
            "#,
        )
        .bind(batch)
        .bind(kinds)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    /// Requeue jobs a dead runner left in `running`. The attempt
    /// already counted at claim time stays counted, so a crash-looping
    /// job still runs out of budget and parks as failed here.
    /// Returns the touched ids.
    pub async fn recover_stale(&self, older_than: Duration) -> Result<Vec<Uuid>, JobError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'queued' END,
                run_at = NOW(),
                updated_at = NOW()
            WHERE status = 'running'
              AND updated_at < NOW() - INTERVAL '1 second' * $1
            RETURNING id
            "#,
        )
        .bind(older_than.as_secs() as f64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Mark a running job done.
    pub async fn complete(&self, id: Uuid) -> Result<bool, JobError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'done', updated_at = NOW() WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a failed run. Requeues with `delay` until the attempt
    /// budget is spent, then parks the job as failed. Returns the
    /// resulting status.
    pub async fn fail(
        &self,
        id: Uuid,
        error: &str,
        delay: Duration,
    ) -> Result<JobStatus, JobError> {
        let status: String = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'queued' END,
                run_at = NOW() + INTERVAL '1 second' * $2,
                last_error = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(delay.as_secs() as f64)
        .bind(error)
        .fetch_one(&self.pool)
        .await?;

        JobStatus::from_name(&status).ok_or(JobError::Handler(format!("bad status: {status}")))
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Job>, JobError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    /// Whether a queued or running job of this kind already exists.
    /// Used by self-rescheduling jobs to avoid piling up duplicates.
    pub async fn has_pending(&self, kind: &str) -> Result<bool, JobError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE kind = $1 AND status IN ('queued', 'running')",
        )
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}

fn row_to_job(row: &PgRow) -> Result<Job, JobError> {
    let status_name: String = row.get("status");
    let status = JobStatus::from_name(&status_name)
        .ok_or(JobError::Handler(format!("bad status: {status_name}")))?;

    Ok(Job {
        id: row.get("id"),
        kind: row.get("kind"),
        payload: row.get("payload"),
        status,
        run_at: row.get("run_at"),
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::create_test_pool;
    use serde_json::json;

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let base = Duration::from_secs(5);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(20));
        assert_eq!(backoff_delay(base, 4), Duration::from_secs(40));
        assert_eq!(backoff_delay(base, 100), Duration::from_secs(3600));
        // attempt 0 behaves as the first attempt
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_enqueue_claim_complete() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let queue = JobQueue::new(pool);
        let kind = format!("test_kind_{}", Uuid::new_v4().simple());

        let id = queue
            .enqueue(&kind, json!({"n": 1}), Utc::now(), 3)
            .await
            .unwrap();
        assert!(queue.has_pending(&kind).await.unwrap());

        let claimed = queue.claim_due(&[&kind], 100).await.unwrap();
        let job = claimed.iter().find(|j| j.id == id).expect("claimed");
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);

        // already running, not claimable again
        assert!(queue.claim_due(&[&kind], 100).await.unwrap().is_empty());

        assert!(queue.complete(id).await.unwrap());
        assert!(!queue.has_pending(&kind).await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_requeues_then_parks() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let queue = JobQueue::new(pool);
        let kind = format!("test_kind_{}", Uuid::new_v4().simple());
        let id = queue
            .enqueue(&kind, json!({}), Utc::now(), 2)
            .await
            .unwrap();

        queue.claim_due(&[&kind], 100).await.unwrap();
        let status = queue.fail(id, "boom", Duration::ZERO).await.unwrap();
        assert_eq!(status, JobStatus::Queued);

        queue.claim_due(&[&kind], 100).await.unwrap();
        let status = queue.fail(id, "boom again", Duration::ZERO).await.unwrap();
        assert_eq!(status, JobStatus::Failed);

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.last_error.as_deref(), Some("boom again"));

        // parked jobs never come back
        assert!(queue.claim_due(&[&kind], 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_future_jobs_not_claimed() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let queue = JobQueue::new(pool);
        let kind = format!("test_kind_{}", Uuid::new_v4().simple());
        queue
            .enqueue(&kind, json!({}), Utc::now() + chrono::Duration::hours(1), 3)
            .await
            .unwrap();

        assert!(queue.claim_due(&[&kind], 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_stale_requeues_or_parks() {
        let Some(pool) = create_test_pool().await else {
            return;
        };
        let queue = JobQueue::new(pool.clone());
        let kind = format!("test_kind_{}", Uuid::new_v4().simple());

        let fresh = queue.enqueue(&kind, json!({}), Utc::now(), 3).await.unwrap();
        let stale = queue.enqueue(&kind, json!({}), Utc::now(), 3).await.unwrap();
        let spent = queue.enqueue(&kind, json!({}), Utc::now(), 1).await.unwrap();
        queue.claim_due(&[&kind], 100).await.unwrap();

        // age two of the running rows past the threshold
        for id in [stale, spent] {
            sqlx::query("UPDATE jobs SET updated_at = NOW() - INTERVAL '10 minutes' WHERE id = $1")
                .bind(id)
                .execute(&pool)
                .await
                .unwrap();
        }

        let touched = queue.recover_stale(Duration::from_secs(60)).await.unwrap();
        assert!(touched.contains(&stale));
        assert!(touched.contains(&spent));
        assert!(!touched.contains(&fresh));

        assert_eq!(
            queue.get(stale).await.unwrap().unwrap().status,
            JobStatus::Queued
        );
        // budget already spent at claim time, parks instead of looping
        assert_eq!(
            queue.get(spent).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
        assert_eq!(
            queue.get(fresh).await.unwrap().unwrap().status,
            JobStatus::Running
        );
    }
}
