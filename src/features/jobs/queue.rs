use crate::features::jobs::ledger::ResourceLedger;
use crate::features::jobs::models::{ClusterMetricSample, Job, JobEvent, JobStatus, SubmitJobRequest};
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("job not found")]
    NotFound,
    #[error("job is not in a cancellable state")]
    NotCancellable,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl JobError {
    pub fn to_status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::NotCancellable => StatusCode::CONFLICT,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Priority + FIFO job queue stored in Postgres: `SELECT ... FOR UPDATE SKIP
/// LOCKED` lets multiple runner instances dequeue concurrently without
/// double-claiming a row, and the row itself is the lease — no separate
/// lock table.
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn submit(&self, req: SubmitJobRequest, created_by: Option<Uuid>) -> Result<Job, JobError> {
        let resources = serde_json::to_value(req.resources).unwrap_or_default();
        let job: Job = sqlx::query_as(
            "INSERT INTO jobs
                (id, workspace_id, kind, payload, priority, status, attempts, max_attempts,
                 resource_requirements, progress_pct, created_by, created_at, scheduled_at, cancel_requested,
                 checkpoint_blob)
             VALUES ($1, $2, $3, $4, $5, 'queued', 0, $6, $7, 0, $8, now(), $9, false, NULL)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(req.workspace_id)
        .bind(&req.kind)
        .bind(&req.payload)
        .bind(req.priority)
        .bind(req.max_attempts.unwrap_or(5))
        .bind(resources)
        .bind(created_by)
        .bind(req.scheduled_at.unwrap_or_else(Utc::now))
        .fetch_one(&self.pool)
        .await?;
        self.record_event(job.id, "submitted", None, None).await;
        Ok(job)
    }

    /// Appends a diagnostic event row. Best-effort: a logging failure should
    /// never fail the state transition it's describing.
    async fn record_event(&self, job_id: Uuid, event_type: &str, message: Option<&str>, progress_pct: Option<i16>) {
        let result = sqlx::query(
            "INSERT INTO job_events (id, job_id, event_type, message, progress_pct, created_at)
             VALUES ($1, $2, $3, $4, $5, now())",
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(event_type)
        .bind(message)
        .bind(progress_pct)
        .execute(&self.pool)
        .await;
        if let Err(e) = result {
            tracing::warn!(%job_id, error = %e, "failed to record job event");
        }
    }

    pub async fn list_events(&self, job_id: Uuid) -> Result<Vec<JobEvent>, JobError> {
        let rows = sqlx::query_as::<_, JobEvent>(
            "SELECT * FROM job_events WHERE job_id = $1 ORDER BY created_at ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Writes the ledger's current view of cluster capacity as a durable
    /// row. Called on a timer from the runner's background loop.
    pub async fn record_cluster_sample(&self, ledger: &ResourceLedger) -> Result<(), JobError> {
        let (avail_cpu, avail_mem, avail_gpu) = ledger.available();
        let (total_cpu, total_mem, total_gpu) = ledger.totals();
        sqlx::query(
            "INSERT INTO cluster_metric_samples
                (id, available_cpu_millis, available_memory_mb, available_gpu_units,
                 total_cpu_millis, total_memory_mb, total_gpu_units, sampled_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, now())",
        )
        .bind(Uuid::new_v4())
        .bind(avail_cpu)
        .bind(avail_mem)
        .bind(avail_gpu)
        .bind(total_cpu)
        .bind(total_mem)
        .bind(total_gpu)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_cluster_sample(&self) -> Result<Option<ClusterMetricSample>, JobError> {
        let row = sqlx::query_as::<_, ClusterMetricSample>(
            "SELECT * FROM cluster_metric_samples ORDER BY sampled_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Job, JobError> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(JobError::NotFound)
    }

    pub async fn list_for_workspace(&self, workspace_id: Uuid) -> Result<Vec<Job>, JobError> {
        let rows = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE workspace_id = $1 ORDER BY created_at DESC LIMIT 200",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Claims the highest-priority eligible job (oldest first within a
    /// priority tier) and marks it running under `worker_id`'s lease. `None`
    /// means the queue has nothing ready right now.
    pub async fn dequeue_next(&self, worker_id: &str, lease: ChronoDuration) -> Result<Option<Job>, JobError> {
        let mut tx = self.pool.begin().await?;
        let candidate: Option<Job> = sqlx::query_as(
            "SELECT * FROM jobs
             WHERE status = 'queued' AND scheduled_at <= now()
             ORDER BY priority DESC, created_at ASC
             FOR UPDATE SKIP LOCKED
             LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let locked_until = Utc::now() + lease;
        let job: Job = sqlx::query_as(
            "UPDATE jobs SET status = 'running', attempts = attempts + 1, started_at = now(),
                locked_until = $1, locked_by = $2
             WHERE id = $3 RETURNING *",
        )
        .bind(locked_until)
        .bind(worker_id)
        .bind(candidate.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        self.record_event(job.id, "started", None, None).await;
        Ok(Some(job))
    }

    /// Jobs still `running` past their lease belong to a runner that died
    /// mid-job (crash, OOM kill). Puts them back in the queue if retries
    /// remain, otherwise marks them failed.
    pub async fn reclaim_expired_leases(&self) -> Result<u64, JobError> {
        let requeued = sqlx::query(
            "UPDATE jobs SET status = 'queued', locked_until = NULL, locked_by = NULL
             WHERE status = 'running' AND locked_until < now() AND attempts < max_attempts",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        sqlx::query(
            "UPDATE jobs SET status = 'failed', finished_at = now(), error = 'worker lease expired, retries exhausted'
             WHERE status = 'running' AND locked_until < now() AND attempts >= max_attempts",
        )
        .execute(&self.pool)
        .await?;

        Ok(requeued)
    }

    /// Non-claiming peek at the head of the queue, used by the runner to
    /// decide whether the longest-waiting job is being starved before it
    /// commits to a normal priority-ordered dequeue.
    pub async fn peek_oldest_queued(&self) -> Result<Option<Job>, JobError> {
        let job = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE status = 'queued' AND scheduled_at <= now()
             ORDER BY created_at ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    /// Claims one specific job by id rather than the priority-ordered head,
    /// used to service a starved job out of normal order.
    pub async fn claim_specific(&self, job_id: Uuid, worker_id: &str, lease: ChronoDuration) -> Result<Option<Job>, JobError> {
        let mut tx = self.pool.begin().await?;
        let candidate: Option<Job> = sqlx::query_as(
            "SELECT * FROM jobs WHERE id = $1 AND status = 'queued' FOR UPDATE SKIP LOCKED",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let locked_until = Utc::now() + lease;
        let job: Job = sqlx::query_as(
            "UPDATE jobs SET status = 'running', attempts = attempts + 1, started_at = now(),
                locked_until = $1, locked_by = $2
             WHERE id = $3 RETURNING *",
        )
        .bind(locked_until)
        .bind(worker_id)
        .bind(candidate.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        self.record_event(job.id, "started", Some("dispatched out of order to relieve starvation"), None).await;
        Ok(Some(job))
    }

    /// Puts a claimed-but-not-yet-started job back without counting it
    /// against `max_attempts` — used when dispatch itself was blocked by the
    /// resource ledger rather than the job actually failing.
    pub async fn requeue_without_penalty(&self, job_id: Uuid) -> Result<(), JobError> {
        sqlx::query(
            "UPDATE jobs SET status = 'queued', attempts = GREATEST(attempts - 1, 0),
                locked_until = NULL, locked_by = NULL
             WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_permanently(&self, job_id: Uuid, error: &str) -> Result<(), JobError> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', error = $1, finished_at = now(), locked_until = NULL, locked_by = NULL
             WHERE id = $2",
        )
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_progress(&self, job_id: Uuid, progress_pct: i16) -> Result<(), JobError> {
        sqlx::query("UPDATE jobs SET progress_pct = $1 WHERE id = $2")
            .bind(progress_pct.clamp(0, 100))
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persists driver-opaque resumption state so a requeue after worker
    /// loss can pick up past the last checkpoint.
    pub async fn save_checkpoint(&self, job_id: Uuid, blob: serde_json::Value) -> Result<(), JobError> {
        sqlx::query("UPDATE jobs SET checkpoint_blob = $1 WHERE id = $2")
            .bind(blob)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn complete(&self, job_id: Uuid, result: serde_json::Value) -> Result<(), JobError> {
        sqlx::query(
            "UPDATE jobs SET status = 'succeeded', result = $1, progress_pct = 100, finished_at = now(),
                locked_until = NULL, locked_by = NULL
             WHERE id = $2",
        )
        .bind(result)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        self.record_event(job_id, "succeeded", None, Some(100)).await;
        Ok(())
    }

    /// Requeues for another attempt if `attempts < max_attempts`, else fails
    /// terminally. The caller computes the retry delay (jittered backoff)
    /// and passes it as `retry_after`.
    pub async fn fail_or_retry(&self, job_id: Uuid, error: &str, retry_after: ChronoDuration) -> Result<JobStatus, JobError> {
        let job = self.get(job_id).await?;
        if job.attempts >= job.max_attempts {
            sqlx::query(
                "UPDATE jobs SET status = 'failed', error = $1, finished_at = now(), locked_until = NULL, locked_by = NULL
                 WHERE id = $2",
            )
            .bind(error)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            self.record_event(job_id, "failed", Some(error), None).await;
            Ok(JobStatus::Failed)
        } else {
            sqlx::query(
                "UPDATE jobs SET status = 'queued', error = $1, scheduled_at = $2, locked_until = NULL, locked_by = NULL
                 WHERE id = $3",
            )
            .bind(error)
            .bind(Utc::now() + retry_after)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            self.record_event(job_id, "retrying", Some(error), None).await;
            Ok(JobStatus::Queued)
        }
    }

    /// Requests cancellation of every job still queued or running for a
    /// workspace. Called right before the workspace row is torn down, since
    /// `jobs.workspace_id` is `ON DELETE SET NULL` rather than cascading: a
    /// job left running would otherwise keep burning ledger capacity against
    /// a workspace that no longer exists.
    pub async fn cancel_all_for_workspace(&self, workspace_id: Uuid) -> Result<(), JobError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM jobs WHERE workspace_id = $1 AND status IN ('queued', 'running')",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        for (job_id,) in rows {
            self.request_cancel(job_id).await?;
        }
        Ok(())
    }

    pub async fn request_cancel(&self, job_id: Uuid) -> Result<(), JobError> {
        let job = self.get(job_id).await?;
        if matches!(job.status, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled) {
            return Err(JobError::NotCancellable);
        }
        sqlx::query("UPDATE jobs SET cancel_requested = true WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        self.record_event(job_id, "cancel_requested", None, None).await;

        if job.status == JobStatus::Queued {
            sqlx::query("UPDATE jobs SET status = 'cancelled', finished_at = now() WHERE id = $1 AND status = 'queued'")
                .bind(job_id)
                .execute(&self.pool)
                .await?;
            self.record_event(job_id, "cancelled", None, None).await;
        }
        Ok(())
    }

    pub async fn mark_cancelled(&self, job_id: Uuid) -> Result<(), JobError> {
        sqlx::query(
            "UPDATE jobs SET status = 'cancelled', finished_at = now(), locked_until = NULL, locked_by = NULL WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        self.record_event(job_id, "cancelled", Some("cancellation grace period elapsed"), None).await;
        Ok(())
    }
}
