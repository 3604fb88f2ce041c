use crate::features::jobs::models::ResourceRequirements;
use crate::features::jobs::queue::JobError;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::sync::Mutex;

struct LedgerState {
    cpu_millis: i64,
    memory_mb: i64,
    gpu_units: i64,
    total_cpu_millis: i64,
    total_memory_mb: i64,
    total_gpu_units: i64,
}

/// Tracks cluster-wide capacity against the sum of what's currently
/// reserved by running jobs. Reservation is a single compare-and-subtract
/// under one lock: either the whole request fits across all three
/// dimensions or nothing is taken, so a job never holds a partial
/// reservation. Totals live under the same lock so a `scale` (worker
/// added/removed) adjusts both available and total capacity atomically.
///
/// The ledger itself is process-local and holds nothing on disk: the durable
/// source of truth for what's reserved is the `jobs` table, specifically
/// every row with `status = 'running'`. `reconcile_from_running_jobs` rebuilds
/// the in-memory counters from that table, so a restart never starts the
/// ledger believing capacity is free that a still-running job actually holds.
pub struct ResourceLedger {
    state: Mutex<LedgerState>,
}

impl ResourceLedger {
    pub fn new(total_cpu_millis: i64, total_memory_mb: i64, total_gpu_units: i64) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                cpu_millis: total_cpu_millis,
                memory_mb: total_memory_mb,
                gpu_units: total_gpu_units,
                total_cpu_millis,
                total_memory_mb,
                total_gpu_units,
            }),
        }
    }

    /// Builds a ledger whose "used" counters reflect every job currently
    /// `running` in Postgres, so a process restart doesn't forget about
    /// in-flight reservations. Called once at boot, before the runner starts
    /// pulling from the queue.
    pub async fn reconcile_from_running_jobs(
        pool: &PgPool,
        total_cpu_millis: i64,
        total_memory_mb: i64,
        total_gpu_units: i64,
    ) -> Result<Self, JobError> {
        let rows: Vec<(JsonValue,)> =
            sqlx::query_as("SELECT resource_requirements FROM jobs WHERE status = 'running'")
                .fetch_all(pool)
                .await?;

        let mut used_cpu = 0i64;
        let mut used_memory = 0i64;
        let mut used_gpu = 0i64;
        for (requirements,) in rows {
            let req: ResourceRequirements = serde_json::from_value(requirements).unwrap_or_default();
            used_cpu += req.cpu_millis;
            used_memory += req.memory_mb;
            used_gpu += req.gpu_units;
        }

        Ok(Self {
            state: Mutex::new(LedgerState {
                cpu_millis: total_cpu_millis - used_cpu,
                memory_mb: total_memory_mb - used_memory,
                gpu_units: total_gpu_units - used_gpu,
                total_cpu_millis,
                total_memory_mb,
                total_gpu_units,
            }),
        })
    }

    pub fn try_reserve(&self, req: ResourceRequirements) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.cpu_millis >= req.cpu_millis && state.memory_mb >= req.memory_mb && state.gpu_units >= req.gpu_units {
            state.cpu_millis -= req.cpu_millis;
            state.memory_mb -= req.memory_mb;
            state.gpu_units -= req.gpu_units;
            true
        } else {
            false
        }
    }

    pub fn release(&self, req: ResourceRequirements) {
        let mut state = self.state.lock().unwrap();
        state.cpu_millis = (state.cpu_millis + req.cpu_millis).min(state.total_cpu_millis);
        state.memory_mb = (state.memory_mb + req.memory_mb).min(state.total_memory_mb);
        state.gpu_units = (state.gpu_units + req.gpu_units).min(state.total_gpu_units);
    }

    /// A job whose requirements exceed total cluster capacity can never run;
    /// the runner uses this to fail it immediately instead of leaving it
    /// queued forever.
    pub fn exceeds_total_capacity(&self, req: ResourceRequirements) -> bool {
        let state = self.state.lock().unwrap();
        req.cpu_millis > state.total_cpu_millis || req.memory_mb > state.total_memory_mb || req.gpu_units > state.total_gpu_units
    }

    pub fn available(&self) -> (i64, i64, i64) {
        let state = self.state.lock().unwrap();
        (state.cpu_millis, state.memory_mb, state.gpu_units)
    }

    pub fn totals(&self) -> (i64, i64, i64) {
        let state = self.state.lock().unwrap();
        (state.total_cpu_millis, state.total_memory_mb, state.total_gpu_units)
    }

    /// Adjusts total (and therefore available) capacity by `delta`, e.g. when
    /// workers are added or removed from the cluster. Available capacity
    /// moves by the same delta so in-flight reservations are unaffected.
    pub fn scale(&self, delta: ResourceRequirements) {
        let mut state = self.state.lock().unwrap();
        state.total_cpu_millis += delta.cpu_millis;
        state.total_memory_mb += delta.memory_mb;
        state.total_gpu_units += delta.gpu_units;
        state.cpu_millis += delta.cpu_millis;
        state.memory_mb += delta.memory_mb;
        state.gpu_units += delta.gpu_units;
    }
}

#[cfg(test)]
async fn insert_running_job(pool: &PgPool, cpu_millis: i64, memory_mb: i64) {
    let resources = serde_json::to_value(ResourceRequirements { cpu_millis, memory_mb, gpu_units: 0 }).unwrap();
    sqlx::query(
        "INSERT INTO jobs
            (id, workspace_id, kind, payload, priority, status, attempts, max_attempts,
             resource_requirements, progress_pct, created_by, created_at, scheduled_at, cancel_requested,
             checkpoint_blob)
         VALUES ($1, NULL, 'analysis.pca', '{}', 0, 'running', 1, 5, $2, 0, NULL, now(), now(), false, NULL)",
    )
    .bind(uuid::Uuid::new_v4())
    .bind(resources)
    .execute(pool)
    .await
    .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_fails_when_any_dimension_is_short() {
        let ledger = ResourceLedger::new(1000, 1024, 0);
        let req = ResourceRequirements { cpu_millis: 500, memory_mb: 2048, gpu_units: 0 };
        assert!(!ledger.try_reserve(req));
        assert_eq!(ledger.available(), (1000, 1024, 0));
    }

    #[test]
    fn reserve_then_release_restores_capacity() {
        let ledger = ResourceLedger::new(1000, 1024, 2);
        let req = ResourceRequirements { cpu_millis: 500, memory_mb: 512, gpu_units: 1 };
        assert!(ledger.try_reserve(req));
        assert_eq!(ledger.available(), (500, 512, 1));
        ledger.release(req);
        assert_eq!(ledger.available(), (1000, 1024, 2));
    }

    #[test]
    fn scale_adjusts_total_and_available_without_disturbing_in_flight_reservations() {
        let ledger = ResourceLedger::new(1000, 1024, 0);
        let req = ResourceRequirements { cpu_millis: 500, memory_mb: 512, gpu_units: 0 };
        assert!(ledger.try_reserve(req));

        ledger.scale(ResourceRequirements { cpu_millis: 1000, memory_mb: 1024, gpu_units: 0 });

        assert_eq!(ledger.totals(), (2000, 2048, 0));
        assert_eq!(ledger.available(), (1500, 1536, 0));
    }

    /// A process restart must not forget capacity held by jobs that are
    /// still `running` in Postgres.
    #[sqlx::test]
    async fn reconcile_seeds_used_capacity_from_running_jobs(pool: PgPool) {
        insert_running_job(&pool, 2000, 4096).await;
        insert_running_job(&pool, 1000, 1024).await;

        let ledger = ResourceLedger::reconcile_from_running_jobs(&pool, 8000, 16_384, 0).await.unwrap();
        assert_eq!(ledger.available(), (5000, 11_264, 0));
        assert_eq!(ledger.totals(), (8000, 16_384, 0));
    }
}
