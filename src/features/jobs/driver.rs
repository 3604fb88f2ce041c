use crate::features::jobs::models::Job;
use crate::features::jobs::queue::JobQueue;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Handed to a driver so it can report progress and cooperatively notice a
/// cancellation request without depending on the queue directly.
#[derive(Clone)]
pub struct ProgressReporter {
    queue: JobQueue,
    job_id: Uuid,
    cancel_flag: Arc<AtomicBool>,
}

impl ProgressReporter {
    pub fn new(queue: JobQueue, job_id: Uuid, cancel_flag: Arc<AtomicBool>) -> Self {
        Self { queue, job_id, cancel_flag }
    }

    pub async fn report(&self, progress_pct: i16) {
        if let Err(e) = self.queue.update_progress(self.job_id, progress_pct).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "failed to persist job progress");
        }
    }

    /// Persists driver-opaque resumption state. A driver that checkpoints
    /// periodically lets the next attempt (after a worker-loss requeue)
    /// resume from here instead of starting over; `job.checkpoint_blob`
    /// passed into `execute` is whatever the last call wrote.
    pub async fn checkpoint(&self, blob: JsonValue) {
        if let Err(e) = self.queue.save_checkpoint(self.job_id, blob).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "failed to persist job checkpoint");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }
}

/// Extension point: a pipeline kind plugs in its own execution logic here.
/// Driver implementations run inside the runner's worker task and are
/// expected to poll `progress.is_cancelled()` between steps so cooperative
/// cancellation can take effect within the runner's grace period.
#[async_trait]
pub trait JobDriver: Send + Sync {
    async fn execute(&self, job: &Job, progress: ProgressReporter) -> Result<JsonValue, String>;
}

#[derive(Clone, Default)]
pub struct JobDriverRegistry {
    drivers: HashMap<String, Arc<dyn JobDriver>>,
}

impl JobDriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, driver: Arc<dyn JobDriver>) {
        self.drivers.insert(kind.into(), driver);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn JobDriver>> {
        self.drivers.get(kind).cloned()
    }
}
