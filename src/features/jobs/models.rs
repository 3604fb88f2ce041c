use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct ResourceRequirements {
    pub cpu_millis: i64,
    pub memory_mb: i64,
    #[serde(default)]
    pub gpu_units: i64,
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Job {
    pub id: Uuid,
    pub workspace_id: Option<Uuid>,
    pub kind: String,
    pub payload: JsonValue,
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub resource_requirements: JsonValue,
    pub progress_pct: i16,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub cancel_requested: bool,
    /// Driver-opaque resumption state, written periodically by whichever
    /// `JobDriver` is executing this job. Survives a requeue after worker
    /// loss so the next attempt can pick up past the last checkpoint instead
    /// of restarting from scratch.
    pub checkpoint_blob: Option<JsonValue>,
}

impl Job {
    pub fn resources(&self) -> ResourceRequirements {
        serde_json::from_value(self.resource_requirements.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub workspace_id: Option<Uuid>,
    pub kind: String,
    pub payload: JsonValue,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub max_attempts: Option<i32>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// One row per state transition a job goes through, kept alongside the job
/// row itself so a stuck or failed pipeline can be diagnosed after the fact
/// without replaying logs.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct JobEvent {
    pub id: Uuid,
    pub job_id: Uuid,
    pub event_type: String,
    pub message: Option<String>,
    pub progress_pct: Option<i16>,
    pub created_at: DateTime<Utc>,
}

/// Point-in-time snapshot of cluster capacity, written by the runner on a
/// timer so `GET /jobs/cluster-status` reads a concrete row instead of
/// racing the in-memory ledger on every request.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct ClusterMetricSample {
    pub id: Uuid,
    pub available_cpu_millis: i64,
    pub available_memory_mb: i64,
    pub available_gpu_units: i64,
    pub total_cpu_millis: i64,
    pub total_memory_mb: i64,
    pub total_gpu_units: i64,
    pub sampled_at: DateTime<Utc>,
}
