use crate::error::AppError;
use crate::features::audit::service::AuditService;
use crate::features::auth::jwt::Claims;
use crate::features::jobs::ledger::ResourceLedger;
use crate::features::jobs::models::{ResourceRequirements, SubmitJobRequest};
use crate::features::jobs::queue::JobQueue;
use crate::features::rbac::{Permission, RbacService};
use axum::{
    extract::{Extension, Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobState {
    pub queue: JobQueue,
    pub ledger: Arc<ResourceLedger>,
    pub rbac: RbacService,
    pub audit: AuditService,
}

pub fn job_routes() -> Router<JobState> {
    Router::new()
        .route("/jobs", post(submit_job_handler))
        .route("/jobs/:job_id", get(get_job_handler))
        .route("/jobs/:job_id/events", get(list_job_events_handler))
        .route("/jobs/:job_id/cancel", post(cancel_job_handler))
        .route("/workspaces/:workspace_id/jobs", get(list_workspace_jobs_handler))
        .route("/jobs/cluster-status", get(cluster_status_handler))
        .route("/jobs/scale", post(scale_handler))
}

async fn submit_job_handler(
    State(state): State<JobState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SubmitJobRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.rbac.require(claims.sub, claims.roles_version, Permission::PipelineRun).await?;

    if state.ledger.exceeds_total_capacity(payload.resources) {
        return Err(AppError::Invalid("requested resources exceed total cluster capacity".into()));
    }

    let job = state.queue.submit(payload, Some(claims.sub)).await?;
    state
        .audit
        .log(
            Some(claims.sub),
            "job.submit",
            "job",
            Some(job.id),
            "success",
            None,
            None,
            None,
            None,
        )
        .await?;
    Ok(Json(serde_json::json!({"ok": true, "job": job})))
}

async fn get_job_handler(
    State(state): State<JobState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let job = state.queue.get(job_id).await?;
    Ok(Json(serde_json::json!({"ok": true, "job": job})))
}

/// Cancellable by the job's own creator or by anyone holding
/// `PipelineCancel` (e.g. an Admin or PI reining in a runaway job).
async fn cancel_job_handler(
    State(state): State<JobState>,
    Extension(claims): Extension<Claims>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let job = state.queue.get(job_id).await?;
    let is_owner = job.created_by == Some(claims.sub);
    if !is_owner {
        state.rbac.require(claims.sub, claims.roles_version, Permission::PipelineCancel).await?;
    }

    state.queue.request_cancel(job_id).await?;
    state
        .audit
        .log(
            Some(claims.sub),
            "job.cancel",
            "job",
            Some(job_id),
            "success",
            None,
            None,
            None,
            None,
        )
        .await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn list_job_events_handler(
    State(state): State<JobState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let events = state.queue.list_events(job_id).await?;
    Ok(Json(serde_json::json!({"ok": true, "events": events})))
}

async fn list_workspace_jobs_handler(
    State(state): State<JobState>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let jobs = state.queue.list_for_workspace(workspace_id).await?;
    Ok(Json(serde_json::json!({"ok": true, "jobs": jobs})))
}

/// Cluster-wide capacity snapshot. Reads the latest durable sample the
/// runner's background loop writes on a timer; falls back to a live read of
/// the ledger if the cluster has just booted and no sample exists yet.
async fn cluster_status_handler(State(state): State<JobState>) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(sample) = state.queue.latest_cluster_sample().await? {
        return Ok(Json(serde_json::json!({
            "ok": true,
            "available": {
                "cpu_millis": sample.available_cpu_millis,
                "memory_mb": sample.available_memory_mb,
                "gpu_units": sample.available_gpu_units,
            },
            "total": {
                "cpu_millis": sample.total_cpu_millis,
                "memory_mb": sample.total_memory_mb,
                "gpu_units": sample.total_gpu_units,
            },
            "sampled_at": sample.sampled_at,
        })));
    }

    let (avail_cpu, avail_mem, avail_gpu) = state.ledger.available();
    let (total_cpu, total_mem, total_gpu) = state.ledger.totals();
    Ok(Json(serde_json::json!({
        "ok": true,
        "available": {"cpu_millis": avail_cpu, "memory_mb": avail_mem, "gpu_units": avail_gpu},
        "total": {"cpu_millis": total_cpu, "memory_mb": total_mem, "gpu_units": total_gpu},
    })))
}

#[derive(Debug, Deserialize)]
struct ScaleRequest {
    delta_cpu_millis: i64,
    delta_memory_mb: i64,
    #[serde(default)]
    delta_gpu_units: i64,
}

/// Adjusts total cluster capacity when workers are added or removed.
/// Admin-only: this reshapes how much work the whole cluster can run at
/// once, not a single workspace's concern.
async fn scale_handler(
    State(state): State<JobState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ScaleRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.rbac.require(claims.sub, claims.roles_version, Permission::SystemAdmin).await?;
    state.ledger.scale(ResourceRequirements {
        cpu_millis: payload.delta_cpu_millis,
        memory_mb: payload.delta_memory_mb,
        gpu_units: payload.delta_gpu_units,
    });
    state
        .audit
        .log(Some(claims.sub), "cluster.scale", "cluster", None, "success", None, None, None, None)
        .await?;
    let (total_cpu, total_mem, total_gpu) = state.ledger.totals();
    Ok(Json(serde_json::json!({"ok": true, "total": {"cpu_millis": total_cpu, "memory_mb": total_mem, "gpu_units": total_gpu}})))
}
