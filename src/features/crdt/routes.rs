use crate::error::AppError;
use crate::features::crdt::engine::CrdtEngine;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SyncParams {
    pub since_version: Option<u64>,
}

pub fn crdt_routes() -> Router<CrdtEngine> {
    Router::new()
        .route("/workspaces/:workspace_id/doc", get(sync_handler))
        .route("/workspaces/:workspace_id/doc/history", get(history_handler))
}

async fn sync_handler(
    State(engine): State<CrdtEngine>,
    Path(workspace_id): Path<Uuid>,
    Query(params): Query<SyncParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = engine.sync_request(workspace_id, params.since_version).await?;
    Ok(Json(serde_json::json!({"ok": true, "result": result})))
}

async fn history_handler(
    State(engine): State<CrdtEngine>,
    Path(workspace_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let entries = engine.recent_history(workspace_id, params.limit.unwrap_or(100)).await?;
    Ok(Json(serde_json::json!({"ok": true, "entries": entries})))
}
