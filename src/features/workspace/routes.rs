use crate::error::AppError;
use crate::features::auth::jwt::Claims;
use crate::features::crdt::CrdtEngine;
use crate::features::hub::HubRegistry;
use crate::features::jobs::JobQueue;
use crate::features::workspace::models::{CreateWorkspaceRequest, InviteMemberRequest, SetMemberRoleRequest, UpdateWorkspaceRequest};
use crate::features::workspace::service::WorkspaceService;
use axum::{
    extract::{Extension, Path, State},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

#[derive(Clone)]
pub struct WorkspaceState {
    pub workspaces: WorkspaceService,
    pub hub: HubRegistry,
    pub crdt: CrdtEngine,
    pub jobs: JobQueue,
}

pub fn workspace_routes() -> Router<WorkspaceState> {
    Router::new()
        .route("/workspaces", get(list_workspaces_handler).post(create_workspace_handler))
        .route(
            "/workspaces/:workspace_id",
            get(get_workspace_handler).patch(update_workspace_handler).delete(delete_workspace_handler),
        )
        .route("/workspaces/:workspace_id/leave", post(leave_workspace_handler))
        .route(
            "/workspaces/:workspace_id/members",
            get(list_members_handler).post(invite_member_handler),
        )
        .route("/workspaces/:workspace_id/members/:user_id", post(set_member_role_handler))
}

async fn create_workspace_handler(
    State(state): State<WorkspaceState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateWorkspaceRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let workspace = state.workspaces.create_workspace(claims.sub, payload).await?;
    Ok(Json(serde_json::json!({"ok": true, "workspace": workspace})))
}

async fn list_workspaces_handler(
    State(state): State<WorkspaceState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, AppError> {
    let list = state.workspaces.list_workspaces_for_user(claims.sub).await?;
    Ok(Json(serde_json::json!({"ok": true, "workspaces": list})))
}

async fn get_workspace_handler(
    State(state): State<WorkspaceState>,
    Extension(claims): Extension<Claims>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.workspaces.get_member(workspace_id, claims.sub).await?;
    let workspace = state.workspaces.get_workspace(workspace_id).await?;
    Ok(Json(serde_json::json!({"ok": true, "workspace": workspace})))
}

async fn update_workspace_handler(
    State(state): State<WorkspaceState>,
    Extension(claims): Extension<Claims>,
    Path(workspace_id): Path<Uuid>,
    Json(payload): Json<UpdateWorkspaceRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let workspace = state.workspaces.update_workspace(workspace_id, claims.sub, payload).await?;
    Ok(Json(serde_json::json!({"ok": true, "workspace": workspace})))
}

/// Tears down a workspace in dependency order. Jobs are cancelled first:
/// `jobs.workspace_id` is `ON DELETE SET NULL`, not cascading, so a running
/// job left alone would keep holding ledger capacity against a workspace
/// that no longer exists. Only after that do we evict the hub room (kicking
/// live connections off cleanly), flush and drop the CRDT snapshot, and
/// finally delete the workspace row itself (and its `crdt_docs` rows, via
/// `ON DELETE CASCADE`).
async fn delete_workspace_handler(
    State(state): State<WorkspaceState>,
    Extension(claims): Extension<Claims>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.workspaces.require_owner(workspace_id, claims.sub).await?;
    state.jobs.cancel_all_for_workspace(workspace_id).await?;
    state.hub.evict_room(workspace_id);
    state.crdt.evict(workspace_id).await?;
    state.workspaces.delete_workspace(workspace_id, claims.sub).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn leave_workspace_handler(
    State(state): State<WorkspaceState>,
    Extension(claims): Extension<Claims>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.workspaces.leave_workspace(workspace_id, claims.sub).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn list_members_handler(
    State(state): State<WorkspaceState>,
    Extension(claims): Extension<Claims>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let members = state.workspaces.list_members(workspace_id, claims.sub).await?;
    Ok(Json(serde_json::json!({"ok": true, "members": members})))
}

async fn invite_member_handler(
    State(state): State<WorkspaceState>,
    Extension(claims): Extension<Claims>,
    Path(workspace_id): Path<Uuid>,
    Json(payload): Json<InviteMemberRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let member = state.workspaces.invite_member(workspace_id, claims.sub, payload.user_id, payload.role).await?;
    Ok(Json(serde_json::json!({"ok": true, "member": member})))
}

async fn set_member_role_handler(
    State(state): State<WorkspaceState>,
    Extension(claims): Extension<Claims>,
    Path((workspace_id, user_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<SetMemberRoleRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let member = state.workspaces.set_member_role(workspace_id, claims.sub, user_id, payload.role).await?;
    Ok(Json(serde_json::json!({"ok": true, "member": member})))
}
