use crate::error::AppError;
use crate::features::auth::jwt::Claims;
use crate::features::rbac::models::{AssignRoleRequest, CreateRoleRequest, Permission, UpdateRoleRequest};
use crate::features::rbac::service::RbacService;
use axum::{
    extract::{Extension, Path, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use uuid::Uuid;

pub fn role_routes() -> Router<RbacService> {
    Router::new()
        .route("/roles", get(list_roles_handler).post(create_role_handler))
        .route(
            "/roles/:role_id",
            get(get_role_handler).put(update_role_handler).delete(delete_role_handler),
        )
        .route("/roles/assign", post(assign_role_handler))
        .route("/users/:user_id/roles", get(list_user_roles_handler))
        .route("/users/:user_id/roles/:role_name", delete(remove_role_handler))
}

async fn list_roles_handler(
    State(rbac): State<RbacService>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, AppError> {
    rbac.require(claims.sub, claims.roles_version, Permission::RoleRead).await?;
    let roles = rbac.list_roles().await?;
    Ok(Json(serde_json::json!({"ok": true, "roles": roles})))
}

async fn create_role_handler(
    State(rbac): State<RbacService>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateRoleRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    rbac.require(claims.sub, claims.roles_version, Permission::RoleCreate).await?;
    let role = rbac.create_role(&payload.name, payload.permissions).await?;
    Ok(Json(serde_json::json!({"ok": true, "role": role})))
}

async fn get_role_handler(
    State(rbac): State<RbacService>,
    Extension(claims): Extension<Claims>,
    Path(role_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    rbac.require(claims.sub, claims.roles_version, Permission::RoleRead).await?;
    let role = rbac.get_role(role_id).await?;
    Ok(Json(serde_json::json!({"ok": true, "role": role})))
}

async fn update_role_handler(
    State(rbac): State<RbacService>,
    Extension(claims): Extension<Claims>,
    Path(role_id): Path<Uuid>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    rbac.require(claims.sub, claims.roles_version, Permission::RoleUpdate).await?;
    let role = rbac.update_role(role_id, payload.permissions).await?;
    Ok(Json(serde_json::json!({"ok": true, "role": role})))
}

async fn delete_role_handler(
    State(rbac): State<RbacService>,
    Extension(claims): Extension<Claims>,
    Path(role_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    rbac.require(claims.sub, claims.roles_version, Permission::RoleDelete).await?;
    rbac.delete_role(role_id).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn assign_role_handler(
    State(rbac): State<RbacService>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<AssignRoleRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    rbac.require(claims.sub, claims.roles_version, Permission::RoleAssign).await?;
    rbac.assign_role(payload.user_id, &payload.role_name).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn remove_role_handler(
    State(rbac): State<RbacService>,
    Extension(claims): Extension<Claims>,
    Path((user_id, role_name)): Path<(Uuid, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    rbac.require(claims.sub, claims.roles_version, Permission::RoleAssign).await?;
    rbac.remove_role(user_id, &role_name).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn list_user_roles_handler(
    State(rbac): State<RbacService>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    rbac.require(claims.sub, claims.roles_version, Permission::RoleRead).await?;
    let roles = rbac.list_user_roles(user_id).await?;
    Ok(Json(serde_json::json!({"ok": true, "roles": roles})))
}
