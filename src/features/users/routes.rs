use crate::error::AppError;
use crate::features::auth::jwt::Claims;
use crate::features::rbac::{Permission, RbacService};
use crate::features::users::service::UserService;
use axum::{
    extract::{Extension, Path, State},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

#[derive(Clone)]
pub struct UserState {
    pub users: UserService,
    pub rbac: RbacService,
}

pub fn user_routes() -> Router<UserState> {
    Router::new()
        .route("/users", get(list_users_handler))
        .route("/users/:id", get(get_user_handler))
        .route("/users/:id/deactivate", post(deactivate_handler))
        .route("/users/:id/activate", post(activate_handler))
        .route("/users/:id/anonymize", post(anonymize_handler))
}

async fn list_users_handler(
    State(state): State<UserState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.rbac.require(claims.sub, claims.roles_version, Permission::UserRead).await?;
    let users = state.users.find_all().await?;
    Ok(Json(serde_json::json!({"ok": true, "users": users})))
}

async fn get_user_handler(
    State(state): State<UserState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.rbac.require(claims.sub, claims.roles_version, Permission::UserRead).await?;
    let user = state.users.find_by_id(id).await?;
    Ok(Json(serde_json::json!({"ok": true, "user": user})))
}

async fn deactivate_handler(
    State(state): State<UserState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.rbac.require(claims.sub, claims.roles_version, Permission::UserDeactivate).await?;
    let user = state.users.set_active(id, false, Some(claims.sub)).await?;
    Ok(Json(serde_json::json!({"ok": true, "user": user})))
}

async fn activate_handler(
    State(state): State<UserState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.rbac.require(claims.sub, claims.roles_version, Permission::UserDeactivate).await?;
    let user = state.users.set_active(id, true, Some(claims.sub)).await?;
    Ok(Json(serde_json::json!({"ok": true, "user": user})))
}

async fn anonymize_handler(
    State(state): State<UserState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.rbac.require(claims.sub, claims.roles_version, Permission::UserDeactivate).await?;
    state.users.anonymize(id, Some(claims.sub)).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}
