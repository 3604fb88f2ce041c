use crate::error::AppError;
use crate::features::auth::jwt::Claims;
use crate::features::rate_limit::models::{CreateBypassToken, UpdateRateLimitRule};
use crate::features::rate_limit::service::RateLimitService;
use crate::features::rbac::{Permission, RbacService};
use axum::{
    extract::{Extension, Path, State},
    routing::{delete, get, put},
    Json, Router,
};
use uuid::Uuid;

#[derive(Clone)]
pub struct RateLimitAdminState {
    pub rate_limit: RateLimitService,
    pub rbac: RbacService,
}

pub fn public_rate_limit_routes() -> Router<RateLimitAdminState> {
    Router::new()
        .route("/rate-limits/rules", get(list_rules_handler))
        .route("/rate-limits/rules/:rule_id", put(update_rule_handler))
        .route("/rate-limits/bypass-tokens", get(list_bypass_tokens_handler).post(create_bypass_token_handler))
        .route("/rate-limits/bypass-tokens/:id", delete(delete_bypass_token_handler))
}

async fn list_rules_handler(
    State(state): State<RateLimitAdminState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.rbac.require(claims.sub, claims.roles_version, Permission::SystemAdmin).await?;
    let rules = state.rate_limit.list_rules().await?;
    Ok(Json(serde_json::json!({"ok": true, "rules": rules})))
}

async fn update_rule_handler(
    State(state): State<RateLimitAdminState>,
    Extension(claims): Extension<Claims>,
    Path(rule_id): Path<String>,
    Json(payload): Json<UpdateRateLimitRule>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.rbac.require(claims.sub, claims.roles_version, Permission::SystemAdmin).await?;
    state.rate_limit.update_rule(&rule_id, payload).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn list_bypass_tokens_handler(
    State(state): State<RateLimitAdminState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.rbac.require(claims.sub, claims.roles_version, Permission::SystemAdmin).await?;
    let tokens = state.rate_limit.list_bypass_tokens().await?;
    Ok(Json(serde_json::json!({"ok": true, "tokens": tokens})))
}

async fn create_bypass_token_handler(
    State(state): State<RateLimitAdminState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateBypassToken>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.rbac.require(claims.sub, claims.roles_version, Permission::SystemAdmin).await?;
    let token = state.rate_limit.create_bypass_token(payload, Some(claims.sub)).await?;
    Ok(Json(serde_json::json!({"ok": true, "token": token})))
}

async fn delete_bypass_token_handler(
    State(state): State<RateLimitAdminState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.rbac.require(claims.sub, claims.roles_version, Permission::SystemAdmin).await?;
    state.rate_limit.delete_bypass_token(id).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}
