use crate::error::AppError;
use crate::features::audit::models::AuditQuery;
use crate::features::audit::service::AuditService;
use crate::features::auth::jwt::Claims;
use crate::features::rbac::{Permission, RbacService};
use axum::{
    extract::{Extension, Query, State},
    routing::get,
    Json, Router,
};

#[derive(Clone)]
pub struct AuditState {
    pub audit: AuditService,
    pub rbac: RbacService,
}

pub fn audit_routes() -> Router<AuditState> {
    Router::new().route("/audit", get(query_audit_handler))
}

async fn query_audit_handler(
    State(state): State<AuditState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .rbac
        .require(claims.sub, claims.roles_version, Permission::AuditRead)
        .await?;
    let page = state.audit.query(query).await?;
    Ok(Json(serde_json::json!({"ok": true, "page": page})))
}
