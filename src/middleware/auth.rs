use crate::config::Config;
use crate::features::auth::jwt::{validate_jwt, Claims};
use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tower_cookies::Cookies;

const ACCESS_TOKEN_COOKIE: &str = "access_token";

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"ok": false, "error": {"code": "AuthRequired", "message": message}})),
    )
        .into_response()
}

/// Resolves a bearer/cookie JWT into request-scoped `Claims`, rejecting a
/// token whose `roles_version` trails the user row — the invalidation path
/// for a role change that must take effect before the token's own expiry.
pub async fn auth_middleware(
    Extension(config): Extension<Arc<Config>>,
    Extension(pool): Extension<PgPool>,
    cookies: Cookies,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| cookies.get(ACCESS_TOKEN_COOKIE).map(|c| c.value().to_string()));

    let Some(token) = token else {
        return unauthorized("missing credentials");
    };

    let claims = match validate_jwt(&token, &config) {
        Ok(claims) => claims,
        Err(_) => return unauthorized("invalid or expired token"),
    };

    let current: Option<(i32, bool)> =
        sqlx::query_as("SELECT roles_version, is_active FROM users WHERE id = $1")
            .bind(claims.sub)
            .fetch_optional(&pool)
            .await
            .unwrap_or(None);

    match current {
        Some((roles_version, is_active)) if is_active && roles_version == claims.roles_version => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Some((roles_version, is_active)) if is_active && roles_version != claims.roles_version => {
            unauthorized("token stale: roles changed, re-authenticate")
        }
        _ => unauthorized("account inactive or not found"),
    }
}
