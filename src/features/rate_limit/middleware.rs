use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::features::auth::jwt::Claims;
use crate::features::rate_limit::service::RateLimitService;

const BYPASS_HEADER: &str = "x-rate-limit-bypass";

pub async fn rate_limit_middleware(
    State(rate_limit_service): State<RateLimitService>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if let Some(token) = headers.get(BYPASS_HEADER).and_then(|h| h.to_str().ok()) {
        if rate_limit_service.verify_bypass_token(token).await.unwrap_or(false) {
            return next.run(request).await;
        }
    }

    let user_id = request.extensions().get::<Claims>().map(|claims| claims.sub.to_string());

    let ip = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|h| h.to_str().ok()))
        .unwrap_or("unknown")
        .to_string();

    let path = request.uri().path();
    let (rule_id, identifier) = determine_rule_and_identifier(path, user_id, &ip);

    match rate_limit_service.check_rate_limit_with_endpoint(&rule_id, &identifier, path).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", retry_after.to_string()), ("X-RateLimit-Rule", rule_id)],
            Json(json!({
                "ok": false,
                "error": {
                    "code": "RateLimited",
                    "message": format!("rate limit exceeded, retry in {}s", retry_after),
                    "retry_after": retry_after,
                }
            })),
        )
            .into_response(),
    }
}

fn determine_rule_and_identifier(path: &str, user_id: Option<String>, ip: &str) -> (String, String) {
    match path {
        "/api/auth/login" => return ("auth-login".to_string(), ip.to_string()),
        "/api/auth/mfa/challenge" => return ("auth-mfa-challenge".to_string(), ip.to_string()),
        "/api/auth/forgot-password" => return ("auth-forgot-password".to_string(), ip.to_string()),
        "/api/auth/register" => return ("auth-register".to_string(), ip.to_string()),
        _ => {}
    }

    if path.starts_with("/api/auth/") {
        return ("auth-general".to_string(), user_id.unwrap_or_else(|| ip.to_string()));
    }

    if path.starts_with("/api/admin/") {
        return ("admin".to_string(), user_id.unwrap_or_else(|| ip.to_string()));
    }

    if path.starts_with("/api/") {
        return ("api-default".to_string(), user_id.unwrap_or_else(|| ip.to_string()));
    }

    ("none".to_string(), "none".to_string())
}
