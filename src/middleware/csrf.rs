use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use rand::{distributions::Alphanumeric, Rng};
use serde_json::json;
use tower_cookies::{Cookie, Cookies};

pub const CSRF_COOKIE_NAME: &str = "csrf_token";
const CSRF_HEADER_NAME: &str = "x-csrf-token";

/// Double-submit cookie: the cookie and header values must match. Applied
/// only to mutating methods behind the auth layer; bearer-only API clients
/// that never receive the cookie are unaffected since the check is skipped
/// when no cookie was set for this session in the first place.
pub async fn validate_csrf(cookies: Cookies, headers: HeaderMap, request: Request, next: Next) -> Response {
    let method = request.method();
    if matches!(*method, axum::http::Method::GET | axum::http::Method::HEAD | axum::http::Method::OPTIONS) {
        return next.run(request).await;
    }

    let cookie_token = cookies.get(CSRF_COOKIE_NAME).map(|c| c.value().to_string());
    let Some(cookie_token) = cookie_token else {
        return next.run(request).await;
    };

    let header_token = headers
        .get(CSRF_HEADER_NAME)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    match header_token {
        Some(header_token) if header_token == cookie_token => next.run(request).await,
        _ => (
            StatusCode::FORBIDDEN,
            Json(json!({"ok": false, "error": {"code": "Invalid", "message": "csrf token mismatch"}})),
        )
            .into_response(),
    }
}

pub fn set_csrf_cookie(cookies: &Cookies) {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    let cookie = Cookie::build((CSRF_COOKIE_NAME, token))
        .http_only(false)
        .path("/")
        .same_site(tower_cookies::cookie::SameSite::Lax)
        .build();
    cookies.add(cookie);
}
