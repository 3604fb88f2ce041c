use crate::features::auth::jwt::Claims;
use crate::features::auth::mfa::{MfaError, MfaService};
use crate::features::auth::models::{
    AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginUser, MfaChallengeRequest,
    RegisterUser, ResetPasswordRequest,
};
use crate::features::auth::service::{AuthError, AuthService};
use crate::features::users::service::UserService;
use axum::{
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;
use validator::Validate;

use crate::middleware::csrf::{set_csrf_cookie, CSRF_COOKIE_NAME};

const ACCESS_TOKEN_COOKIE: &str = "access_token";
const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or("").trim().to_string())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()).map(str::to_string))
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers.get("user-agent").and_then(|v| v.to_str().ok()).map(str::to_string)
}

pub(crate) fn set_auth_cookies(cookies: &Cookies, auth: &AuthResponse) {
    if let Some(access_token) = &auth.access_token {
        let access_cookie = Cookie::build((ACCESS_TOKEN_COOKIE, access_token.clone()))
            .http_only(true)
            .path("/")
            .secure(cfg!(not(debug_assertions)))
            .max_age(tower_cookies::cookie::time::Duration::seconds(auth.expires_in.unwrap_or(3600)))
            .same_site(tower_cookies::cookie::SameSite::Lax)
            .build();
        cookies.add(access_cookie);
    }

    if let Some(refresh_token) = &auth.refresh_token {
        let mut refresh_builder = Cookie::build((REFRESH_TOKEN_COOKIE, refresh_token.clone()))
            .http_only(true)
            .path("/")
            .secure(cfg!(not(debug_assertions)))
            .same_site(tower_cookies::cookie::SameSite::Lax);

        if auth.remember_me {
            refresh_builder = refresh_builder.max_age(tower_cookies::cookie::time::Duration::days(30));
        }
        cookies.add(refresh_builder.build());
    }

    set_csrf_cookie(cookies);
}

fn clear_auth_cookies(cookies: &Cookies) {
    for name in [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE, CSRF_COOKIE_NAME] {
        let mut cookie = Cookie::new(name, "");
        cookie.set_path("/");
        cookie.set_max_age(tower_cookies::cookie::time::Duration::seconds(0));
        cookies.add(cookie);
    }
}

pub fn public_auth_routes() -> Router<AuthService> {
    Router::new()
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route("/refresh", post(refresh_token_handler))
        .route("/forgot-password", post(forgot_password_handler))
        .route("/reset-password", post(reset_password_handler))
        .route("/mfa/challenge", post(mfa_challenge_handler))
}

pub fn protected_auth_routes() -> Router<AuthService> {
    Router::new()
        .route("/change-password", post(change_password_handler))
        .route("/logout", post(logout_handler))
        .route("/logout-all", post(logout_all_handler))
        .route("/sessions", get(list_sessions_handler))
        .route("/sessions/:token_id", delete(revoke_session_handler))
        .route("/me", get(current_user_handler))
}

async fn register_handler(
    State(auth_service): State<AuthService>,
    headers: HeaderMap,
    Json(payload): Json<RegisterUser>,
) -> Result<(StatusCode, Json<serde_json::Value>), AuthError> {
    payload
        .validate()
        .map_err(|e| AuthError::ValidationError(e.to_string()))?;
    let user = auth_service.register(payload, client_ip(&headers)).await?;
    tracing::info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(serde_json::json!({"ok": true, "user": user}))))
}

async fn login_handler(
    State(auth_service): State<AuthService>,
    headers: HeaderMap,
    cookies: Cookies,
    Json(payload): Json<LoginUser>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    let auth = auth_service
        .login(payload, client_ip(&headers), user_agent(&headers))
        .await?;
    set_auth_cookies(&cookies, &auth);
    let status = if auth.mfa_required { StatusCode::ACCEPTED } else { StatusCode::OK };
    Ok((status, Json(auth)))
}

async fn mfa_challenge_handler(
    State(auth_service): State<AuthService>,
    headers: HeaderMap,
    cookies: Cookies,
    Json(payload): Json<MfaChallengeRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let auth = auth_service
        .verify_mfa_and_login(
            &payload.temp_token,
            &payload.code,
            payload.is_backup_code,
            false,
            client_ip(&headers),
            user_agent(&headers),
        )
        .await?;
    set_auth_cookies(&cookies, &auth);
    Ok(Json(auth))
}

#[derive(Debug, Deserialize)]
struct RefreshTokenRequest {
    refresh_token: Option<String>,
}

async fn refresh_token_handler(
    State(auth_service): State<AuthService>,
    headers: HeaderMap,
    cookies: Cookies,
    body: Option<Json<RefreshTokenRequest>>,
) -> Result<Json<AuthResponse>, AuthError> {
    let refresh_token = cookies
        .get(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| body.and_then(|b| b.0.refresh_token.clone()))
        .ok_or(AuthError::InvalidRefreshToken)?;

    let auth = auth_service
        .refresh_token(&refresh_token, client_ip(&headers), user_agent(&headers))
        .await?;
    set_auth_cookies(&cookies, &auth);
    Ok(Json(auth))
}

async fn logout_handler(
    State(auth_service): State<AuthService>,
    cookies: Cookies,
    body: Option<Json<RefreshTokenRequest>>,
) -> impl IntoResponse {
    let refresh_token = cookies
        .get(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| body.and_then(|b| b.0.refresh_token.clone()));

    if let Some(token) = refresh_token {
        let _ = auth_service.logout(&token).await;
    }
    clear_auth_cookies(&cookies);
    Json(serde_json::json!({"ok": true}))
}

async fn logout_all_handler(
    State(auth_service): State<AuthService>,
    Extension(claims): Extension<Claims>,
    cookies: Cookies,
) -> Result<Json<serde_json::Value>, AuthError> {
    auth_service.logout_all(claims.sub).await?;
    clear_auth_cookies(&cookies);
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn change_password_handler(
    State(auth_service): State<AuthService>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
    payload
        .validate()
        .map_err(|e| AuthError::ValidationError(e.to_string()))?;
    auth_service.change_password(claims.sub, payload).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn forgot_password_handler(
    State(auth_service): State<AuthService>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
    payload
        .validate()
        .map_err(|e| AuthError::ValidationError(e.to_string()))?;
    let _ = auth_service.request_password_reset(&payload.email).await;
    Ok(Json(serde_json::json!({
        "ok": true,
        "message": "if an account with that email exists, a reset link has been sent"
    })))
}

async fn reset_password_handler(
    State(auth_service): State<AuthService>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
    payload
        .validate()
        .map_err(|e| AuthError::ValidationError(e.to_string()))?;
    auth_service.reset_password(&payload.token, &payload.new_password).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn list_sessions_handler(
    State(auth_service): State<AuthService>,
    Extension(claims): Extension<Claims>,
    cookies: Cookies,
) -> Result<Json<serde_json::Value>, AuthError> {
    let current = cookies.get(REFRESH_TOKEN_COOKIE).map(|c| c.value().to_string());
    let sessions = auth_service.list_active_sessions(claims.sub, current.as_deref()).await?;
    Ok(Json(serde_json::json!({"ok": true, "sessions": sessions})))
}

async fn revoke_session_handler(
    State(auth_service): State<AuthService>,
    Extension(claims): Extension<Claims>,
    Path(token_id): Path<String>,
) -> Result<Json<serde_json::Value>, AuthError> {
    auth_service.revoke_session(claims.sub, &token_id).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

#[derive(Debug, Serialize)]
struct CurrentUserResponse {
    id: Uuid,
    roles_version: i32,
}

async fn current_user_handler(Extension(claims): Extension<Claims>) -> Json<CurrentUserResponse> {
    Json(CurrentUserResponse {
        id: claims.sub,
        roles_version: claims.roles_version,
    })
}

#[derive(Clone)]
pub struct MfaState {
    pub mfa: MfaService,
    pub users: UserService,
}

pub fn mfa_self_service_routes() -> Router<MfaState> {
    Router::new()
        .route("/mfa/setup", post(setup_mfa_handler))
        .route("/mfa/verify-setup", post(verify_mfa_setup_handler))
        .route("/mfa/disable", post(disable_mfa_handler))
        .route("/mfa/backup-codes/regenerate", post(regenerate_backup_codes_handler))
        .route("/mfa/status", get(mfa_status_handler))
}

#[derive(Debug, Deserialize)]
struct VerifyMfaSetupRequest {
    code: String,
}

async fn setup_mfa_handler(
    State(state): State<MfaState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, MfaError> {
    let user = state.users.find_by_id(claims.sub).await.map_err(|_| MfaError::MfaNotFound)?;
    let setup = state.mfa.setup_mfa(claims.sub, &user.email).await?;
    Ok(Json(serde_json::json!({"ok": true, "setup": setup})))
}

async fn verify_mfa_setup_handler(
    State(state): State<MfaState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<VerifyMfaSetupRequest>,
) -> Result<Json<serde_json::Value>, MfaError> {
    state.mfa.verify_setup(claims.sub, &payload.code).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn disable_mfa_handler(
    State(state): State<MfaState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, MfaError> {
    state.mfa.disable_mfa(claims.sub).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn regenerate_backup_codes_handler(
    State(state): State<MfaState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, MfaError> {
    let codes = state.mfa.regenerate_backup_codes(claims.sub).await?;
    Ok(Json(serde_json::json!({"ok": true, "backup_codes": codes})))
}

async fn mfa_status_handler(
    State(state): State<MfaState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, MfaError> {
    let status = state.mfa.get_status(claims.sub).await?;
    Ok(Json(serde_json::json!({"ok": true, "status": status})))
}
