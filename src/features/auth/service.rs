use crate::config::Config;
use crate::features::audit::AuditService;
use crate::features::auth::jwt::{create_jwt, create_refresh_token, JwtError};
use crate::features::auth::mfa::{MfaError, MfaService};
use crate::features::auth::models::{
    AuthResponse, ChangePasswordRequest, LoginUser, RegisterUser, SessionResponse, User,
};
use crate::features::rbac::RbacService;
use crate::utils::email;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("user already exists")]
    UserExists,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("jwt error: {0}")]
    JwtError(String),
    #[error("password hash error: {0}")]
    PasswordHashError(String),
    #[error("refresh token not found or invalid")]
    InvalidRefreshToken,
    #[error("user not found")]
    UserNotFound,
    #[error("mfa error: {0}")]
    Mfa(#[from] MfaError),
    #[error("invalid or expired temp token")]
    InvalidTempToken,
    #[error("account is inactive")]
    AccountInactive,
    #[error("validation error: {0}")]
    ValidationError(String),
}

impl From<JwtError> for AuthError {
    fn from(e: JwtError) -> Self {
        AuthError::JwtError(e.to_string())
    }
}

impl AuthError {
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            Self::UserExists => StatusCode::CONFLICT,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::InvalidRefreshToken => StatusCode::UNAUTHORIZED,
            Self::InvalidTempToken => StatusCode::UNAUTHORIZED,
            Self::AccountInactive => StatusCode::FORBIDDEN,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::Mfa(e) => e.to_status_code(),
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::JwtError(_) | Self::PasswordHashError(_) | Self::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.to_status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "auth error");
        }
        (
            status,
            Json(serde_json::json!({"ok": false, "error": {"code": "AuthInvalid", "message": self.to_string()}})),
        )
            .into_response()
    }
}

/// The register/login/refresh/logout flow plus password-reset and active
/// session management. RBAC role assignment on registration and permission
/// checks on every route live in [`RbacService`]; this service owns the
/// credential and token lifecycle only.
#[derive(Clone)]
pub struct AuthService {
    pool: PgPool,
    config: Config,
    pub mfa_service: MfaService,
    pub rbac: RbacService,
    pub audit: AuditService,
}

impl AuthService {
    pub fn new(pool: PgPool, config: Config, mfa_service: MfaService, rbac: RbacService, audit: AuditService) -> Self {
        Self {
            pool,
            config,
            mfa_service,
            rbac,
            audit,
        }
    }

    pub async fn register(&self, payload: RegisterUser, ip: Option<String>) -> Result<User, AuthError> {
        let existing: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
            .bind(&payload.email)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            self.audit
                .log(
                    None,
                    "user.register",
                    "user",
                    None,
                    "failure",
                    None,
                    None,
                    Some(serde_json::json!({"reason": "email already registered"})),
                    ip,
                )
                .await
                .ok();
            return Err(AuthError::UserExists);
        }

        let password_hash = hash_password(&payload.password)?;

        let user: User = sqlx::query_as(
            "INSERT INTO users (id, email, password_hash, roles_version, is_active, mfa_enabled, mfa_verified, created_at, updated_at)
             VALUES ($1, $2, $3, 0, true, false, false, now(), now())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&payload.email)
        .bind(&password_hash)
        .fetch_one(&self.pool)
        .await?;

        self.rbac.assign_role(user.id, "Viewer").await.ok();

        self.audit
            .log(
                Some(user.id),
                "user.register",
                "user",
                Some(user.id),
                "success",
                None,
                None,
                None,
                ip,
            )
            .await
            .ok();

        Ok(user)
    }

    /// Returns either an issued token pair, or (when MFA is enabled) a
    /// short-lived `temp_token` the caller exchanges via
    /// [`Self::verify_mfa_and_login`].
    pub async fn login(
        &self,
        payload: LoginUser,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<AuthResponse, AuthError> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(&payload.email)
            .fetch_optional(&self.pool)
            .await?;

        let user = match user {
            Some(u) => u,
            None => {
                // Run the verify to keep login timing roughly uniform whether
                // or not the account exists.
                let _ = verify_password("", &dummy_hash());
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !verify_password(&payload.password, &user.password_hash) {
            self.audit
                .log(Some(user.id), "user.login", "user", Some(user.id), "failure", None, None, None, ip)
                .await
                .ok();
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            return Err(AuthError::AccountInactive);
        }

        if user.mfa_enabled && user.mfa_verified {
            let temp_token = create_refresh_token();
            let temp_hash = hash_token(&temp_token);
            sqlx::query(
                "INSERT INTO mfa_challenges (temp_token_hash, user_id, expires_at) VALUES ($1, $2, $3)",
            )
            .bind(&temp_hash)
            .bind(user.id)
            .bind(Utc::now() + Duration::minutes(5))
            .execute(&self.pool)
            .await?;

            return Ok(AuthResponse {
                mfa_required: true,
                temp_token: Some(temp_token),
                remember_me: payload.remember_me,
                ..Default::default()
            });
        }

        self.finish_login(&user, payload.remember_me, ip, user_agent).await
    }

    pub async fn verify_mfa_and_login(
        &self,
        temp_token: &str,
        code: &str,
        is_backup_code: bool,
        remember_me: bool,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<AuthResponse, AuthError> {
        let temp_hash = hash_token(temp_token);
        let row: Option<(Uuid, chrono::DateTime<Utc>)> = sqlx::query_as(
            "SELECT user_id, expires_at FROM mfa_challenges WHERE temp_token_hash = $1",
        )
        .bind(&temp_hash)
        .fetch_optional(&self.pool)
        .await?;

        let (user_id, expires_at) = row.ok_or(AuthError::InvalidTempToken)?;
        if expires_at < Utc::now() {
            return Err(AuthError::InvalidTempToken);
        }

        let verified = if is_backup_code {
            self.mfa_service.verify_backup_code(user_id, code).await
        } else {
            self.mfa_service.verify_code(user_id, code).await
        };
        if let Err(e) = verified {
            self.audit
                .log(
                    Some(user_id),
                    "user.mfa_verify",
                    "user",
                    Some(user_id),
                    "failure",
                    None,
                    None,
                    Some(serde_json::json!({"is_backup_code": is_backup_code})),
                    ip,
                )
                .await
                .ok();
            return Err(e.into());
        }

        sqlx::query("DELETE FROM mfa_challenges WHERE temp_token_hash = $1")
            .bind(&temp_hash)
            .execute(&self.pool)
            .await?;

        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        self.finish_login(&user, remember_me, ip, user_agent).await
    }

    async fn finish_login(
        &self,
        user: &User,
        remember_me: bool,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<AuthResponse, AuthError> {
        sqlx::query("UPDATE users SET last_login_at = now(), last_login_ip = $1, last_user_agent = $2 WHERE id = $3")
            .bind(&ip)
            .bind(&user_agent)
            .bind(user.id)
            .execute(&self.pool)
            .await?;

        let auth = self.generate_tokens(user, ip.clone(), user_agent).await?;

        self.audit
            .log(Some(user.id), "user.login", "user", Some(user.id), "success", None, None, None, ip)
            .await
            .ok();

        Ok(AuthResponse { remember_me, ..auth })
    }

    async fn generate_tokens(
        &self,
        user: &User,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<AuthResponse, AuthError> {
        let access_token = create_jwt(user.id, user.roles_version, &self.config)?;
        let refresh_token = create_refresh_token();
        let refresh_hash = hash_token(&refresh_token);
        let expires_at = Utc::now() + Duration::seconds(self.config.refresh_token_expiry);

        sqlx::query(
            "INSERT INTO refresh_tokens (token_id, user_id, expires_at, created_at, user_agent, ip_address)
             VALUES ($1, $2, $3, now(), $4, $5)",
        )
        .bind(&refresh_hash)
        .bind(user.id)
        .bind(expires_at)
        .bind(&user_agent)
        .bind(&ip)
        .execute(&self.pool)
        .await?;

        Ok(AuthResponse {
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            expires_in: Some(self.config.jwt_expiry),
            mfa_required: false,
            temp_token: None,
            remember_me: false,
        })
    }

    /// Rotates the refresh token on every use. A presented token that is
    /// already marked revoked (because it was already rotated once) is a
    /// replay signal: every outstanding token for that user is revoked.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<AuthResponse, AuthError> {
        let token_hash = hash_token(refresh_token);

        let row: Option<(Uuid, chrono::DateTime<Utc>, Option<chrono::DateTime<Utc>>)> = sqlx::query_as(
            "SELECT user_id, expires_at, revoked_at FROM refresh_tokens WHERE token_id = $1",
        )
        .bind(&token_hash)
        .fetch_optional(&self.pool)
        .await?;

        let (user_id, expires_at, revoked_at) = row.ok_or(AuthError::InvalidRefreshToken)?;

        if revoked_at.is_some() {
            sqlx::query("UPDATE refresh_tokens SET revoked_at = now() WHERE user_id = $1 AND revoked_at IS NULL")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            self.audit
                .log(Some(user_id), "auth.refresh_reuse_detected", "user", Some(user_id), "failure", None, None, None, ip)
                .await
                .ok();
            return Err(AuthError::InvalidRefreshToken);
        }

        if expires_at < Utc::now() {
            return Err(AuthError::InvalidRefreshToken);
        }

        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        if !user.is_active {
            return Err(AuthError::AccountInactive);
        }

        let new_auth = self.generate_tokens(&user, ip, user_agent).await?;
        let new_token_id = new_auth
            .refresh_token
            .as_deref()
            .map(hash_token)
            .unwrap_or_default();

        sqlx::query("UPDATE refresh_tokens SET revoked_at = now(), replaced_by = $1 WHERE token_id = $2")
            .bind(&new_token_id)
            .bind(&token_hash)
            .execute(&self.pool)
            .await?;

        self.audit
            .log(Some(user_id), "auth.refresh", "user", Some(user_id), "success", None, None, None, ip)
            .await
            .ok();

        Ok(new_auth)
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let token_hash = hash_token(refresh_token);
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT user_id FROM refresh_tokens WHERE token_id = $1")
            .bind(&token_hash)
            .fetch_optional(&self.pool)
            .await?;
        sqlx::query("UPDATE refresh_tokens SET revoked_at = now() WHERE token_id = $1 AND revoked_at IS NULL")
            .bind(&token_hash)
            .execute(&self.pool)
            .await?;

        if let Some((user_id,)) = row {
            self.audit
                .log(Some(user_id), "auth.logout", "user", Some(user_id), "success", None, None, None, None)
                .await
                .ok();
        }
        Ok(())
    }

    pub async fn logout_all(&self, user_id: Uuid) -> Result<(), AuthError> {
        sqlx::query("UPDATE refresh_tokens SET revoked_at = now() WHERE user_id = $1 AND revoked_at IS NULL")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        self.audit
            .log(Some(user_id), "auth.logout_all", "user", Some(user_id), "success", None, None, None, None)
            .await
            .ok();
        Ok(())
    }

    pub async fn change_password(
        &self,
        user_id: Uuid,
        payload: ChangePasswordRequest,
    ) -> Result<(), AuthError> {
        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        if !verify_password(&payload.current_password, &user.password_hash) {
            self.audit
                .log(Some(user_id), "user.change_password", "user", Some(user_id), "failure", None, None, None, None)
                .await
                .ok();
            return Err(AuthError::InvalidCredentials);
        }

        let new_hash = hash_password(&payload.new_password)?;
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = now() WHERE id = $2")
            .bind(&new_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        self.logout_all(user_id).await?;

        if let Err(e) = email::send_password_change_email(&user.email) {
            tracing::warn!(error = %e, "failed to record password-change notification");
        }

        self.audit
            .log(Some(user_id), "user.change_password", "user", Some(user_id), "success", None, None, None, None)
            .await
            .ok();

        Ok(())
    }

    /// Always returns `Ok`, whether or not the email exists, so the response
    /// can't be used to enumerate registered accounts.
    pub async fn request_password_reset(&self, email: &str) -> Result<Option<String>, AuthError> {
        let user: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        let Some((user_id,)) = user else {
            return Ok(None);
        };

        let reset_token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect();
        let token_hash = hash_token(&reset_token);

        sqlx::query(
            "INSERT INTO password_reset_tokens (token_hash, user_id, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(&token_hash)
        .bind(user_id)
        .bind(Utc::now() + Duration::hours(1))
        .execute(&self.pool)
        .await?;

        if let Err(e) = email::send_password_reset_email(email, &reset_token) {
            tracing::warn!(error = %e, "failed to record password-reset notification");
        }

        Ok(Some(reset_token))
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let token_hash = hash_token(token);
        let row: Option<(Uuid, chrono::DateTime<Utc>)> = sqlx::query_as(
            "SELECT user_id, expires_at FROM password_reset_tokens WHERE token_hash = $1",
        )
        .bind(&token_hash)
        .fetch_optional(&self.pool)
        .await?;

        let (user_id, expires_at) = row.ok_or(AuthError::InvalidRefreshToken)?;
        if expires_at < Utc::now() {
            return Err(AuthError::InvalidRefreshToken);
        }

        let new_hash = hash_password(new_password)?;
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = now() WHERE id = $2")
            .bind(&new_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        sqlx::query("DELETE FROM password_reset_tokens WHERE token_hash = $1")
            .bind(&token_hash)
            .execute(&self.pool)
            .await?;

        self.logout_all(user_id).await?;
        Ok(())
    }

    pub async fn list_active_sessions(&self, user_id: Uuid, current_refresh_token: Option<&str>) -> Result<Vec<SessionResponse>, AuthError> {
        let current_hash = current_refresh_token.map(hash_token);
        let rows: Vec<(String, chrono::DateTime<Utc>, chrono::DateTime<Utc>, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT token_id, created_at, expires_at, user_agent, ip_address FROM refresh_tokens
             WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > now()
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(token_id, created_at, expires_at, user_agent, ip_address)| {
                let is_current = current_hash.as_deref() == Some(token_id.as_str());
                SessionResponse {
                    token_id,
                    created_at,
                    expires_at,
                    user_agent,
                    ip_address,
                    is_current,
                }
            })
            .collect())
    }

    pub async fn revoke_session(&self, user_id: Uuid, token_id: &str) -> Result<(), AuthError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now() WHERE token_id = $1 AND user_id = $2 AND revoked_at IS NULL",
        )
        .bind(token_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::PasswordHashError(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

/// A syntactically valid but unmatchable hash, used to keep login timing
/// uniform when the account doesn't exist.
fn dummy_hash() -> String {
    hash_password(&Uuid::new_v4().to_string()).unwrap_or_default()
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
