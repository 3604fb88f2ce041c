use sha2::{Digest, Sha256};
use sqlx::PgPool;
use chrono::Utc;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum MfaError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("MFA not found for user")]
    MfaNotFound,

    #[error("MFA already enabled")]
    AlreadyEnabled,

    #[error("MFA not enabled")]
    NotEnabled,

    #[error("Invalid TOTP code")]
    InvalidCode,

    #[error("TOTP code already used")]
    CodeReplayed,

    #[error("Invalid backup code")]
    InvalidBackupCode,

    #[error("No backup codes remaining")]
    NoBackupCodes,

    #[error("TOTP generation error: {0}")]
    TotpError(String),
}

impl MfaError {
    pub fn to_status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            MfaError::MfaNotFound => StatusCode::NOT_FOUND,
            MfaError::AlreadyEnabled => StatusCode::CONFLICT,
            MfaError::NotEnabled => StatusCode::BAD_REQUEST,
            MfaError::InvalidCode | MfaError::InvalidBackupCode | MfaError::CodeReplayed => StatusCode::UNAUTHORIZED,
            MfaError::NoBackupCodes => StatusCode::GONE,
            MfaError::DatabaseError(_) | MfaError::TotpError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for MfaError {
    fn into_response(self) -> axum::response::Response {
        let status = self.to_status_code();
        if status == axum::http::StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "mfa error");
        }
        (
            status,
            axum::Json(serde_json::json!({"ok": false, "error": {"code": "AuthInvalid", "message": self.to_string()}})),
        )
            .into_response()
    }
}

#[derive(Clone)]
pub struct MfaService {
    pool: PgPool,
    issuer: String,
    code_step: u64,
    code_skew: u8,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MfaSetupResponse {
    pub secret: String,
    pub qr_code_url: String,
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MfaStatus {
    pub is_enabled: bool,
    pub is_verified: bool,
    pub backup_codes_remaining: i32,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
}

struct MfaRow {
    mfa_secret: Option<String>,
    mfa_enabled: bool,
    mfa_verified: bool,
    backup_code_hashes: Option<serde_json::Value>,
    mfa_last_used_at: Option<chrono::DateTime<chrono::Utc>>,
    mfa_last_used_code: Option<String>,
}

impl MfaService {
    pub fn new(pool: PgPool, issuer: String, code_step: u64, code_skew: u8) -> Self {
        Self {
            pool,
            issuer,
            code_step,
            code_skew,
        }
    }

    async fn fetch_row(&self, user_id: Uuid) -> Result<MfaRow, MfaError> {
        let row = sqlx::query_as::<
            _,
            (
                Option<String>,
                bool,
                bool,
                Option<serde_json::Value>,
                Option<chrono::DateTime<chrono::Utc>>,
                Option<String>,
            ),
        >(
            "SELECT mfa_secret, mfa_enabled, mfa_verified, backup_code_hashes, mfa_last_used_at, mfa_last_used_code FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(MfaError::MfaNotFound)?;

        Ok(MfaRow {
            mfa_secret: row.0,
            mfa_enabled: row.1,
            mfa_verified: row.2,
            backup_code_hashes: row.3,
            mfa_last_used_at: row.4,
            mfa_last_used_code: row.5,
        })
    }

    /// Generate a new TOTP secret and backup codes for user. Not yet
    /// enabled: `verify_setup` must confirm the user actually captured the
    /// secret before it gates login.
    pub async fn setup_mfa(&self, user_id: Uuid, email: &str) -> Result<MfaSetupResponse, MfaError> {
        let row = self.fetch_row(user_id).await?;
        if row.mfa_enabled {
            return Err(MfaError::AlreadyEnabled);
        }

        let secret = Secret::generate_secret();
        let secret_base32 = secret.to_encoded().to_string();

        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            self.code_skew,
            self.code_step,
            secret.to_bytes().map_err(|e| MfaError::TotpError(e.to_string()))?,
            Some(self.issuer.clone()),
            email.to_string(),
        )
        .map_err(|e| MfaError::TotpError(e.to_string()))?;

        let qr_code_url = totp.get_url();

        let backup_codes: Vec<String> = (0..8).map(|_| generate_backup_code()).collect();
        let hashed_codes: Vec<String> = backup_codes.iter().map(|code| hash_backup_code(code)).collect();

        sqlx::query(
            "UPDATE users SET mfa_secret = $1, backup_code_hashes = $2, mfa_enabled = false, mfa_verified = false WHERE id = $3",
        )
        .bind(&secret_base32)
        .bind(serde_json::to_value(&hashed_codes).unwrap())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(MfaSetupResponse {
            secret: secret_base32,
            qr_code_url,
            backup_codes,
        })
    }

    pub async fn verify_setup(&self, user_id: Uuid, code: &str) -> Result<(), MfaError> {
        let row = self.fetch_row(user_id).await?;
        if row.mfa_enabled {
            return Err(MfaError::AlreadyEnabled);
        }
        let secret_key = row.mfa_secret.ok_or(MfaError::NotEnabled)?;

        if !self.verify_totp(&secret_key, code)? {
            return Err(MfaError::InvalidCode);
        }

        sqlx::query("UPDATE users SET mfa_enabled = true, mfa_verified = true WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Verify a TOTP code during the login MFA challenge.
    pub async fn verify_code(&self, user_id: Uuid, code: &str) -> Result<(), MfaError> {
        let row = self.fetch_row(user_id).await?;
        if !row.mfa_enabled || !row.mfa_verified {
            return Err(MfaError::NotEnabled);
        }
        let secret_key = row.mfa_secret.ok_or(MfaError::NotEnabled)?;

        if row.mfa_last_used_code.as_deref() == Some(code) {
            return Err(MfaError::CodeReplayed);
        }

        if !self.verify_totp(&secret_key, code)? {
            return Err(MfaError::InvalidCode);
        }

        sqlx::query("UPDATE users SET mfa_last_used_at = $1, mfa_last_used_code = $2 WHERE id = $3")
            .bind(Utc::now())
            .bind(code)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Verify and consume a single-use backup code during the login MFA challenge.
    pub async fn verify_backup_code(&self, user_id: Uuid, code: &str) -> Result<(), MfaError> {
        let row = self.fetch_row(user_id).await?;
        if !row.mfa_enabled {
            return Err(MfaError::NotEnabled);
        }

        let backup_codes: Vec<String> =
            serde_json::from_value(row.backup_code_hashes.unwrap_or_else(|| serde_json::json!([])))
                .unwrap_or_default();

        if backup_codes.is_empty() {
            return Err(MfaError::NoBackupCodes);
        }

        let code_hash = hash_backup_code(code);
        let original_len = backup_codes.len();
        let new_codes: Vec<String> = backup_codes.into_iter().filter(|stored| stored != &code_hash).collect();

        if new_codes.len() == original_len {
            return Err(MfaError::InvalidBackupCode);
        }

        sqlx::query("UPDATE users SET backup_code_hashes = $1, mfa_last_used_at = $2 WHERE id = $3")
            .bind(serde_json::to_value(&new_codes).unwrap())
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn disable_mfa(&self, user_id: Uuid) -> Result<(), MfaError> {
        let row = self.fetch_row(user_id).await?;
        if !row.mfa_enabled {
            return Err(MfaError::NotEnabled);
        }

        sqlx::query(
            "UPDATE users SET mfa_secret = NULL, backup_code_hashes = NULL, mfa_enabled = false, mfa_verified = false, mfa_last_used_at = NULL, mfa_last_used_code = NULL WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn regenerate_backup_codes(&self, user_id: Uuid) -> Result<Vec<String>, MfaError> {
        let row = self.fetch_row(user_id).await?;
        if !row.mfa_enabled {
            return Err(MfaError::NotEnabled);
        }

        let backup_codes: Vec<String> = (0..8).map(|_| generate_backup_code()).collect();
        let hashed_codes: Vec<String> = backup_codes.iter().map(|code| hash_backup_code(code)).collect();

        sqlx::query("UPDATE users SET backup_code_hashes = $1 WHERE id = $2")
            .bind(serde_json::to_value(&hashed_codes).unwrap())
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(backup_codes)
    }

    pub async fn get_status(&self, user_id: Uuid) -> Result<MfaStatus, MfaError> {
        let row = self.fetch_row(user_id).await?;
        let codes: Vec<String> =
            serde_json::from_value(row.backup_code_hashes.unwrap_or_else(|| serde_json::json!([]))).unwrap_or_default();
        Ok(MfaStatus {
            is_enabled: row.mfa_enabled,
            is_verified: row.mfa_verified,
            backup_codes_remaining: codes.len() as i32,
            last_used_at: row.mfa_last_used_at,
        })
    }

    pub async fn is_mfa_required(&self, user_id: Uuid) -> Result<bool, MfaError> {
        let row = self.fetch_row(user_id).await?;
        Ok(row.mfa_enabled && row.mfa_verified)
    }

    fn verify_totp(&self, secret_base32: &str, code: &str) -> Result<bool, MfaError> {
        let secret = Secret::Encoded(secret_base32.to_string());
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            self.code_skew,
            self.code_step,
            secret.to_bytes().map_err(|e| MfaError::TotpError(e.to_string()))?,
            Some(self.issuer.clone()),
            String::new(),
        )
        .map_err(|e| MfaError::TotpError(e.to_string()))?;

        Ok(totp.check_current(code).unwrap_or(false))
    }
}

fn generate_backup_code() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let code: String = (0..8)
        .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
        .collect();
    code.to_uppercase()
}

fn hash_backup_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.to_uppercase().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_code_generation() {
        let code = generate_backup_code();
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_alphanumeric()));
    }

    #[test]
    fn test_backup_code_hashing() {
        let code = "ABCD1234";
        let hash1 = hash_backup_code(code);
        let hash2 = hash_backup_code(code);
        assert_eq!(hash1, hash2);

        let hash3 = hash_backup_code("abcd1234");
        assert_eq!(hash1, hash3);
    }

    #[test]
    fn totp_accepts_code_within_skew() {
        let secret = Secret::generate_secret();
        let secret_base32 = secret.to_encoded().to_string();
        let service = MfaService::new(PgPoolDummy::pool(), "OmicsControlPlane".to_string(), 30, 1);
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret.to_bytes().unwrap(),
            Some("OmicsControlPlane".to_string()),
            "user@example.com".to_string(),
        )
        .unwrap();
        let code = totp.generate_current().unwrap();
        assert!(service.verify_totp(&secret_base32, &code).unwrap());
    }

    // Minimal stand-in so the skew test above can build an `MfaService`
    // without a live database; only `verify_totp`, which never touches the
    // pool, is exercised.
    struct PgPoolDummy;
    impl PgPoolDummy {
        fn pool() -> PgPool {
            PgPool::connect_lazy("postgres://localhost/test").expect("lazy pool")
        }
    }
}
