use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub roles_version: i32,
    pub is_active: bool,
    pub mfa_enabled: bool,
    pub mfa_verified: bool,
    #[serde(skip_serializing)]
    pub mfa_secret: Option<String>,
    #[serde(skip_serializing)]
    pub backup_code_hashes: Option<serde_json::Value>,
    pub mfa_last_used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub mfa_last_used_code: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub last_user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct RefreshToken {
    pub token_id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// At least three of: lowercase, uppercase, digit, symbol. Length is
/// enforced separately by the `length` validator on each field.
fn validate_password_strength(password: &str) -> Result<(), validator::ValidationError> {
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| !c.is_ascii_alphanumeric());

    let classes = [has_lower, has_upper, has_digit, has_symbol].iter().filter(|x| **x).count();
    if classes < 3 {
        return Err(validator::ValidationError::new("password_too_weak"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterUser {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 12), custom = "validate_password_strength")]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginUser {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    #[validate(length(min = 12), custom = "validate_password_strength")]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    pub token: String,
    #[validate(length(min = 12), custom = "validate_password_strength")]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct MfaChallengeRequest {
    pub temp_token: String,
    pub code: String,
    #[serde(default)]
    pub is_backup_code: bool,
}

#[derive(Debug, Serialize, Default)]
pub struct AuthResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub mfa_required: bool,
    pub temp_token: Option<String>,
    #[serde(skip)]
    pub remember_me: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub is_current: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_password_with_fewer_than_three_classes() {
        assert!(validate_password_strength("lowercaseonly").is_err());
        assert!(validate_password_strength("alllowercase123").is_err());
    }

    #[test]
    fn accepts_password_mixing_three_classes() {
        assert!(validate_password_strength("Lowercase123").is_ok());
        assert!(validate_password_strength("has-symbols-9").is_ok());
    }
}
