use crate::features::audit::AuditService;
use crate::features::auth::models::User;
use crate::features::auth::service::AuthError;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct UserService {
    pool: PgPool,
    audit: AuditService,
}

impl UserService {
    pub fn new(pool: PgPool, audit: AuditService) -> Self {
        Self { pool, audit }
    }

    pub async fn find_all(&self) -> Result<Vec<User>, AuthError> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<User, AuthError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    pub async fn set_active(&self, id: Uuid, active: bool, performing_user_id: Option<Uuid>) -> Result<User, AuthError> {
        let before = self.find_by_id(id).await?;
        let user: User = sqlx::query_as(
            "UPDATE users SET is_active = $1, updated_at = now() WHERE id = $2 RETURNING *",
        )
        .bind(active)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::UserNotFound)?;

        if !active {
            sqlx::query("UPDATE refresh_tokens SET revoked_at = now() WHERE user_id = $1 AND revoked_at IS NULL")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }

        self.audit
            .log(
                performing_user_id,
                if active { "user.activate" } else { "user.deactivate" },
                "user",
                Some(id),
                "success",
                serde_json::to_value(&before).ok(),
                serde_json::to_value(&user).ok(),
                None,
                None,
            )
            .await
            .ok();

        Ok(user)
    }

    /// GDPR erasure: scrubs PII in place rather than deleting the row, so
    /// foreign keys from audit records, workspace memberships and job
    /// ownership stay intact.
    pub async fn anonymize(&self, id: Uuid, performing_user_id: Option<Uuid>) -> Result<(), AuthError> {
        let scrubbed_email = format!("deleted-{}@anonymized.invalid", id);
        sqlx::query(
            "UPDATE users SET email = $1, password_hash = '', mfa_secret = NULL, backup_code_hashes = NULL,
                mfa_enabled = false, mfa_verified = false, last_login_ip = NULL, last_user_agent = NULL,
                is_active = false, updated_at = now()
             WHERE id = $2",
        )
        .bind(&scrubbed_email)
        .bind(id)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE refresh_tokens SET revoked_at = now() WHERE user_id = $1 AND revoked_at IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.audit
            .log(performing_user_id, "user.anonymize", "user", Some(id), "success", None, None, None, None)
            .await
            .ok();

        Ok(())
    }
}
