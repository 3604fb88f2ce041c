use crate::features::audit::AuditService;
use crate::features::kv::KvCache;
use crate::features::rbac::models::{Permission, Role, RoleRow, SEEDED_ROLES};
use axum::http::StatusCode;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RbacError {
    #[error("role not found")]
    RoleNotFound,
    #[error("role already exists")]
    RoleExists,
    #[error("role is still assigned to at least one user")]
    RoleInUse,
    #[error("user not found")]
    UserNotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RbacError {
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            Self::RoleNotFound | Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::RoleExists | Self::RoleInUse => StatusCode::CONFLICT,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Role/permission store plus a short-TTL decision cache keyed on
/// `(user_id, roles_version)` so a role edit invalidates every cached
/// decision for that user without an explicit eviction pass: the next
/// lookup misses because the version in the key changed.
#[derive(Clone)]
pub struct RbacService {
    pool: PgPool,
    cache: Arc<dyn KvCache>,
    cache_ttl: Duration,
    audit: AuditService,
}

impl RbacService {
    pub fn new(pool: PgPool, cache: Arc<dyn KvCache>, cache_ttl_secs: u64, audit: AuditService) -> Self {
        Self {
            pool,
            cache,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            audit,
        }
    }

    /// Inserts the fixed role set if absent. Idempotent: safe to call on
    /// every boot. Existing rows (and any custom roles an admin added) are
    /// left untouched.
    pub async fn seed_default_roles(&self) -> Result<(), RbacError> {
        for (name, perms) in SEEDED_ROLES {
            let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM roles WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
            if exists.is_some() {
                continue;
            }
            let perms_json = serde_json::to_value(perms).unwrap_or_default();
            sqlx::query("INSERT INTO roles (id, name, permissions, created_at) VALUES ($1, $2, $3, now())")
                .bind(Uuid::new_v4())
                .bind(name)
                .bind(perms_json)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn create_role(&self, name: &str, permissions: Vec<Permission>) -> Result<Role, RbacError> {
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_some() {
            return Err(RbacError::RoleExists);
        }
        let perms_json = serde_json::to_value(&permissions).unwrap_or_default();
        let row: RoleRow = sqlx::query_as(
            "INSERT INTO roles (id, name, permissions, created_at) VALUES ($1, $2, $3, now())
             RETURNING id, name, permissions, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(perms_json)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_role())
    }

    pub async fn update_role(&self, role_id: Uuid, permissions: Vec<Permission>) -> Result<Role, RbacError> {
        let perms_json = serde_json::to_value(&permissions).unwrap_or_default();
        let row: Option<RoleRow> = sqlx::query_as(
            "UPDATE roles SET permissions = $1 WHERE id = $2
             RETURNING id, name, permissions, created_at",
        )
        .bind(perms_json)
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?;
        let role = row.ok_or(RbacError::RoleNotFound)?.into_role();
        self.bump_all_holders(role_id).await?;
        Ok(role)
    }

    pub async fn delete_role(&self, role_id: Uuid) -> Result<(), RbacError> {
        let holder_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_roles WHERE role_id = $1")
            .bind(role_id)
            .fetch_one(&self.pool)
            .await?;
        if holder_count.0 > 0 {
            return Err(RbacError::RoleInUse);
        }
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RbacError::RoleNotFound);
        }
        Ok(())
    }

    pub async fn get_role(&self, role_id: Uuid) -> Result<Role, RbacError> {
        let row: Option<RoleRow> = sqlx::query_as(
            "SELECT id, name, permissions, created_at FROM roles WHERE id = $1",
        )
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.ok_or(RbacError::RoleNotFound)?.into_role())
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>, RbacError> {
        let rows: Vec<RoleRow> = sqlx::query_as(
            "SELECT id, name, permissions, created_at FROM roles ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RoleRow::into_role).collect())
    }

    pub async fn assign_role(&self, user_id: Uuid, role_name: &str) -> Result<(), RbacError> {
        let role_id: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM roles WHERE name = $1")
            .bind(role_name)
            .fetch_optional(&self.pool)
            .await?;
        let role_id = role_id.ok_or(RbacError::RoleNotFound)?.0;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)
             ON CONFLICT (user_id, role_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(role_id)
        .execute(&mut *tx)
        .await?;
        let updated = sqlx::query("UPDATE users SET roles_version = roles_version + 1 WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(RbacError::UserNotFound);
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn remove_role(&self, user_id: Uuid, role_name: &str) -> Result<(), RbacError> {
        let role_id: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM roles WHERE name = $1")
            .bind(role_name)
            .fetch_optional(&self.pool)
            .await?;
        let role_id = role_id.ok_or(RbacError::RoleNotFound)?.0;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE users SET roles_version = roles_version + 1 WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// The gateway check: true if `user_id` (at `roles_version`) holds
    /// `permission` via any assigned role. Results are cached for up to
    /// `cache_ttl`; the cache key embeds `roles_version` so `assign_role`/
    /// `remove_role` (which bump it) invalidate implicitly.
    pub async fn check(&self, user_id: Uuid, roles_version: i32, permission: Permission) -> Result<bool, RbacError> {
        let cache_key = format!("rbac:{}:{}", user_id, roles_version);
        if let Some(cached) = self.cache.get(&cache_key).await {
            let granted: Vec<String> = serde_json::from_str(&cached).unwrap_or_default();
            return Ok(granted.iter().any(|p| p == permission.as_str()));
        }

        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT r.permissions FROM roles r
             JOIN user_roles ur ON ur.role_id = r.id
             WHERE ur.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut granted: std::collections::HashSet<String> = std::collections::HashSet::new();
        for (perms,) in rows {
            if let Ok(list) = serde_json::from_value::<Vec<String>>(perms) {
                granted.extend(list);
            }
        }

        let serialized = serde_json::to_string(&granted).unwrap_or_else(|_| "[]".to_string());
        self.cache.set(&cache_key, serialized, self.cache_ttl).await;

        Ok(granted.contains(permission.as_str()))
    }

    /// Require `permission`, returning `RbacError::PermissionDenied` otherwise.
    /// A denial is itself a privileged-operation outcome worth recording, so
    /// every rejection writes a `result = "failure"` audit record before
    /// returning the error.
    pub async fn require(&self, user_id: Uuid, roles_version: i32, permission: Permission) -> Result<(), RbacError> {
        if self.check(user_id, roles_version, permission).await? {
            Ok(())
        } else {
            let _ = self
                .audit
                .log(
                    Some(user_id),
                    "permission_check",
                    "permission",
                    None,
                    "failure",
                    None,
                    None,
                    Some(serde_json::json!({"permission": permission.as_str()})),
                    None,
                )
                .await;
            Err(RbacError::PermissionDenied)
        }
    }

    pub async fn list_user_roles(&self, user_id: Uuid) -> Result<Vec<Role>, RbacError> {
        let rows: Vec<RoleRow> = sqlx::query_as(
            "SELECT r.id, r.name, r.permissions, r.created_at FROM roles r
             JOIN user_roles ur ON ur.role_id = r.id
             WHERE ur.user_id = $1
             ORDER BY r.name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RoleRow::into_role).collect())
    }

    /// Bumps `roles_version` for every user holding `role_id`, invalidating
    /// their cached decisions ahead of a role edit or deletion.
    async fn bump_all_holders(&self, role_id: Uuid) -> Result<(), RbacError> {
        sqlx::query(
            "UPDATE users SET roles_version = roles_version + 1
             WHERE id IN (SELECT user_id FROM user_roles WHERE role_id = $1)",
        )
        .bind(role_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
