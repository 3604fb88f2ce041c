use crate::features::audit::models::{AuditPage, AuditQuery, AuditRecord};
use axum::http::StatusCode;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, QueryBuilder};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AuditError {
    pub fn to_status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Append-only log of every privileged operation. Writes never fail
/// the action they describe from the caller's point of view: the caller logs
/// after committing its own transaction, so an audit-insert failure surfaces
/// as a 500 rather than silently rolling back a request that already
/// succeeded.
#[derive(Clone)]
pub struct AuditService {
    pool: PgPool,
}

impl AuditService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn log(
        &self,
        user_id: Option<Uuid>,
        action: &str,
        target_type: &str,
        target_id: Option<Uuid>,
        result: &str,
        before_state: Option<JsonValue>,
        after_state: Option<JsonValue>,
        metadata: Option<JsonValue>,
        ip_address: Option<String>,
    ) -> Result<AuditRecord, AuditError> {
        let record = sqlx::query_as::<_, AuditRecord>(
            "INSERT INTO audit_records
                (id, user_id, action, target_type, target_id, result, before_state, after_state, metadata, ip_address, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(action)
        .bind(target_type)
        .bind(target_id)
        .bind(result)
        .bind(before_state)
        .bind(after_state)
        .bind(metadata)
        .bind(ip_address)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            user_id = ?user_id,
            action,
            target_type,
            target_id = ?target_id,
            result,
            "audit record written"
        );

        Ok(record)
    }

    /// Paginated query by `(user, resource, time-range, result)` ordered
    /// newest-first with a `(created_at, id)` composite cursor, so pages
    /// stay stable even as new records keep arriving at the tail.
    pub async fn query(&self, q: AuditQuery) -> Result<AuditPage, AuditError> {
        let limit = q.limit.unwrap_or(50).clamp(1, 500);

        let mut builder = QueryBuilder::new("SELECT * FROM audit_records WHERE 1 = 1");

        if let Some(user_id) = q.user_id {
            builder.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(target_type) = &q.target_type {
            builder.push(" AND target_type = ").push_bind(target_type.clone());
        }
        if let Some(action) = &q.action {
            builder.push(" AND action = ").push_bind(action.clone());
        }
        if let Some(result) = &q.result {
            builder.push(" AND result = ").push_bind(result.clone());
        }
        if let Some(since) = q.since {
            builder.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(until) = q.until {
            builder.push(" AND created_at <= ").push_bind(until);
        }
        if let (Some(cursor_created_at), Some(cursor_id)) = (q.cursor_created_at, q.cursor_id) {
            builder
                .push(" AND (created_at, id) < (")
                .push_bind(cursor_created_at)
                .push(", ")
                .push_bind(cursor_id)
                .push(")");
        }

        builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit);

        let records: Vec<AuditRecord> = builder.build_query_as().fetch_all(&self.pool).await?;

        let (next_created_at, next_id) = match records.last() {
            Some(last) if records.len() as i64 == limit => (Some(last.created_at), Some(last.id)),
            _ => (None, None),
        };

        Ok(AuditPage {
            records,
            next_cursor_created_at: next_created_at,
            next_cursor_id: next_id,
        })
    }
}
