use crate::features::kv::KvCache;
use crate::features::rate_limit::models::*;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Fixed-window counters backed by the shared KV cache, so every node behind
/// a load balancer sees the same count once `KvCache` is the Redis backing.
/// Rule definitions stay in Postgres; only the per-window counters are
/// ephemeral.
#[derive(Clone)]
pub struct RateLimitService {
    pool: sqlx::PgPool,
    cache: Arc<dyn KvCache>,
}

impl RateLimitService {
    pub fn new(pool: sqlx::PgPool, cache: Arc<dyn KvCache>) -> Self {
        Self { pool, cache }
    }

    /// Returns `Ok(())` if allowed, `Err(retry_after_secs)` if the window's
    /// budget for `rule_id`+`identifier` is exhausted.
    pub async fn check_rate_limit(&self, rule_id: &str, identifier: &str) -> Result<(), u64> {
        let rule = match self.get_rule(rule_id).await {
            Ok(Some(rule)) if rule.enabled => rule,
            _ => return Ok(()),
        };

        let key = format!("ratelimit:{}:{}", rule_id, identifier);
        let window = Duration::from_secs(rule.window_seconds.max(1) as u64);
        let count = self.cache.incr(&key, window).await;

        if count > rule.max_requests as u64 {
            return Err(rule.window_seconds as u64);
        }
        Ok(())
    }

    pub async fn check_rate_limit_with_endpoint(
        &self,
        rule_id: &str,
        identifier: &str,
        _endpoint: &str,
    ) -> Result<(), u64> {
        self.check_rate_limit(rule_id, identifier).await
    }

    pub async fn list_rules(&self) -> Result<Vec<RateLimitRule>, sqlx::Error> {
        sqlx::query_as::<_, RateLimitRule>("SELECT * FROM rate_limit_rules ORDER BY name")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn get_rule(&self, rule_id: &str) -> Result<Option<RateLimitRule>, sqlx::Error> {
        sqlx::query_as::<_, RateLimitRule>("SELECT * FROM rate_limit_rules WHERE id::text = $1 OR name = $1")
            .bind(rule_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn update_rule(&self, rule_id: &str, update: UpdateRateLimitRule) -> Result<(), sqlx::Error> {
        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("UPDATE rate_limit_rules SET updated_at = now()");

        if let Some(name) = &update.name {
            builder.push(", name = ").push_bind(name.clone());
        }
        if let Some(max_requests) = update.max_requests {
            builder.push(", max_requests = ").push_bind(max_requests);
        }
        if let Some(window_seconds) = update.window_seconds {
            builder.push(", window_seconds = ").push_bind(window_seconds);
        }
        if let Some(enabled) = update.enabled {
            builder.push(", enabled = ").push_bind(enabled);
        }

        builder.push(" WHERE name = ").push_bind(rule_id);
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    pub async fn verify_bypass_token(&self, token: &str) -> Result<bool, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM rate_limit_bypass_tokens WHERE token = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(result.is_some())
    }

    pub async fn list_bypass_tokens(&self) -> Result<Vec<BypassToken>, sqlx::Error> {
        sqlx::query_as::<_, BypassToken>("SELECT * FROM rate_limit_bypass_tokens ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn create_bypass_token(
        &self,
        create: CreateBypassToken,
        created_by: Option<Uuid>,
    ) -> Result<BypassToken, sqlx::Error> {
        let token = format!("{:x}", Uuid::new_v4().as_u128());
        sqlx::query_as::<_, BypassToken>(
            "INSERT INTO rate_limit_bypass_tokens (id, token, description, expires_at, created_by)
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&token)
        .bind(&create.description)
        .bind(create.expires_at)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn delete_bypass_token(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM rate_limit_bypass_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
