use super::KvCache;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Multi-node cache backing: every node talks to the same Redis instance, so
/// RBAC decisions, rate-limit buckets and presence rows are consistent across
/// a horizontally scaled gateway even though each node's session hub keeps
/// its own in-memory rooms.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvCache for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        conn.get(key).await.ok()
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut conn = self.conn.clone();
        let _: redis::RedisResult<()> = conn.set_ex(key, value, ttl.as_secs().max(1)).await;
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.conn.clone();
        let _: redis::RedisResult<()> = conn.del(key).await;
    }

    async fn incr(&self, key: &str, ttl: Duration) -> u64 {
        let mut conn = self.conn.clone();
        let count: u64 = conn.incr(key, 1u64).await.unwrap_or(1);
        if count == 1 {
            let _: redis::RedisResult<()> = conn.expire(key, ttl.as_secs().max(1) as i64).await;
        }
        count
    }
}
