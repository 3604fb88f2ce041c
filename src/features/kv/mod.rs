//! Short-TTL store for sessions, rate counters, RBAC decisions and ephemeral
//! CRDT snapshots. Two backings are provided behind the same trait: an
//! in-process `moka` cache (single node, used by default and in tests) and
//! a Redis-backed cache for multi-node deployments.

mod moka_cache;
mod redis_cache;

pub use moka_cache::MokaCache;
pub use redis_cache::RedisCache;

use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    async fn delete(&self, key: &str);
    /// Atomically increment a counter, creating it at 1 with the given TTL if absent.
    /// Used for rate-limit token buckets and login-attempt counters.
    async fn incr(&self, key: &str, ttl: Duration) -> u64;
}
