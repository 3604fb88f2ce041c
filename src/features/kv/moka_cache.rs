use super::KvCache;
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

/// Per-entry TTL policy: each insert carries its own expiry rather than one
/// cache-wide duration, since a single cache instance holds sessions, RBAC
/// decisions and rate counters each with a different lifetime.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _current_time: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Single-node cache. `moka::future::Cache` gives us single-flight-coalesced
/// inserts under concurrent writers to the same key; counters are guarded by
/// a small per-instance mutex since moka itself has no atomic-increment
/// primitive.
#[derive(Clone)]
pub struct MokaCache {
    store: Cache<String, Entry>,
    counters: Arc<Mutex<std::collections::HashMap<String, (u64, Instant, Duration)>>>,
}

impl MokaCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            store: Cache::builder().max_capacity(max_capacity).expire_after(PerEntryTtl).build(),
            counters: Arc::new(Mutex::new(std::collections::HashMap::new())),
        }
    }
}

impl Default for MokaCache {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl KvCache for MokaCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.store.get(key).await.map(|e| e.value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.store.insert(key.to_string(), Entry { value, ttl }).await;
    }

    async fn delete(&self, key: &str) {
        self.store.invalidate(key).await;
        self.counters.lock().await.remove(key);
    }

    async fn incr(&self, key: &str, ttl: Duration) -> u64 {
        let mut counters = self.counters.lock().await;
        let now = Instant::now();
        let entry = counters.entry(key.to_string()).or_insert((0, now, ttl));
        if now.duration_since(entry.1) > entry.2 {
            entry.0 = 0;
            entry.1 = now;
        }
        entry.0 += 1;
        entry.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = MokaCache::new(100);
        cache.set("k", "v".into(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn incr_resets_after_window_elapses() {
        let cache = MokaCache::new(100);
        assert_eq!(cache.incr("counter", Duration::from_millis(10)).await, 1);
        assert_eq!(cache.incr("counter", Duration::from_millis(10)).await, 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.incr("counter", Duration::from_millis(10)).await, 1);
    }
}
