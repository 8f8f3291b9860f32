use anyhow::{Context, Result};
use moka::future::Cache;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// JSON key/value storage backed by redis with an in-process front cache.
///
/// With redis connected it is the authoritative copy: writes fail when redis
/// does, and the front cache only shortens reads. Without redis the memory
/// cache is the only copy, so it is built without a TTL.
pub struct CacheService {
    redis: Option<ConnectionManager>,
    memory: Cache<String, String>,
}

impl CacheService {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let redis = match Self::connect(redis_url).await {
            Ok(conn) => {
                tracing::info!("Redis connected successfully");
                Some(conn)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, device lists kept in memory only");
                None
            }
        };
        Ok(Self::with_backend(redis))
    }

    pub fn memory_only() -> Self {
        Self::with_backend(None)
    }

    async fn connect(redis_url: &str) -> Result<ConnectionManager> {
        let client = redis::Client::open(redis_url).context("invalid redis url")?;
        client
            .get_connection_manager()
            .await
            .context("redis connection failed")
    }

    fn with_backend(redis: Option<ConnectionManager>) -> Self {
        let memory = match redis {
            Some(_) => Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(60))
                .build(),
            None => Cache::builder().max_capacity(100_000).build(),
        };
        Self { redis, memory }
    }

    pub fn has_redis(&self) -> bool {
        self.redis.is_some()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = match self.memory.get(key).await {
            Some(raw) => Some(raw),
            None => match self.redis.clone() {
                Some(mut redis) => {
                    let raw: Option<String> = redis
                        .get(key)
                        .await
                        .with_context(|| format!("redis GET {}", key))?;
                    if let Some(raw) = &raw {
                        self.memory.insert(key.to_string(), raw.clone()).await;
                    }
                    raw
                }
                None => None,
            },
        };

        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // unreadable entries are dropped so the next write starts clean
                tracing::warn!(key = key, error = %e, "Discarding undecodable cache entry");
                self.delete(key).await?;
                Ok(None)
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let raw = serde_json::to_string(value)?;

        if let Some(mut redis) = self.redis.clone() {
            if let Err(e) = redis.set_ex::<_, _, ()>(key, &raw, ttl_secs).await {
                self.memory.invalidate(key).await;
                return Err(e).with_context(|| format!("redis SETEX {}", key));
            }
        }
        self.memory.insert(key.to_string(), raw).await;
        tracing::debug!(key = key, ttl_secs, "Stored cache entry");
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.memory.invalidate(key).await;
        if let Some(mut redis) = self.redis.clone() {
            redis
                .del::<_, ()>(key)
                .await
                .with_context(|| format!("redis DEL {}", key))?;
        }
        Ok(())
    }

    pub async fn ping(&self) -> Result<bool> {
        let Some(mut redis) = self.redis.clone() else {
            return Ok(false);
        };
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut redis).await;
        Ok(pong.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_only_stores_and_deletes() {
        let cache = CacheService::memory_only();
        assert!(!cache.has_redis());

        cache.set("k", &vec![1u32, 2, 3], 60).await.unwrap();
        assert_eq!(cache.get::<Vec<u32>>("k").await.unwrap(), Some(vec![1, 2, 3]));

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get::<Vec<u32>>("k").await.unwrap(), None);
        assert!(!cache.ping().await.unwrap());
    }

    #[tokio::test]
    async fn undecodable_entry_reads_as_missing() {
        let cache = CacheService::memory_only();
        cache.set("k", &"not a list", 60).await.unwrap();

        assert_eq!(cache.get::<Vec<u32>>("k").await.unwrap(), None);
        assert_eq!(cache.get::<String>("k").await.unwrap(), None);
    }
}
