use crate::redis_client::RedisClient;

pub mod seats;

/// Redis-backed read cache. Only seat listings are cached; the store stays the
/// source of truth and every claim mutation drops the event's entry.
#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    ttl_seconds: i64,
}

impl CacheService {
    pub fn new(redis: RedisClient, ttl_seconds: u64) -> Self {
        let ttl_seconds = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        Self { redis, ttl_seconds }
    }

    pub async fn ping(&self) -> bool {
        self.redis.ping().await
    }
}
