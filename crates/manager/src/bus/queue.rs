//! Durable work queue used for deferred republishes.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient};

/// FIFO queue of opaque string items.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Append an item to the tail of `queue`.
    async fn push(&self, queue: &str, item: &str) -> Result<()>;

    /// Pop the oldest item, waiting up to `wait` for one to arrive.
    async fn pop(&self, queue: &str, wait: Duration) -> Result<Option<String>>;

    /// Number of items waiting in `queue`.
    async fn len(&self, queue: &str) -> Result<u64>;
}

/// Redis list-backed queue (`RPUSH` / `BLPOP`).
pub struct RedisQueue {
    redis: RedisClient,
}

impl RedisQueue {
    /// Create a new Redis queue.
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    /// Redis key for a queue name.
    fn queue_key(queue: &str) -> String {
        format!("queue:{queue}")
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn push(&self, queue: &str, item: &str) -> Result<()> {
        let mut conn = self
            .redis
            .get_multiplexed_async_connection()
            .await
            .context("failed to get Redis connection")?;

        conn.rpush::<_, _, ()>(Self::queue_key(queue), item)
            .await
            .with_context(|| format!("failed to push to queue {queue}"))?;

        Ok(())
    }

    async fn pop(&self, queue: &str, wait: Duration) -> Result<Option<String>> {
        let key = Self::queue_key(queue);
        let mut conn = self
            .redis
            .get_multiplexed_async_connection()
            .await
            .context("failed to get Redis connection")?;

        // BLPOP replies (key, value) or nil on timeout
        let popped: Option<(String, String)> = conn
            .blpop(&key, wait.as_secs_f64())
            .await
            .with_context(|| format!("failed to pop from queue {queue}"))?;

        Ok(popped.map(|(_, value)| value))
    }

    async fn len(&self, queue: &str) -> Result<u64> {
        let mut conn = self
            .redis
            .get_multiplexed_async_connection()
            .await
            .context("failed to get Redis connection")?;

        let len: u64 = conn
            .llen(Self::queue_key(queue))
            .await
            .context("failed to get queue length")?;
        Ok(len)
    }
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed() {
        assert_eq!(RedisQueue::queue_key("republish"), "queue:republish");
    }
}
