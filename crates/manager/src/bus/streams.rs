//! Redis Streams bus adapter.
//!
//! Each stream entry carries the message in its `body` field with
//! `content_type = application/json`. Rejected inbound entries are copied to
//! the dead-letter stream with a `reason` field. Every settled entry is
//! acknowledged, even when the dead-letter copy fails, so nothing is
//! redelivered.

use async_trait::async_trait;
use formloom_plugin_sdk::contract::stream_key;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};

use super::{BusError, Consumer, Delivery, Disposition, Publisher};

/// Dead-letter stream for rejected inbound events.
pub const DEAD_LETTER_STREAM: &str = "events:dead";

const CONTENT_TYPE: &str = "application/json";

/// Publishes entries with `XADD`.
#[derive(Clone)]
pub struct RedisPublisher {
    redis: redis::Client,
}

impl RedisPublisher {
    /// Create a new publisher over a Redis client.
    pub fn new(redis: redis::Client) -> Self {
        Self { redis }
    }
}

impl std::fmt::Debug for RedisPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPublisher").finish()
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), BusError> {
        let stream = stream_key(exchange, routing_key);
        let publish_error = |e: redis::RedisError| BusError::Publish {
            stream: stream.clone(),
            reason: e.to_string(),
        };

        let mut conn = self
            .redis
            .get_multiplexed_async_connection()
            .await
            .map_err(publish_error)?;

        let id = redis::cmd("XADD")
            .arg(&stream)
            .arg("*")
            .arg("content_type")
            .arg(CONTENT_TYPE)
            .arg("body")
            .arg(body)
            .query_async::<String>(&mut conn)
            .await
            .map_err(publish_error)?;

        tracing::debug!(stream = %stream, id = %id, "published");
        Ok(())
    }

    async fn ping(&self) -> bool {
        let Ok(mut conn) = self.redis.get_multiplexed_async_connection().await else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

/// Reads one stream through a consumer group.
pub struct RedisConsumer {
    conn: MultiplexedConnection,
    stream: String,
    group: String,
    consumer: String,
    block_ms: usize,
    dead_letter: String,
    /// Re-read entries delivered to this consumer but never acknowledged
    /// (e.g. after a crash) before taking new ones.
    draining_pending: bool,
}

impl RedisConsumer {
    /// Connect and make sure the consumer group exists.
    pub async fn connect(
        redis: &redis::Client,
        exchange: &str,
        routing_key: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Self, BusError> {
        let stream = stream_key(exchange, routing_key);
        let mut conn = redis.get_multiplexed_async_connection().await?;

        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(&stream, group, "0").await;
        match created {
            Ok(()) => tracing::info!(stream = %stream, group, "created consumer group"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            conn,
            stream,
            group: group.to_string(),
            consumer: consumer.to_string(),
            block_ms: 2000,
            dead_letter: DEAD_LETTER_STREAM.to_string(),
            draining_pending: true,
        })
    }

    /// Copy rejected entries to `stream` instead of [`DEAD_LETTER_STREAM`].
    pub fn with_dead_letter_stream(mut self, stream: impl Into<String>) -> Self {
        self.dead_letter = stream.into();
        self
    }

    async fn copy_to_dead_letter(&mut self, delivery: &Delivery, reason: &str) -> Result<(), BusError> {
        redis::cmd("XADD")
            .arg(&self.dead_letter)
            .arg("*")
            .arg("source")
            .arg(&self.stream)
            .arg("source_id")
            .arg(&delivery.id)
            .arg("reason")
            .arg(reason)
            .arg("body")
            .arg(delivery.body.as_slice())
            .query_async::<String>(&mut self.conn)
            .await
            .map(|_| ())
            .map_err(|e| BusError::Publish {
                stream: self.dead_letter.clone(),
                reason: e.to_string(),
            })
    }

    async fn read(&mut self) -> Result<Option<StreamReadReply>, BusError> {
        let id = if self.draining_pending { "0" } else { ">" };
        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1);
        if !self.draining_pending {
            opts = opts.block(self.block_ms);
        }

        self.conn
            .xread_options(&[&self.stream], &[id], &opts)
            .await
            .map_err(|e| BusError::Consume(e.to_string()))
    }
}

impl std::fmt::Debug for RedisConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConsumer")
            .field("stream", &self.stream)
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .field("dead_letter", &self.dead_letter)
            .finish()
    }
}

#[async_trait]
impl Consumer for RedisConsumer {
    async fn next(&mut self) -> Result<Option<Delivery>, BusError> {
        let reply = self.read().await?;

        let entry = reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next());

        let Some(entry) = entry else {
            if self.draining_pending {
                self.draining_pending = false;
            }
            return Ok(None);
        };

        // Entries without a body cannot be routed; hand them on with an empty
        // body so the router rejects them as malformed.
        let body = entry.get::<Vec<u8>>("body").unwrap_or_default();
        Ok(Some(Delivery { id: entry.id, body }))
    }

    async fn settle(&mut self, delivery: &Delivery, disposition: &Disposition) -> Result<(), BusError> {
        // The entry is acknowledged even when the dead-letter copy fails, so
        // a rejected entry is never read again.
        let dead_lettered = match disposition {
            Disposition::Reject { reason } => self.copy_to_dead_letter(delivery, reason).await,
            Disposition::Ack => Ok(()),
        };

        let _: i64 = self
            .conn
            .xack(&self.stream, &self.group, &[&delivery.id])
            .await
            .map_err(|e| BusError::Consume(e.to_string()))?;
        dead_lettered
    }
}
