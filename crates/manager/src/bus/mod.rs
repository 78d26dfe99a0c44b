//! Message bus seams.
//!
//! The router consumes domain events through a [`Consumer`] and republishes
//! them through a [`Publisher`]. Both are backed by Redis Streams in
//! production; an `(exchange, routing key)` pair maps to one stream key (see
//! [`formloom_plugin_sdk::contract::stream_key`]).

pub mod queue;
pub mod streams;

pub use self::queue::{Queue, RedisQueue};
pub use self::streams::{RedisConsumer, RedisPublisher};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connection(String),

    #[error("publish to {stream} failed: {reason}")]
    Publish { stream: String, reason: String },

    #[error("consume failed: {0}")]
    Consume(String),
}

impl From<redis::RedisError> for BusError {
    fn from(e: redis::RedisError) -> Self {
        BusError::Connection(e.to_string())
    }
}

/// Publishes opaque message bodies.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), BusError>;

    /// Whether the bus is reachable.
    async fn ping(&self) -> bool;
}

/// One inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Bus-assigned id used to settle the message.
    pub id: String,
    pub body: Vec<u8>,
}

/// How an inbound message is settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Reject without requeue.
    Reject { reason: String },
}

impl Disposition {
    pub fn reject(reason: impl Into<String>) -> Self {
        Disposition::Reject {
            reason: reason.into(),
        }
    }

    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Reject { .. } => "reject",
        }
    }
}

/// Pulls inbound messages one at a time.
#[async_trait]
pub trait Consumer: Send {
    /// Wait for the next message. `Ok(None)` means nothing arrived within the
    /// consumer's poll window; callers loop.
    async fn next(&mut self) -> Result<Option<Delivery>, BusError>;

    async fn settle(&mut self, delivery: &Delivery, disposition: &Disposition) -> Result<(), BusError>;
}
