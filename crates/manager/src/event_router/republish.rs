//! Deferred republishes.
//!
//! When a republish to one plugin fails, the router queues a
//! [`RepublishJob`] instead of dropping the event for that plugin. The
//! [`RepublishWorker`] drains the queue, retrying each job until it succeeds
//! or runs out of attempts.

use std::sync::Arc;
use std::time::Duration;

use formloom_plugin_sdk::contract::OUTBOUND_EXCHANGE;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bus::{Publisher, Queue};
use crate::metrics::Metrics;

/// Queue name (Redis key `queue:republish`).
pub const REPUBLISH_QUEUE: &str = "republish";

/// One pending republish to one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepublishJob {
    pub plugin_id: Uuid,
    /// Original envelope, verbatim.
    pub body: String,
    /// Attempts made so far, including the router's own.
    pub attempts: u32,
}

impl RepublishJob {
    /// A job for a republish the router already attempted once.
    pub fn new(plugin_id: Uuid, body: &[u8]) -> Result<Self, std::str::Utf8Error> {
        Ok(Self {
            plugin_id,
            body: std::str::from_utf8(body)?.to_string(),
            attempts: 1,
        })
    }

    /// Serialize for the retry queue.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse an item popped from the retry queue.
    pub fn decode(item: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(item)
    }
}

/// What the worker did with one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Delivered,
    Requeued,
    Dropped,
}

/// Drains the retry queue, republishing each job until it is delivered or
/// runs out of attempts.
pub struct RepublishWorker {
    queue: Arc<dyn Queue>,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<Metrics>,
    max_attempts: u32,
    backoff: Duration,
}

impl RepublishWorker {
    /// Create a worker. `max_attempts` is clamped to at least one.
    pub fn new(
        queue: Arc<dyn Queue>,
        publisher: Arc<dyn Publisher>,
        metrics: Arc<Metrics>,
        max_attempts: u32,
    ) -> Self {
        Self {
            queue,
            publisher,
            metrics,
            max_attempts: max_attempts.max(1),
            backoff: Duration::from_secs(1),
        }
    }

    /// Pause after a failed retry before taking the next job.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Handle one queued item.
    pub async fn process(&self, item: &str) -> RetryOutcome {
        let mut job = match RepublishJob::decode(item) {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "discarding undecodable republish job");
                return RetryOutcome::Dropped;
            }
        };

        let routing_key = job.plugin_id.to_string();
        let err = match self
            .publisher
            .publish(OUTBOUND_EXCHANGE, &routing_key, job.body.as_bytes())
            .await
        {
            Ok(()) => {
                info!(plugin_id = %job.plugin_id, attempts = job.attempts + 1, "deferred republish delivered");
                self.metrics.record_republish("retried", 1);
                return RetryOutcome::Delivered;
            }
            Err(e) => e,
        };

        job.attempts += 1;
        if job.attempts >= self.max_attempts {
            error!(
                plugin_id = %job.plugin_id,
                attempts = job.attempts,
                error = %err,
                "giving up on republish"
            );
            self.metrics.record_republish("dropped", 1);
            return RetryOutcome::Dropped;
        }

        warn!(plugin_id = %job.plugin_id, attempts = job.attempts, error = %err, "republish retry failed");
        let requeued = match job.encode() {
            Ok(item) => self.queue.push(REPUBLISH_QUEUE, &item).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match requeued {
            Ok(()) => RetryOutcome::Requeued,
            Err(e) => {
                error!(plugin_id = %job.plugin_id, error = %e, "failed to requeue republish");
                self.metrics.record_republish("dropped", 1);
                RetryOutcome::Dropped
            }
        }
    }

    /// Drain the queue until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(max_attempts = self.max_attempts, "republish worker started");

        while !shutdown.is_cancelled() {
            let popped = tokio::select! {
                () = shutdown.cancelled() => break,
                popped = self.queue.pop(REPUBLISH_QUEUE, Duration::from_secs(1)) => popped,
            };

            let pause = match popped {
                Ok(Some(item)) => self.process(&item).await != RetryOutcome::Delivered,
                Ok(None) => false,
                Err(e) => {
                    warn!(error = %e, "retry queue unavailable");
                    true
                }
            };

            if pause {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(self.backoff) => {}
                }
            }
        }

        info!("republish worker stopped");
    }
}

impl std::fmt::Debug for RepublishWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepublishWorker")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn job_keeps_body_verbatim() {
        let body = br#"{"event":"sub","team_id":7,"data":{"a":1}}"#;
        let job = RepublishJob::new(Uuid::nil(), body).unwrap();
        assert_eq!(job.attempts, 1);

        let decoded = RepublishJob::decode(&job.encode().unwrap()).unwrap();
        assert_eq!(decoded.body.as_bytes(), body);
    }

    #[test]
    fn job_rejects_non_utf8_body() {
        assert!(RepublishJob::new(Uuid::nil(), &[0xff, 0xfe]).is_err());
    }
}
