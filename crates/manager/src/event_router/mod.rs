//! Event Router: selective fan-out of domain events to plugins.
//!
//! One sequential consumer reads the inbound `events` channel. For each
//! envelope it finds the live plugins subscribed to the event, keeps those
//! enabled for the envelope's tenant, and republishes the original bytes to
//! each one's private channel (`manager` exchange, routing key = plugin id).
//!
//! The inbound message is acknowledged when at least one plugin was
//! targeted and rejected without requeue otherwise. A failed republish to one
//! plugin is deferred to the retry queue and does not affect the others.

mod republish;

pub use republish::{REPUBLISH_QUEUE, RepublishJob, RepublishWorker, RetryOutcome};

use std::sync::Arc;
use std::time::Duration;

use formloom_plugin_sdk::contract::{EventEnvelope, OUTBOUND_EXCHANGE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{Consumer, Delivery, Disposition, Publisher, Queue};
use crate::metrics::Metrics;
use crate::models::setting::team_id_from_wire;
use crate::registry::RegistryStore;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReport {
    /// Event name, when the envelope decoded.
    pub event: Option<String>,
    pub team_id: Option<u64>,
    /// Plugins the event was republished to.
    pub delivered: Vec<Uuid>,
    /// Plugins whose republish failed and was queued for retry.
    pub deferred: Vec<Uuid>,
    /// Plugins whose republish failed and could not be queued.
    pub dropped: Vec<Uuid>,
    /// Subscribed plugins not enabled for the tenant, or whose setting
    /// lookup failed.
    pub skipped: Vec<Uuid>,
    pub disposition: Disposition,
}

impl RouteReport {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            event: None,
            team_id: None,
            delivered: Vec::new(),
            deferred: Vec::new(),
            dropped: Vec::new(),
            skipped: Vec::new(),
            disposition: Disposition::reject(reason),
        }
    }

    /// Number of plugins a republish was attempted for.
    pub fn targeted(&self) -> usize {
        self.delivered.len() + self.deferred.len() + self.dropped.len()
    }

    /// Number of plugins that got the event now or have it queued for retry.
    pub fn received(&self) -> usize {
        self.delivered.len() + self.deferred.len()
    }
}

pub struct EventRouter {
    registry: Arc<dyn RegistryStore>,
    publisher: Arc<dyn Publisher>,
    retry_queue: Option<Arc<dyn Queue>>,
    metrics: Arc<Metrics>,
}

impl EventRouter {
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        publisher: Arc<dyn Publisher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            publisher,
            retry_queue: None,
            metrics,
        }
    }

    /// Queue failed republishes for the [`RepublishWorker`] instead of
    /// dropping them.
    pub fn with_retry_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.retry_queue = Some(queue);
        self
    }

    /// Route one inbound message body.
    pub async fn route(&self, body: &[u8]) -> RouteReport {
        let envelope: EventEnvelope = match serde_json::from_slice(body) {
            Ok(env) => env,
            Err(e) => return RouteReport::rejected(format!("malformed envelope: {e}")),
        };

        let Some(team_id) = team_id_from_wire(envelope.team_id) else {
            let mut report = RouteReport::rejected("team_id out of range");
            report.event = Some(envelope.event);
            report.team_id = Some(envelope.team_id);
            return report;
        };

        let mut report = RouteReport::rejected("no enabled subscribers");
        report.event = Some(envelope.event.clone());
        report.team_id = Some(envelope.team_id);

        let candidates = match self.registry.subscribers(&envelope.event).await {
            Ok(plugins) => plugins,
            Err(e) => {
                warn!(event = %envelope.event, error = %e, "subscriber lookup failed");
                report.disposition = Disposition::reject(format!("subscriber lookup failed: {e}"));
                return report;
            }
        };

        for plugin in candidates {
            match self.registry.find_setting(plugin.id, team_id).await {
                Ok(Some(setting)) if setting.enabled => {}
                Ok(_) => {
                    report.skipped.push(plugin.id);
                    continue;
                }
                Err(e) => {
                    warn!(
                        plugin_id = %plugin.id,
                        team_id,
                        error = %e,
                        "setting lookup failed, skipping plugin"
                    );
                    report.skipped.push(plugin.id);
                    continue;
                }
            }

            let routing_key = plugin.id.to_string();
            match self
                .publisher
                .publish(OUTBOUND_EXCHANGE, &routing_key, body)
                .await
            {
                Ok(()) => report.delivered.push(plugin.id),
                Err(e) => {
                    warn!(plugin_id = %plugin.id, error = %e, "republish failed");
                    if self.defer(plugin.id, body).await {
                        report.deferred.push(plugin.id);
                    } else {
                        report.dropped.push(plugin.id);
                    }
                }
            }
        }

        report.disposition = if report.received() > 0 {
            Disposition::Ack
        } else if !report.dropped.is_empty() {
            Disposition::reject("republish failed")
        } else {
            Disposition::reject("no enabled subscribers")
        };
        report
    }

    async fn defer(&self, plugin_id: Uuid, body: &[u8]) -> bool {
        let Some(queue) = &self.retry_queue else {
            return false;
        };

        let job = match RepublishJob::new(plugin_id, body) {
            Ok(job) => job,
            Err(e) => {
                warn!(plugin_id = %plugin_id, error = %e, "cannot queue republish");
                return false;
            }
        };

        match job.encode() {
            Ok(item) => match queue.push(REPUBLISH_QUEUE, &item).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(plugin_id = %plugin_id, error = %e, "retry queue unavailable");
                    false
                }
            },
            Err(e) => {
                warn!(plugin_id = %plugin_id, error = %e, "cannot encode republish job");
                false
            }
        }
    }

    /// Route and settle one delivery.
    pub async fn process(&self, consumer: &mut dyn Consumer, delivery: Delivery) -> RouteReport {
        let report = self.route(&delivery.body).await;

        debug!(
            id = %delivery.id,
            event = report.event.as_deref().unwrap_or("-"),
            team_id = report.team_id,
            delivered = report.delivered.len(),
            deferred = report.deferred.len(),
            skipped = report.skipped.len(),
            disposition = report.disposition.as_str(),
            "routed event"
        );
        if let Disposition::Reject { reason } = &report.disposition {
            debug!(id = %delivery.id, reason = %reason, "rejecting event");
        }

        self.metrics.record_routed(report.disposition.as_str());
        self.metrics
            .record_republish("delivered", report.delivered.len() as u64);
        self.metrics
            .record_republish("deferred", report.deferred.len() as u64);
        self.metrics
            .record_republish("dropped", report.dropped.len() as u64);

        if let Err(e) = consumer.settle(&delivery, &report.disposition).await {
            warn!(id = %delivery.id, error = %e, "failed to settle event");
        }
        report
    }

    /// Consume until `shutdown` is cancelled. Messages are handled strictly
    /// one at a time.
    pub async fn run(&self, mut consumer: Box<dyn Consumer>, shutdown: CancellationToken) {
        info!("event router started");

        while !shutdown.is_cancelled() {
            let next = tokio::select! {
                () = shutdown.cancelled() => break,
                next = consumer.next() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    self.process(consumer.as_mut(), delivery).await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "event consumer error");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        info!("event router stopped");
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("retry_queue", &self.retry_queue.is_some())
            .finish()
    }
}
