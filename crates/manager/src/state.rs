//! Application state shared across all handlers.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bus::Publisher;
use crate::config::Config;
use crate::dispatch::ActionDispatcher;
use crate::metrics::Metrics;
use crate::poller::{LivenessPoller, PollerSettings};
use crate::registry::RegistryStore;

/// Timeouts and liveness policy the HTTP-facing services are built with.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeSettings {
    pub proxy_timeout: Duration,
    pub poller: PollerSettings,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            proxy_timeout: Duration::from_secs(30),
            poller: PollerSettings::default(),
        }
    }
}

impl From<&Config> for RuntimeSettings {
    fn from(config: &Config) -> Self {
        Self {
            proxy_timeout: config.proxy_timeout,
            poller: PollerSettings {
                interval: config.poll_interval,
                timeout: config.health_timeout,
                failure_threshold: config.liveness_failure_threshold,
            },
        }
    }
}

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Arc<dyn RegistryStore>,

    /// Bus handle, used here for health reporting only.
    publisher: Arc<dyn Publisher>,

    dispatcher: ActionDispatcher,

    poller: LivenessPoller,

    metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire the HTTP-facing services around a registry and a bus.
    ///
    /// Pollers spawned through [`AppState::poller`] stop when `shutdown` is
    /// cancelled.
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        publisher: Arc<dyn Publisher>,
        metrics: Arc<Metrics>,
        settings: RuntimeSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let dispatcher =
            ActionDispatcher::new(registry.clone(), metrics.clone(), settings.proxy_timeout);
        let poller = LivenessPoller::new(
            registry.clone(),
            metrics.clone(),
            settings.poller,
            shutdown,
        );

        Self {
            inner: Arc::new(AppStateInner {
                registry,
                publisher,
                dispatcher,
                poller,
                metrics,
            }),
        }
    }

    /// Get the plugin registry.
    pub fn registry(&self) -> &Arc<dyn RegistryStore> {
        &self.inner.registry
    }

    /// Get the bus publisher.
    pub fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.inner.publisher
    }

    /// Get the action dispatcher.
    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.inner.dispatcher
    }

    /// Get the liveness poller.
    pub fn poller(&self) -> &LivenessPoller {
        &self.inner.poller
    }

    /// Get the metrics registry.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Check if the registry database is reachable.
    pub async fn registry_healthy(&self) -> bool {
        self.inner.registry.ping().await
    }

    /// Check if the message bus is reachable.
    pub async fn bus_healthy(&self) -> bool {
        self.inner.publisher.ping().await
    }
}
