//! Liveness Poller: one background probe loop per registered plugin.
//!
//! Each loop GETs `<plugin url>/health` on a fixed interval. After
//! `failure_threshold` consecutive failures the plugin's instance count drops
//! to zero, which removes it from event routing; the first successful probe
//! afterwards restores it to one. Loops only stop on shutdown.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::proxy::target_url;
use crate::metrics::Metrics;
use crate::models::Plugin;
use crate::registry::{RegistryResult, RegistryStore};

/// Probe cadence and decay policy.
#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub failure_threshold: u32,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

/// Change in a plugin's liveness after a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Down,
    Up,
}

/// Consecutive-failure tracker for one plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Liveness {
    consecutive_failures: u32,
    marked_down: bool,
}

impl Liveness {
    pub fn new(marked_down: bool) -> Self {
        Self {
            consecutive_failures: 0,
            marked_down,
        }
    }

    pub fn is_down(&self) -> bool {
        self.marked_down
    }

    /// Record a probe result.
    pub fn record(&mut self, healthy: bool, threshold: u32) -> Option<Transition> {
        if healthy {
            self.consecutive_failures = 0;
            if self.marked_down {
                self.marked_down = false;
                return Some(Transition::Up);
            }
            return None;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if !self.marked_down && self.consecutive_failures >= threshold.max(1) {
            self.marked_down = true;
            return Some(Transition::Down);
        }
        None
    }
}

struct PollerInner {
    registry: Arc<dyn RegistryStore>,
    client: reqwest::Client,
    settings: PollerSettings,
    metrics: Arc<Metrics>,
    active: DashMap<Uuid, ()>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// Owns every probe loop.
#[derive(Clone)]
pub struct LivenessPoller {
    inner: Arc<PollerInner>,
}

impl LivenessPoller {
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        metrics: Arc<Metrics>,
        settings: PollerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();

        Self {
            inner: Arc::new(PollerInner {
                registry,
                client,
                settings,
                metrics,
                active: DashMap::new(),
                tracker: TaskTracker::new(),
                shutdown,
            }),
        }
    }

    /// Start polling `plugin`. Returns `false` if it is already polled or the
    /// poller is shutting down.
    pub fn watch(&self, plugin: &Plugin) -> bool {
        if self.inner.shutdown.is_cancelled() || self.inner.active.insert(plugin.id, ()).is_some() {
            return false;
        }

        let inner = self.inner.clone();
        let plugin_id = plugin.id;
        let url = plugin.url.clone();
        let initially_down = !plugin.is_live();
        self.inner
            .tracker
            .spawn(poll_loop(inner, plugin_id, url, initially_down));

        debug!(plugin_id = %plugin_id, "liveness polling started");
        true
    }

    /// Start polling every registered plugin.
    pub async fn watch_all(&self) -> RegistryResult<usize> {
        let plugins = self.inner.registry.list_plugins().await?;
        let started = plugins.iter().filter(|p| self.watch(p)).count();
        info!(plugins = started, "liveness pollers started");
        Ok(started)
    }

    pub fn is_watching(&self, plugin_id: Uuid) -> bool {
        self.inner.active.contains_key(&plugin_id)
    }

    pub fn watched(&self) -> usize {
        self.inner.active.len()
    }

    /// Stop every loop and wait for them to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("liveness pollers stopped");
    }
}

impl std::fmt::Debug for LivenessPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessPoller")
            .field("watched", &self.watched())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

async fn poll_loop(inner: Arc<PollerInner>, plugin_id: Uuid, url: String, initially_down: bool) {
    let health_url = match target_url(&url, &["health"], None) {
        Ok(u) => u,
        Err(e) => {
            warn!(plugin_id = %plugin_id, error = %e, "cannot poll plugin");
            inner.active.remove(&plugin_id);
            return;
        }
    };

    let mut state = Liveness::new(initially_down);
    if initially_down {
        inner.metrics.plugin_down();
    }

    let mut ticker = tokio::time::interval(inner.settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let healthy = probe(&inner, plugin_id, &health_url).await;

        let previous = state;
        let Some(transition) = state.record(healthy, inner.settings.failure_threshold) else {
            continue;
        };

        let instances = match transition {
            Transition::Down => 0,
            Transition::Up => 1,
        };
        match inner.registry.set_instances(plugin_id, instances).await {
            Ok(()) => match transition {
                Transition::Down => {
                    warn!(plugin_id = %plugin_id, "plugin marked down");
                    inner.metrics.plugin_down();
                }
                Transition::Up => {
                    info!(plugin_id = %plugin_id, "plugin is back up");
                    inner.metrics.plugin_up();
                }
            },
            Err(e) => {
                // Retry the transition on the next probe.
                warn!(plugin_id = %plugin_id, error = %e, "failed to update instance count");
                state = previous;
            }
        }
    }

    if state.is_down() {
        inner.metrics.plugin_up();
    }
    inner.active.remove(&plugin_id);
}

async fn probe(inner: &PollerInner, plugin_id: Uuid, url: &url::Url) -> bool {
    match inner.client.get(url.clone()).send().await {
        Ok(resp) if resp.status().is_success() => true,
        Ok(resp) => {
            inner.metrics.record_probe_failure();
            warn!(plugin_id = %plugin_id, status = resp.status().as_u16(), "health probe failed");
            false
        }
        Err(e) => {
            inner.metrics.record_probe_failure();
            warn!(plugin_id = %plugin_id, error = %e, "health probe failed");
            false
        }
    }
}
