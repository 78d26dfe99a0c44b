//! Formloom test utilities.
//!
//! In-memory stand-ins for the registry, the message bus and the retry
//! queue, plus fixtures and assertion helpers for plugin manager tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use formloom_manager::bus::{BusError, Consumer, Delivery, Disposition, Publisher, Queue};
use formloom_manager::models::{
    Plugin, PluginRegistration, PluginSetting, RegisterOutcome, TeamId,
};
use formloom_manager::registry::{RegistryError, RegistryResult, RegistryStore};
use formloom_plugin_sdk::contract::{EventEnvelope, PluginMetadata};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A registration for a plugin named `name` served from `url`.
pub fn registration(name: &str, url: &str) -> PluginRegistration {
    PluginMetadata::new(name, &format!("{name} test plugin"), url)
}

/// Encoded domain event envelope, as producers put it on the bus.
pub fn envelope(event: &str, team_id: u64, data: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&EventEnvelope::new(event, team_id, data)).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// [`RegistryStore`] kept in memory, with switchable failures.
#[derive(Default)]
pub struct MemoryRegistry {
    plugins: Mutex<HashMap<Uuid, Plugin>>,
    settings: Mutex<HashMap<(Uuid, TeamId), bool>>,
    failing_settings: Mutex<HashSet<Uuid>>,
    fail_subscribers: AtomicBool,
    fail_instances: AtomicBool,
    unavailable: AtomicBool,
    instance_updates: Mutex<Vec<(Uuid, i32)>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a registration as if it had been accepted, returning the record.
    pub fn insert(&self, registration: &PluginRegistration) -> Plugin {
        let plugin = Plugin::from_registration(registration);
        lock(&self.plugins).insert(plugin.id, plugin.clone());
        plugin
    }

    pub fn enable(&self, plugin_id: Uuid, team_id: TeamId) {
        lock(&self.settings).insert((plugin_id, team_id), true);
    }

    pub fn disable(&self, plugin_id: Uuid, team_id: TeamId) {
        lock(&self.settings).insert((plugin_id, team_id), false);
    }

    /// Force a plugin's instance count without recording an update.
    pub fn set_live_instances(&self, plugin_id: Uuid, instances: i32) {
        if let Some(plugin) = lock(&self.plugins).get_mut(&plugin_id) {
            plugin.instances = instances;
        }
    }

    /// Make setting lookups for one plugin fail.
    pub fn fail_setting_lookups(&self, plugin_id: Uuid) {
        lock(&self.failing_settings).insert(plugin_id);
    }

    /// Make subscriber lookups fail.
    pub fn fail_subscriber_lookups(&self) {
        self.fail_subscribers.store(true, Ordering::SeqCst);
    }

    /// Make `set_instances` fail until turned off again.
    pub fn fail_instance_updates(&self, fail: bool) {
        self.fail_instances.store(fail, Ordering::SeqCst);
    }

    /// Report the backing store as unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn instances(&self, plugin_id: Uuid) -> Option<i32> {
        lock(&self.plugins).get(&plugin_id).map(|p| p.instances)
    }

    /// Successful `set_instances` calls, oldest first.
    pub fn instance_updates(&self) -> Vec<(Uuid, i32)> {
        lock(&self.instance_updates).clone()
    }

    pub fn setting(&self, plugin_id: Uuid, team_id: TeamId) -> Option<bool> {
        lock(&self.settings).get(&(plugin_id, team_id)).copied()
    }

    fn check_available(&self) -> RegistryResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RegistryError::Backend("registry unavailable".into()));
        }
        Ok(())
    }

    fn require_plugin(&self, plugin_id: Uuid) -> RegistryResult<()> {
        if lock(&self.plugins).contains_key(&plugin_id) {
            Ok(())
        } else {
            Err(RegistryError::PluginNotFound(plugin_id))
        }
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistry {
    async fn register(&self, registration: &PluginRegistration) -> RegistryResult<RegisterOutcome> {
        self.check_available()?;
        let mut plugins = lock(&self.plugins);
        if let Some(existing) = plugins.get(&registration.id) {
            return Ok(RegisterOutcome::AlreadyRegistered(existing.clone()));
        }
        let plugin = Plugin::from_registration(registration);
        plugins.insert(plugin.id, plugin.clone());
        Ok(RegisterOutcome::Created(plugin))
    }

    async fn list_plugins(&self) -> RegistryResult<Vec<Plugin>> {
        self.check_available()?;
        let mut plugins: Vec<Plugin> = lock(&self.plugins).values().cloned().collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(plugins)
    }

    async fn get_plugin(&self, id: Uuid) -> RegistryResult<Option<Plugin>> {
        self.check_available()?;
        Ok(lock(&self.plugins).get(&id).cloned())
    }

    async fn subscribers(&self, event: &str) -> RegistryResult<Vec<Plugin>> {
        self.check_available()?;
        if self.fail_subscribers.load(Ordering::SeqCst) {
            return Err(RegistryError::Backend("subscriber lookup failed".into()));
        }
        let mut plugins: Vec<Plugin> = lock(&self.plugins)
            .values()
            .filter(|p| p.is_live() && p.subscribes_to(event))
            .cloned()
            .collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(plugins)
    }

    async fn find_setting(
        &self,
        plugin_id: Uuid,
        team_id: TeamId,
    ) -> RegistryResult<Option<PluginSetting>> {
        self.check_available()?;
        if lock(&self.failing_settings).contains(&plugin_id) {
            return Err(RegistryError::Backend(format!(
                "setting lookup failed for {plugin_id}"
            )));
        }
        Ok(self.setting(plugin_id, team_id).map(|enabled| PluginSetting {
            plugin_id,
            team_id,
            enabled,
        }))
    }

    async fn get_or_create_setting(
        &self,
        plugin_id: Uuid,
        team_id: TeamId,
    ) -> RegistryResult<PluginSetting> {
        self.check_available()?;
        self.require_plugin(plugin_id)?;
        let enabled = *lock(&self.settings)
            .entry((plugin_id, team_id))
            .or_insert(false);
        Ok(PluginSetting {
            plugin_id,
            team_id,
            enabled,
        })
    }

    async fn set_enabled(
        &self,
        plugin_id: Uuid,
        team_id: TeamId,
        enabled: bool,
    ) -> RegistryResult<PluginSetting> {
        self.check_available()?;
        self.require_plugin(plugin_id)?;
        lock(&self.settings).insert((plugin_id, team_id), enabled);
        Ok(PluginSetting {
            plugin_id,
            team_id,
            enabled,
        })
    }

    async fn set_instances(&self, plugin_id: Uuid, instances: i32) -> RegistryResult<()> {
        self.check_available()?;
        if self.fail_instances.load(Ordering::SeqCst) {
            return Err(RegistryError::Backend("instance update failed".into()));
        }
        match lock(&self.plugins).get_mut(&plugin_id) {
            Some(plugin) => plugin.instances = instances,
            None => return Err(RegistryError::PluginNotFound(plugin_id)),
        }
        lock(&self.instance_updates).push((plugin_id, instances));
        Ok(())
    }

    async fn ping(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// One message handed to a [`RecordingPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// [`Publisher`] that records what it is given.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Published>>,
    failing_keys: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every publish to `routing_key`.
    pub fn fail_routing_key(&self, routing_key: &str) {
        lock(&self.failing_keys).insert(routing_key.to_string());
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Published> {
        lock(&self.published).clone()
    }

    pub fn published_to(&self, routing_key: &str) -> Vec<Published> {
        lock(&self.published)
            .iter()
            .filter(|p| p.routing_key == routing_key)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), BusError> {
        if self.fail_all.load(Ordering::SeqCst) || lock(&self.failing_keys).contains(routing_key) {
            return Err(BusError::Publish {
                stream: format!("{exchange}:{routing_key}"),
                reason: "publisher is failing".into(),
            });
        }
        lock(&self.published).push(Published {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
        });
        Ok(())
    }

    async fn ping(&self) -> bool {
        !self.fail_all.load(Ordering::SeqCst)
    }
}

/// Settlements made by a [`ScriptedConsumer`], shared with the test.
pub type Settlements = Arc<Mutex<Vec<(String, Disposition)>>>;

/// [`Consumer`] that hands out a fixed list of bodies, then idles.
pub struct ScriptedConsumer {
    pending: VecDeque<Delivery>,
    settled: Settlements,
}

impl ScriptedConsumer {
    /// Deliveries get ids `"1"`, `"2"`, ... in order.
    pub fn new<I>(bodies: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let pending = bodies
            .into_iter()
            .enumerate()
            .map(|(i, body)| Delivery {
                id: (i + 1).to_string(),
                body,
            })
            .collect();
        Self {
            pending,
            settled: Arc::default(),
        }
    }

    pub fn settlements(&self) -> Settlements {
        self.settled.clone()
    }
}

/// Snapshot of recorded settlements.
pub fn settled(settlements: &Settlements) -> Vec<(String, Disposition)> {
    lock(settlements).clone()
}

#[async_trait]
impl Consumer for ScriptedConsumer {
    async fn next(&mut self) -> Result<Option<Delivery>, BusError> {
        match self.pending.pop_front() {
            Some(delivery) => Ok(Some(delivery)),
            None => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(None)
            }
        }
    }

    async fn settle(&mut self, delivery: &Delivery, disposition: &Disposition) -> Result<(), BusError> {
        lock(&self.settled).push((delivery.id.clone(), disposition.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// [`Queue`] kept in memory.
#[derive(Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    failing: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Items currently waiting in `queue`, oldest first.
    pub fn items(&self, queue: &str) -> Vec<String> {
        lock(&self.queues)
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("queue unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn push(&self, queue: &str, item: &str) -> anyhow::Result<()> {
        self.check()?;
        lock(&self.queues)
            .entry(queue.to_string())
            .or_default()
            .push_back(item.to_string());
        Ok(())
    }

    async fn pop(&self, queue: &str, wait: Duration) -> anyhow::Result<Option<String>> {
        self.check()?;
        let item = lock(&self.queues).get_mut(queue).and_then(VecDeque::pop_front);
        if item.is_none() {
            tokio::time::sleep(wait.min(Duration::from_millis(10))).await;
        }
        Ok(item)
    }

    async fn len(&self, queue: &str) -> anyhow::Result<u64> {
        self.check()?;
        Ok(lock(&self.queues).get(queue).map_or(0, |q| q.len() as u64))
    }
}

/// Assertion helpers for JSON bodies.
pub mod assert {
    use serde_json::Value;

    /// Assert that a JSON value has a specific key.
    pub fn has_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_some(),
            "Expected JSON to have key '{key}', got: {value}"
        );
    }

    /// Assert that `value["error"]` equals `expected`.
    pub fn error_is(value: &Value, expected: &str) {
        assert_eq!(
            value.get("error").and_then(Value::as_str),
            Some(expected),
            "unexpected error body: {value}"
        );
    }

    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_registry_filters_subscribers() {
        let registry = MemoryRegistry::new();
        let live = registry.insert(&registration("live", "http://live").with_events(["sub"]));
        let down = registry.insert(&registration("down", "http://down").with_events(["sub"]));
        registry.set_live_instances(down.id, 0);

        let subs = registry.subscribers("sub").await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].id, live.id);
        assert!(registry.subscribers("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_registry_creates_disabled_settings() {
        let registry = MemoryRegistry::new();
        let plugin = registry.insert(&registration("demo", "http://demo"));

        assert!(registry.find_setting(plugin.id, 7).await.unwrap().is_none());
        let setting = registry.get_or_create_setting(plugin.id, 7).await.unwrap();
        assert!(!setting.enabled);
        assert_eq!(registry.setting(plugin.id, 7), Some(false));

        let missing = registry.get_or_create_setting(Uuid::new_v4(), 7).await;
        assert!(matches!(missing, Err(RegistryError::PluginNotFound(_))));
    }

    #[tokio::test]
    async fn recording_publisher_fails_selected_keys() {
        let publisher = RecordingPublisher::new();
        publisher.fail_routing_key("bad");

        assert!(publisher.publish("manager", "bad", b"x").await.is_err());
        publisher.publish("manager", "good", b"y").await.unwrap();

        assert_eq!(publisher.published().len(), 1);
        assert_eq!(publisher.published_to("good")[0].body, b"y");
    }

    #[tokio::test]
    async fn memory_queue_is_fifo() {
        let queue = MemoryQueue::new();
        queue.push("q", "a").await.unwrap();
        queue.push("q", "b").await.unwrap();

        assert_eq!(queue.len("q").await.unwrap(), 2);
        assert_eq!(queue.pop("q", Duration::ZERO).await.unwrap().as_deref(), Some("a"));
        assert_eq!(queue.items("q"), vec!["b".to_string()]);
    }

    #[test]
    fn envelope_fixture_decodes() {
        let body = envelope("sub", 7, serde_json::json!({"form": 1}));
        let decoded: EventEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded.event, "sub");
        assert_eq!(decoded.team_id, 7);
    }
}
