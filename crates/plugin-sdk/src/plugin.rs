//! The capability set a plugin implements.
//!
//! A plugin describes itself ([`PluginInfo`]), exposes synchronous actions
//! through an [`ActionRegistry`] and subscribes to bus events through
//! [`EventHandlers`]. Both maps are explicit: looking up an undeclared name is
//! an error value, never a panic.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::contract::{EventEnvelope, PluginMetadata};
use crate::error::PluginError;

/// Static description of a plugin service.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub name: String,
    pub description: String,
    /// Base URL the manager reaches this plugin on.
    pub url: String,
}

impl PluginInfo {
    pub fn new(name: &str, description: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            url: url.to_string(),
        }
    }
}

/// Handler for one synchronous action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(&self, input: Value) -> Result<Value, PluginError>;
}

#[async_trait]
impl<F, Fut> ActionHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, PluginError>> + Send,
{
    async fn call(&self, input: Value) -> Result<Value, PluginError> {
        (self)(input).await
    }
}

/// Handler for one subscribed event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: EventEnvelope) -> Result<(), PluginError>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), PluginError>> + Send,
{
    async fn handle(&self, envelope: EventEnvelope) -> Result<(), PluginError> {
        (self)(envelope).await
    }
}

/// Action name -> handler.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: BTreeMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action. A later registration under the same name replaces the
    /// earlier one.
    pub fn register<H: ActionHandler + 'static>(mut self, name: &str, handler: H) -> Self {
        self.handlers.insert(name.to_string(), Arc::new(handler));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Declared action names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub async fn invoke(&self, name: &str, input: Value) -> Result<Value, PluginError> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| PluginError::UnknownAction(name.to_string()))?;
        handler.call(input).await
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

/// Event name -> handler.
#[derive(Clone, Default)]
pub struct EventHandlers {
    handlers: BTreeMap<String, Arc<dyn EventHandler>>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<H: EventHandler + 'static>(mut self, event: &str, handler: H) -> Self {
        self.handlers.insert(event.to_string(), Arc::new(handler));
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub async fn dispatch(&self, envelope: EventEnvelope) -> Result<(), PluginError> {
        let handler = self
            .handlers
            .get(&envelope.event)
            .ok_or_else(|| PluginError::UnknownEvent(envelope.event.clone()))?;
        handler.handle(envelope).await
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("events", &self.names())
            .finish()
    }
}

/// A plugin service.
///
/// Only [`info`](Plugin::info), [`actions`](Plugin::actions),
/// [`events`](Plugin::events) and [`configure`](Plugin::configure) are
/// required; lifecycle hooks default to no-ops and execution defaults to the
/// registries.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    fn info(&self) -> &PluginInfo;

    fn actions(&self) -> &ActionRegistry;

    fn events(&self) -> &EventHandlers;

    /// Metadata sent on registration and returned by `GET /health`.
    fn metadata(&self) -> PluginMetadata {
        let info = self.info();
        PluginMetadata::new(&info.name, &info.description, &info.url)
            .with_actions(self.actions().names())
            .with_events(self.events().names())
    }

    /// Called once before the plugin starts serving.
    async fn initialize(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Apply an opaque per-tenant configuration document.
    async fn configure(&self, config: Value) -> Result<(), PluginError>;

    async fn execute(&self, action: &str, input: Value) -> Result<Value, PluginError> {
        self.actions().invoke(action, input).await
    }

    async fn handle_event(&self, envelope: EventEnvelope) -> Result<(), PluginError> {
        self.events().dispatch(envelope).await
    }

    /// Called once after the plugin stops serving.
    async fn close(&self) -> Result<(), PluginError> {
        Ok(())
    }
}
