//! Wire contract shared by the plugin manager and plugin services.
//!
//! Everything that crosses a process boundary lives here: the registration
//! payload, the event envelope carried on the bus, the action reply shape and
//! the naming of bus streams.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Exchange the platform publishes domain events to.
pub const INBOUND_EXCHANGE: &str = "events";

/// Routing key of the inbound domain event channel.
pub const INBOUND_ROUTING_KEY: &str = "events";

/// Exchange the manager republishes plugin-private events to.
pub const OUTBOUND_EXCHANGE: &str = "manager";

/// Stream key for an exchange/routing-key pair.
///
/// The bus is Redis Streams; each `(exchange, routing key)` pair maps to one
/// stream, e.g. `events:events` or `manager:<plugin uuid>`.
pub fn stream_key(exchange: &str, routing_key: &str) -> String {
    format!("{exchange}:{routing_key}")
}

/// Private stream a plugin receives its events on.
pub fn plugin_stream_key(plugin_id: Uuid) -> String {
    stream_key(OUTBOUND_EXCHANGE, &plugin_id.to_string())
}

/// Deterministic plugin identity derived from its name.
///
/// Name-based SHA-1 UUID under the nil namespace, so a plugin keeps its id
/// across restarts and replicas without coordination.
pub fn plugin_id(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::nil(), name.as_bytes())
}

/// Self-declared plugin metadata.
///
/// Sent as the body of `POST /register` and returned by the plugin's own
/// `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

impl PluginMetadata {
    /// Build metadata with the id derived from `name`.
    pub fn new(name: &str, description: &str, url: &str) -> Self {
        Self {
            id: plugin_id(name),
            name: name.to_string(),
            description: description.to_string(),
            url: url.to_string(),
            actions: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }
}

/// Domain event envelope carried on the bus.
///
/// The manager republishes it to plugins byte-for-byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    pub team_id: u64,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(event: &str, team_id: u64, data: serde_json::Value) -> Self {
        Self {
            event: event.to_string(),
            team_id,
            data,
        }
    }
}

/// Body returned by a plugin's `POST /actions/{action}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReply {
    pub message: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

/// Body returned by the manager's `POST /register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationAck {
    pub message: String,
    pub plugin: serde_json::Value,
}
