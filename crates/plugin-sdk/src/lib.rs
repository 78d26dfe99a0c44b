//! Formloom Plugin SDK
//!
//! Wire contract, capability trait and hosting for plugin services. A plugin
//! implements [`Plugin`](plugin::Plugin), then hands itself to
//! [`serve`](server::serve), which exposes the HTTP surface, registers with
//! the plugin manager and consumes the plugin's private event stream.

pub mod config;
pub mod contract;
pub mod error;
pub mod plugin;
pub mod registration;
pub mod server;
pub mod subscriber;

pub mod prelude {
    pub use crate::config::PluginConfig;
    pub use crate::contract::{ActionReply, EventEnvelope, PluginMetadata, plugin_id};
    pub use crate::error::PluginError;
    pub use crate::plugin::{ActionRegistry, EventHandlers, Plugin, PluginInfo};
    pub use crate::server::serve;
    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
}
