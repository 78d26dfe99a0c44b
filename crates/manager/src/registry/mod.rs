//! Registry Store: plugin identities, declared capabilities and per-tenant
//! enablement.
//!
//! [`RegistryStore`] is the seam every other component depends on;
//! [`PgRegistry`] is the production implementation.

mod pg;

pub use pg::PgRegistry;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Plugin, PluginRegistration, PluginSetting, RegisterOutcome, TeamId};

/// Registry failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("plugin {0} not found")]
    PluginNotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("registry unavailable: {0}")]
    Backend(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Insert a plugin with its actions and events atomically, or return the
    /// existing record unchanged when the id is already registered.
    async fn register(&self, registration: &PluginRegistration) -> RegistryResult<RegisterOutcome>;

    /// All plugins, ordered by name.
    async fn list_plugins(&self) -> RegistryResult<Vec<Plugin>>;

    /// One plugin with its actions and events, if registered.
    async fn get_plugin(&self, id: Uuid) -> RegistryResult<Option<Plugin>>;

    /// Live plugins (`instances > 0`) subscribed to `event`.
    async fn subscribers(&self, event: &str) -> RegistryResult<Vec<Plugin>>;

    /// Look up a setting without creating it.
    async fn find_setting(
        &self,
        plugin_id: Uuid,
        team_id: TeamId,
    ) -> RegistryResult<Option<PluginSetting>>;

    /// Existing setting, or a new disabled one.
    async fn get_or_create_setting(
        &self,
        plugin_id: Uuid,
        team_id: TeamId,
    ) -> RegistryResult<PluginSetting>;

    /// Enable or disable a plugin for a team, creating the setting if needed.
    async fn set_enabled(
        &self,
        plugin_id: Uuid,
        team_id: TeamId,
        enabled: bool,
    ) -> RegistryResult<PluginSetting>;

    /// Record the live replica count observed by the poller.
    async fn set_instances(&self, plugin_id: Uuid, instances: i32) -> RegistryResult<()>;

    /// Whether the backing store is reachable.
    async fn ping(&self) -> bool;
}
