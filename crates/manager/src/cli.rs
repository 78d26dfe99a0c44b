//! Operator commands that work against the registry without starting the
//! server.

use anyhow::Result;
use uuid::Uuid;

use crate::models::TeamId;
use crate::registry::{RegistryError, RegistryStore};

/// Print every registered plugin.
pub async fn cmd_plugin_list(registry: &dyn RegistryStore) -> Result<()> {
    let plugins = registry.list_plugins().await?;
    if plugins.is_empty() {
        println!("No plugins registered.");
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<10} {:<8} {:<8} URL",
        "ID", "NAME", "STATUS", "ACTIONS", "EVENTS"
    );
    println!("{}", "-".repeat(100));

    for plugin in &plugins {
        let status = if plugin.is_live() { "up" } else { "down" };
        println!(
            "{:<38} {:<20} {:<10} {:<8} {:<8} {}",
            plugin.id,
            plugin.name,
            status,
            plugin.actions.len(),
            plugin.events.len(),
            plugin.url
        );
    }

    Ok(())
}

/// Enable or disable a plugin for one tenant.
pub async fn cmd_set_enabled(
    registry: &dyn RegistryStore,
    plugin_id: Uuid,
    team_id: TeamId,
    enabled: bool,
) -> Result<()> {
    match registry.set_enabled(plugin_id, team_id, enabled).await {
        Ok(setting) => {
            let verb = if setting.enabled { "enabled" } else { "disabled" };
            println!("Plugin {plugin_id} {verb} for team {team_id}.");
            Ok(())
        }
        Err(RegistryError::PluginNotFound(id)) => anyhow::bail!("plugin {id} is not registered"),
        Err(e) => Err(e.into()),
    }
}
