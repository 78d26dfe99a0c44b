//! Registry records.

pub mod plugin;
pub mod setting;

pub use plugin::{Plugin, PluginRegistration, RegisterOutcome};
pub use setting::{PluginSetting, TeamId};
