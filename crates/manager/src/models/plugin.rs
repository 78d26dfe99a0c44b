//! Registered plugin services.

use formloom_plugin_sdk::contract::PluginMetadata;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Registration payload accepted on `POST /register`.
pub type PluginRegistration = PluginMetadata;

/// A registered plugin with its declared capabilities loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Plugin {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub url: String,
    /// Live replica count derived from health probes. Zero excludes the
    /// plugin from event routing.
    pub instances: i32,
    pub actions: Vec<String>,
    pub events: Vec<String>,
}

impl Plugin {
    /// Whether the plugin declared `action` at registration.
    pub fn declares_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }

    pub fn subscribes_to(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }

    pub fn is_live(&self) -> bool {
        self.instances > 0
    }

    /// The record a fresh registration creates.
    pub fn from_registration(reg: &PluginRegistration) -> Self {
        Self {
            id: reg.id,
            name: reg.name.clone(),
            description: reg.description.clone(),
            url: reg.url.clone(),
            instances: 1,
            actions: reg.actions.clone(),
            events: reg.events.clone(),
        }
    }
}

/// Result of a registration call. Replaying a registration is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created(Plugin),
    AlreadyRegistered(Plugin),
}

impl RegisterOutcome {
    pub fn plugin(&self) -> &Plugin {
        match self {
            RegisterOutcome::Created(p) | RegisterOutcome::AlreadyRegistered(p) => p,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, RegisterOutcome::Created(_))
    }
}

/// Why a registration was refused before reaching the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("plugin id must not be nil")]
    NilId,

    #[error("plugin name must not be empty")]
    EmptyName,

    #[error("invalid plugin url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{kind} names must not be empty")]
    EmptyCapability { kind: &'static str },

    #[error("{kind} name {name:?} contains control characters")]
    InvalidCapability { kind: &'static str, name: String },
}

/// Validate and normalize a registration before it reaches the store.
///
/// Trims names, collapses duplicate action/event names (first occurrence
/// wins) and strips a trailing slash from the URL.
pub fn validate_registration(
    mut reg: PluginRegistration,
) -> Result<PluginRegistration, RegistrationError> {
    if reg.id.is_nil() {
        return Err(RegistrationError::NilId);
    }

    reg.name = reg.name.trim().to_string();
    if reg.name.is_empty() {
        return Err(RegistrationError::EmptyName);
    }

    let invalid_url = |reason: String| RegistrationError::InvalidUrl {
        url: reg.url.clone(),
        reason,
    };
    let url = url::Url::parse(reg.url.trim()).map_err(|e| invalid_url(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid_url("must be http(s) with a host".to_string()));
    }
    reg.url = url.as_str().trim_end_matches('/').to_string();

    reg.actions = normalize_names(reg.actions, "action")?;
    reg.events = normalize_names(reg.events, "event")?;

    Ok(reg)
}

fn normalize_names(
    names: Vec<String>,
    kind: &'static str,
) -> Result<Vec<String>, RegistrationError> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(RegistrationError::EmptyCapability { kind });
        }
        if name.chars().any(char::is_control) {
            return Err(RegistrationError::InvalidCapability { kind, name });
        }
        if !out.contains(&name) {
            out.push(name);
        }
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn registration() -> PluginRegistration {
        PluginMetadata::new("demo", "Demo", "http://demo/")
            .with_actions(["ping", " ping", "export"])
            .with_events(["sub"])
    }

    #[test]
    fn normalizes_url_and_duplicate_names() {
        let reg = validate_registration(registration()).unwrap();
        assert_eq!(reg.url, "http://demo");
        assert_eq!(reg.actions, vec!["ping", "export"]);
        assert_eq!(reg.events, vec!["sub"]);
    }

    #[test]
    fn rejects_nil_id() {
        let mut reg = registration();
        reg.id = Uuid::nil();
        assert_eq!(validate_registration(reg), Err(RegistrationError::NilId));
    }

    #[test]
    fn rejects_blank_name() {
        let mut reg = registration();
        reg.name = "  ".to_string();
        assert_eq!(validate_registration(reg), Err(RegistrationError::EmptyName));
    }

    #[test]
    fn rejects_non_http_url() {
        let mut reg = registration();
        reg.url = "ftp://demo".to_string();
        assert!(matches!(
            validate_registration(reg),
            Err(RegistrationError::InvalidUrl { .. })
        ));

        let mut reg = registration();
        reg.url = "demo".to_string();
        assert!(matches!(
            validate_registration(reg),
            Err(RegistrationError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn rejects_empty_event_name() {
        let reg = registration().with_events([""]);
        assert_eq!(
            validate_registration(reg),
            Err(RegistrationError::EmptyCapability { kind: "event" })
        );
    }

    #[test]
    fn rejects_control_characters_in_names() {
        let reg = registration().with_actions(["ex\0port"]);
        assert!(matches!(
            validate_registration(reg),
            Err(RegistrationError::InvalidCapability { kind: "action", .. })
        ));
    }

    #[test]
    fn fresh_record_has_one_instance() {
        let plugin = Plugin::from_registration(&validate_registration(registration()).unwrap());
        assert_eq!(plugin.instances, 1);
        assert!(plugin.declares_action("ping"));
        assert!(plugin.subscribes_to("sub"));
        assert!(!plugin.subscribes_to("other"));
    }
}
