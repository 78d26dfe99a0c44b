//! Action Dispatcher: tenant-gated reverse proxy to plugin backends.
//!
//! Every call is checked against the tenant's enablement before any network
//! traffic. A disabled or never-configured plugin short-circuits with
//! [`DispatchError::NotEnabled`].

pub mod proxy;

pub use proxy::{ProxyRequest, ProxyResponse};

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::models::{Plugin, TeamId};
use crate::registry::{RegistryError, RegistryStore};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("plugin {plugin_id} is not enabled for team {team_id}")]
    NotEnabled { plugin_id: Uuid, team_id: TeamId },

    #[error("plugin {0} not found")]
    PluginNotFound(Uuid),

    #[error("plugin {plugin_id} has no action {action:?}")]
    ActionNotFound { plugin_id: Uuid, action: String },

    #[error("invalid plugin target: {0}")]
    InvalidTarget(String),

    #[error("plugin timed out: {0}")]
    Timeout(String),

    #[error("plugin unreachable: {0}")]
    Upstream(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub struct ActionDispatcher {
    registry: Arc<dyn RegistryStore>,
    client: reqwest::Client,
    metrics: Arc<Metrics>,
}

impl ActionDispatcher {
    pub fn new(registry: Arc<dyn RegistryStore>, metrics: Arc<Metrics>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();

        Self {
            registry,
            client,
            metrics,
        }
    }

    /// Proxy to `<plugin url>/actions/<action>`.
    pub async fn dispatch_action(
        &self,
        plugin_id: Uuid,
        team_id: TeamId,
        action: &str,
        req: ProxyRequest,
    ) -> Result<ProxyResponse, DispatchError> {
        let plugin = self.authorize(plugin_id, team_id).await?;

        if !plugin.declares_action(action) {
            return Err(DispatchError::ActionNotFound {
                plugin_id,
                action: action.to_string(),
            });
        }

        self.forward("action", &plugin, &["actions", action], req).await
    }

    /// Proxy to `<plugin url>/configure`.
    pub async fn dispatch_configure(
        &self,
        plugin_id: Uuid,
        team_id: TeamId,
        req: ProxyRequest,
    ) -> Result<ProxyResponse, DispatchError> {
        let plugin = self.authorize(plugin_id, team_id).await?;
        self.forward("configure", &plugin, &["configure"], req).await
    }

    /// Enablement first, then plugin lookup.
    async fn authorize(&self, plugin_id: Uuid, team_id: TeamId) -> Result<Plugin, DispatchError> {
        let enabled = self
            .registry
            .find_setting(plugin_id, team_id)
            .await?
            .is_some_and(|s| s.enabled);
        if !enabled {
            return Err(DispatchError::NotEnabled { plugin_id, team_id });
        }

        self.registry
            .get_plugin(plugin_id)
            .await?
            .ok_or(DispatchError::PluginNotFound(plugin_id))
    }

    async fn forward(
        &self,
        kind: &str,
        plugin: &Plugin,
        segments: &[&str],
        req: ProxyRequest,
    ) -> Result<ProxyResponse, DispatchError> {
        let url = proxy::target_url(&plugin.url, segments, req.query.as_deref())
            .map_err(DispatchError::InvalidTarget)?;
        let headers = proxy::outbound_headers(&req, &url);

        debug!(plugin_id = %plugin.id, method = %req.method, url = %url, "proxying to plugin");
        let start = Instant::now();

        let sent = self
            .client
            .request(req.method, url.clone())
            .headers(headers)
            .body(req.body)
            .send()
            .await;

        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => {
                warn!(plugin_id = %plugin.id, url = %url, error = %e, "plugin call failed");
                return Err(self.upstream_error(kind, &e, start));
            }
        };

        let status = resp.status();
        let headers = proxy::inbound_headers(resp.headers().clone());
        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(plugin_id = %plugin.id, error = %e, "failed to read plugin response");
                return Err(self.upstream_error(kind, &e, start));
            }
        };

        self.metrics
            .record_proxy(kind, "ok", start.elapsed().as_secs_f64());
        debug!(
            plugin_id = %plugin.id,
            status = status.as_u16(),
            body = %String::from_utf8_lossy(&body),
            "plugin replied"
        );

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }

    fn upstream_error(&self, kind: &str, e: &reqwest::Error, start: Instant) -> DispatchError {
        let elapsed = start.elapsed().as_secs_f64();
        if e.is_timeout() {
            self.metrics.record_proxy(kind, "timeout", elapsed);
            DispatchError::Timeout(e.to_string())
        } else {
            self.metrics.record_proxy(kind, "unreachable", elapsed);
            DispatchError::Upstream(e.to_string())
        }
    }
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher").finish()
    }
}
