//! Self-registration with the plugin manager.

use std::time::Duration;

use crate::contract::{PluginMetadata, RegistrationAck};
use crate::error::PluginError;

/// Client for the manager's `POST /register` endpoint.
#[derive(Debug, Clone)]
pub struct RegistrationClient {
    client: reqwest::Client,
    manager_url: String,
}

impl RegistrationClient {
    pub fn new(manager_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            manager_url: manager_url.trim_end_matches('/').to_string(),
        }
    }

    /// Register once. Re-registering an existing plugin is not an error.
    pub async fn register(&self, metadata: &PluginMetadata) -> Result<RegistrationAck, PluginError> {
        let resp = self
            .client
            .post(format!("{}/register", self.manager_url))
            .json(metadata)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PluginError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.json().await?)
    }

    /// Register, retrying transport failures and 5xx replies.
    ///
    /// A 4xx reply means the metadata itself is wrong and is returned
    /// immediately.
    pub async fn register_with_retry(
        &self,
        metadata: &PluginMetadata,
        attempts: u32,
        backoff: Duration,
    ) -> Result<RegistrationAck, PluginError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.register(metadata).await {
                Ok(ack) => {
                    tracing::info!(plugin = %metadata.name, message = %ack.message, "registered with manager");
                    return Ok(ack);
                }
                Err(e @ PluginError::Rejected { status: 400..=499, .. }) => return Err(e),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        plugin = %metadata.name,
                        attempt,
                        error = %e,
                        "registration failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
