//! Echo plugin
//!
//! Smallest useful Formloom plugin: answers `ping`, echoes its input back and
//! logs every `response-submission` event it receives.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use formloom_plugin_sdk::prelude::*;
use tokio::sync::RwLock;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const NAME: &str = "echo";
const SUBMISSION_EVENT: &str = "response-submission";

struct EchoPlugin {
    info: PluginInfo,
    actions: ActionRegistry,
    events: EventHandlers,
    config: RwLock<Value>,
    submissions: Arc<AtomicU64>,
}

impl EchoPlugin {
    fn new(url: &str) -> Self {
        let submissions = Arc::new(AtomicU64::new(0));

        let actions = ActionRegistry::new()
            .register("ping", |_input: Value| async { Ok::<_, PluginError>(json!("pong")) })
            .register("echo", |input: Value| async move { Ok::<_, PluginError>(input) });

        let counter = submissions.clone();
        let events = EventHandlers::new().on(SUBMISSION_EVENT, move |envelope: EventEnvelope| {
            let counter = counter.clone();
            async move {
                let seen = counter.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::info!(
                    team_id = envelope.team_id,
                    seen,
                    data = %envelope.data,
                    "received submission"
                );
                Ok::<_, PluginError>(())
            }
        });

        Self {
            info: PluginInfo::new(NAME, "Answers ping and echoes action input", url),
            actions,
            events,
            config: RwLock::new(Value::Null),
            submissions,
        }
    }
}

#[async_trait]
impl Plugin for EchoPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    fn events(&self) -> &EventHandlers {
        &self.events
    }

    async fn configure(&self, config: Value) -> Result<(), PluginError> {
        if !(config.is_object() || config.is_null()) {
            return Err(PluginError::InvalidInput(
                "configuration must be a JSON object".to_string(),
            ));
        }
        *self.config.write().await = config;
        tracing::info!("configuration updated");
        Ok(())
    }

    async fn close(&self) -> Result<(), PluginError> {
        tracing::info!(
            submissions = self.submissions.load(Ordering::Relaxed),
            "echo plugin closing"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), PluginError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = PluginConfig::from_env()?;
    let plugin = Arc::new(EchoPlugin::new(&config.public_url));
    serve(plugin, config).await
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
