#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Liveness poller tests against a mock plugin.

use std::sync::Arc;
use std::time::Duration;

use formloom_manager::metrics::Metrics;
use formloom_manager::models::Plugin;
use formloom_manager::poller::{LivenessPoller, PollerSettings};
use formloom_test_utils::{MemoryRegistry, registration};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn poller(registry: Arc<MemoryRegistry>) -> LivenessPoller {
    LivenessPoller::new(
        registry,
        Arc::new(Metrics::new()),
        PollerSettings {
            interval: Duration::from_millis(20),
            timeout: Duration::from_millis(200),
            failure_threshold: 3,
        },
        CancellationToken::new(),
    )
}

async fn health_status(server: &MockServer, status: u16) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

async fn wait_for_instances(registry: &MemoryRegistry, plugin: &Plugin, expected: i32) {
    for _ in 0..200 {
        if registry.instances(plugin.id) == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "plugin {} never reached {expected} instances (now {:?})",
        plugin.id,
        registry.instances(plugin.id)
    );
}

#[tokio::test]
async fn failing_plugin_is_marked_down_then_restored() {
    let server = MockServer::start().await;
    health_status(&server, 500).await;

    let registry = Arc::new(MemoryRegistry::new());
    let plugin = registry.insert(&registration("flaky", &server.uri()));
    let poller = poller(registry.clone());
    assert!(poller.watch(&plugin));

    wait_for_instances(&registry, &plugin, 0).await;

    health_status(&server, 200).await;
    wait_for_instances(&registry, &plugin, 1).await;

    poller.shutdown().await;
    assert_eq!(
        registry.instance_updates(),
        vec![(plugin.id, 0), (plugin.id, 1)]
    );
}

#[tokio::test]
async fn healthy_plugin_is_left_alone() {
    let server = MockServer::start().await;
    health_status(&server, 200).await;

    let registry = Arc::new(MemoryRegistry::new());
    let plugin = registry.insert(&registration("steady", &server.uri()));
    let poller = poller(registry.clone());
    poller.watch(&plugin);

    tokio::time::sleep(Duration::from_millis(150)).await;
    poller.shutdown().await;

    assert!(registry.instance_updates().is_empty());
    assert_eq!(registry.instances(plugin.id), Some(1));
}

#[tokio::test]
async fn failed_instance_update_is_retried() {
    let server = MockServer::start().await;
    health_status(&server, 503).await;

    let registry = Arc::new(MemoryRegistry::new());
    let plugin = registry.insert(&registration("flaky", &server.uri()));
    registry.fail_instance_updates(true);
    let poller = poller(registry.clone());
    poller.watch(&plugin);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(registry.instances(plugin.id), Some(1));

    registry.fail_instance_updates(false);
    wait_for_instances(&registry, &plugin, 0).await;
    poller.shutdown().await;
}

#[tokio::test]
async fn each_plugin_is_polled_once() {
    let registry = Arc::new(MemoryRegistry::new());
    let plugin = registry.insert(&registration("demo", "http://127.0.0.1:1"));
    registry.insert(&registration("other", "http://127.0.0.1:1"));
    let poller = poller(registry.clone());

    assert!(poller.watch(&plugin));
    assert!(!poller.watch(&plugin));
    assert_eq!(poller.watch_all().await.unwrap(), 1);
    assert_eq!(poller.watched(), 2);

    poller.shutdown().await;
    assert_eq!(poller.watched(), 0);
    assert!(!poller.watch(&plugin));
}
