//! Prometheus metrics collection.

use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// HTTP request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: String,
    pub path: String,
    pub status: u16,
}

/// Inbound event settlement labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RouteLabels {
    pub disposition: String,
}

/// Per-target republish outcome labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RepublishLabels {
    pub outcome: String,
}

/// Proxied call labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProxyLabels {
    pub kind: String,
    pub outcome: String,
}

/// Application metrics.
pub struct Metrics {
    registry: Registry,

    pub http_requests: Family<HttpLabels, Counter>,

    pub http_duration_seconds: Family<HttpLabels, Histogram>,

    /// Inbound events by disposition (ack/reject).
    pub routed_events: Family<RouteLabels, Counter>,

    /// Republishes by outcome (delivered/deferred/dropped/retried).
    pub republishes: Family<RepublishLabels, Counter>,

    pub proxy_calls: Family<ProxyLabels, Counter>,

    pub proxy_duration_seconds: Histogram,

    pub probe_failures: Counter,

    /// Plugins currently marked as having no live instances.
    pub plugins_down: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_requests = Family::<HttpLabels, Counter>::default();
        registry.register(
            "http_requests_total",
            "Total HTTP requests",
            http_requests.clone(),
        );

        let http_duration_seconds = Family::<HttpLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 12))
        });
        registry.register(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_duration_seconds.clone(),
        );

        let routed_events = Family::<RouteLabels, Counter>::default();
        registry.register(
            "routed_events_total",
            "Inbound domain events by disposition",
            routed_events.clone(),
        );

        let republishes = Family::<RepublishLabels, Counter>::default();
        registry.register(
            "republishes_total",
            "Per-plugin republishes by outcome",
            republishes.clone(),
        );

        let proxy_calls = Family::<ProxyLabels, Counter>::default();
        registry.register(
            "proxy_calls_total",
            "Proxied plugin calls by kind and outcome",
            proxy_calls.clone(),
        );

        let proxy_duration_seconds = Histogram::new(exponential_buckets(0.005, 2.0, 14));
        registry.register(
            "proxy_duration_seconds",
            "Proxied plugin call duration in seconds",
            proxy_duration_seconds.clone(),
        );

        let probe_failures = Counter::default();
        registry.register(
            "health_probe_failures_total",
            "Failed plugin health probes",
            probe_failures.clone(),
        );

        let plugins_down = Gauge::default();
        registry.register(
            "plugins_down",
            "Plugins marked as having no live instances",
            plugins_down.clone(),
        );

        Self {
            registry,
            http_requests,
            http_duration_seconds,
            routed_events,
            republishes,
            proxy_calls,
            proxy_duration_seconds,
            probe_failures,
            plugins_down,
        }
    }

    pub fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = HttpLabels {
            method: method.to_string(),
            path: normalize_path(path),
            status,
        };

        self.http_requests.get_or_create(&labels).inc();
        self.http_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_routed(&self, disposition: &str) {
        self.routed_events
            .get_or_create(&RouteLabels {
                disposition: disposition.to_string(),
            })
            .inc();
    }

    pub fn record_republish(&self, outcome: &str, count: u64) {
        if count == 0 {
            return;
        }
        self.republishes
            .get_or_create(&RepublishLabels {
                outcome: outcome.to_string(),
            })
            .inc_by(count);
    }

    pub fn record_proxy(&self, kind: &str, outcome: &str, duration_secs: f64) {
        self.proxy_calls
            .get_or_create(&ProxyLabels {
                kind: kind.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
        self.proxy_duration_seconds.observe(duration_secs);
    }

    pub fn record_probe_failure(&self) {
        self.probe_failures.inc();
    }

    pub fn plugin_down(&self) {
        self.plugins_down.inc();
    }

    pub fn plugin_up(&self) {
        self.plugins_down.dec();
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        // Writing into a String cannot fail
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "failed to encode metrics");
        }
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}

/// Replace UUID and numeric path segments with `{id}` to bound label
/// cardinality.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|s| {
            if uuid::Uuid::parse_str(s).is_ok()
                || (!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
            {
                "{id}"
            } else {
                s
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
