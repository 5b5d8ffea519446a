//! Probe and metrics endpoints served next to the controllers
//!
//! `/healthz` answers as long as the process runs, `/readyz` flips once the
//! controllers are started, and `/metrics` exposes reconcile counters in the
//! Prometheus text format.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Probe and metrics listen address
pub const HEALTH_ADDR: &str = "0.0.0.0:8080";

/// Identifies one reconciled object: Cluster, ClusterPlugin or MultiClusterPlugin
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ObjectLabels {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl EncodeLabelSet for ObjectLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())
    }
}

/// Identifies one tenant Cluster
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ClusterLabels {
    pub namespace: String,
    pub name: String,
}

impl EncodeLabelSet for ClusterLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())
    }
}

/// Plugin Pod creations by plugin kind and phase
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PluginPodLabels {
    pub kind: String,
    pub phase: String,
}

impl EncodeLabelSet for PluginPodLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("phase", self.phase.as_str()).encode(encoder.encode_label())
    }
}

pub struct Metrics {
    pub reconciliations_total: Family<ObjectLabels, Counter>,
    pub reconciliation_errors_total: Family<ObjectLabels, Counter>,
    pub reconcile_duration_seconds: Family<ObjectLabels, Histogram>,
    /// Ready stages of the last pipeline walk, removed when the Cluster is gone
    pub cluster_stages_ready: Family<ClusterLabels, Gauge>,
    pub plugin_pods_created_total: Family<PluginPodLabels, Counter>,

    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("kok_operator");

        let reconciliations_total = Family::<ObjectLabels, Counter>::default();
        registry.register(
            "reconciliations",
            "Reconcile passes that finished without error",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ObjectLabels, Counter>::default();
        registry.register(
            "reconciliation_errors",
            "Reconcile passes that returned an error",
            reconciliation_errors_total.clone(),
        );

        // 1ms up to roughly 16s
        let reconcile_duration_seconds =
            Family::<ObjectLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "reconcile_duration_seconds",
            "Wall time of one reconcile pass",
            reconcile_duration_seconds.clone(),
        );

        let cluster_stages_ready = Family::<ClusterLabels, Gauge>::default();
        registry.register(
            "cluster_stages_ready",
            "Control-plane stages reporting ready for each cluster",
            cluster_stages_ready.clone(),
        );

        let plugin_pods_created_total = Family::<PluginPodLabels, Counter>::default();
        registry.register(
            "plugin_pods_created",
            "Install and uninstall pods created for plugins",
            plugin_pods_created_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            cluster_stages_ready,
            plugin_pods_created_total,
            registry,
        }
    }

    fn object(kind: &str, namespace: &str, name: &str) -> ObjectLabels {
        ObjectLabels {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn cluster(namespace: &str, name: &str) -> ClusterLabels {
        ClusterLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn record_reconcile(&self, kind: &str, namespace: &str, name: &str, duration_secs: f64) {
        let labels = Self::object(kind, namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_error(&self, kind: &str, namespace: &str, name: &str) {
        self.reconciliation_errors_total
            .get_or_create(&Self::object(kind, namespace, name))
            .inc();
    }

    pub fn set_stages_ready(&self, namespace: &str, name: &str, ready: i64) {
        self.cluster_stages_ready
            .get_or_create(&Self::cluster(namespace, name))
            .set(ready);
    }

    /// Drop the per-Cluster series once its finalizer is released
    pub fn forget_cluster(&self, namespace: &str, name: &str) {
        self.cluster_stages_ready
            .remove(&Self::cluster(namespace, name));
    }

    pub fn record_plugin_pod(&self, kind: &str, phase: &str) {
        self.plugin_pods_created_total
            .get_or_create(&PluginPodLabels {
                kind: kind.to_string(),
                phase: phase.to_string(),
            })
            .inc();
    }

    /// Render the registry, empty on an encoder failure
    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        buffer
    }
}

/// State shared between the controllers and the probe server
pub struct HealthState {
    /// Set once both controllers are running
    pub ready: RwLock<bool>,
    pub metrics: Metrics,
    /// Unix seconds of the last successful Cluster reconcile
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    pub fn mark_reconciled(&self) {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.last_reconcile.store(now, Ordering::Relaxed);
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.encode(),
    )
}

pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve probes and metrics on [`HEALTH_ADDR`] until the listener fails
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(HEALTH_ADDR).await?;
    tracing::info!(addr = HEALTH_ADDR, "Health server listening");
    axum::serve(listener, create_router(state)).await
}
