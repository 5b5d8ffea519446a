pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;
pub mod versions;
pub mod webhooks;

pub use config::OperatorConfig;
pub use controller::{
    Context, Error, FINALIZER, PLUGIN_FINALIZER, Result, error_policy, plugin_error_policy,
    reconcile, reconcile_plugin,
};
pub use crd::{Cluster, ClusterPlugin, EtcdCluster, MultiClusterPlugin};
pub use health::{HealthState, Metrics};
pub use versions::default_registry;
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, run_webhook_server,
};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::runtime::Controller;
use kube::runtime::controller::{Action, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

use controller::PluginObject;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Log a controller stream item; not-found after deletion is expected noise
fn log_result<K, QE>(
    kind: &str,
    result: std::result::Result<(ObjectRef<K>, Action), ControllerError<Error, QE>>,
) where
    K: Resource,
    QE: std::error::Error,
{
    match result {
        Ok((obj, _action)) => {
            tracing::debug!(kind, name = %obj.name, "Reconciled");
        }
        Err(ControllerError::ReconcilerFailed(err, obj)) if err.is_not_found() => {
            tracing::debug!(kind, name = %obj.name, "Object no longer exists (likely deleted)");
        }
        Err(e) => {
            tracing::error!(kind, error = ?e, "Reconciliation error");
        }
    }
}

/// Run the Cluster controller with optional namespace scoping.
///
/// When `namespace` is `Some(ns)`, only watches resources in that namespace.
/// When `namespace` is `None`, watches resources cluster-wide. Every owned
/// child kind is watched so that a change to any of them triggers a pass on
/// the owning Cluster.
pub async fn run_controller_scoped(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for Cluster resources (scope: {})",
        scope_msg
    );

    if let Some(state) = &ctx.health_state {
        state.set_ready(true).await;
    }

    let clusters: Api<Cluster> = scoped_api(client.clone(), namespace);
    let accounts: Api<ServiceAccount> = scoped_api(client.clone(), namespace);
    let bindings: Api<RoleBinding> = scoped_api(client.clone(), namespace);
    let jobs: Api<Job> = scoped_api(client.clone(), namespace);
    let etcd_clusters: Api<EtcdCluster> = scoped_api(client.clone(), namespace);
    let deployments: Api<Deployment> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);

    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(clusters, watcher_config.clone())
        .owns(accounts, watcher_config.clone())
        .owns(bindings, watcher_config.clone())
        .owns(jobs, watcher_config.clone())
        .owns(etcd_clusters, watcher_config.clone())
        .owns(deployments, watcher_config.clone())
        .owns(services, watcher_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move { log_result("Cluster", result) })
        .await;

    // This should never complete in normal operation
    tracing::error!("Cluster controller stream ended unexpectedly");
}

/// Run the controller for one plugin kind; plugin Pods are owned and watched
pub async fn run_plugin_controller_scoped<P>(client: Client, ctx: Arc<Context>, namespace: Option<&str>)
where
    P: PluginObject,
{
    let kind = P::kind(&()).to_string();
    tracing::info!(
        "Starting controller for {} resources (scope: {})",
        kind,
        namespace.unwrap_or("cluster-wide")
    );

    let plugins: Api<P> = scoped_api(client.clone(), namespace);
    let pods: Api<Pod> = scoped_api(client.clone(), namespace);

    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(plugins, watcher_config.clone())
        .owns(pods, watcher_config)
        .run(reconcile_plugin::<P>, plugin_error_policy::<P>, ctx)
        .for_each(|result| {
            let kind = kind.clone();
            async move { log_result(&kind, result) }
        })
        .await;

    tracing::error!("{} controller stream ended unexpectedly", P::kind(&()));
}

/// Run the Cluster, ClusterPlugin and MultiClusterPlugin controllers side by side
pub async fn run_all_controllers(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    tokio::join!(
        run_controller_scoped(client.clone(), ctx.clone(), namespace),
        run_plugin_controller_scoped::<ClusterPlugin>(client.clone(), ctx.clone(), namespace),
        run_plugin_controller_scoped::<MultiClusterPlugin>(client, ctx, namespace),
    );
}
