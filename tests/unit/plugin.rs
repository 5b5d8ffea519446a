//! ClusterPlugin and MultiClusterPlugin reconciler tests

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kok_operator::controller::PluginObject;
use kok_operator::controller::plugin_reconciler::PHASE_REQUEUE;
use kok_operator::crd::{ClusterPlugin, MultiClusterPlugin, PluginPodSpec, PluginStatus};
use kok_operator::{Context, PLUGIN_FINALIZER, plugin_error_policy};
use kube::Resource;
use kube::runtime::controller::Action;

use crate::common::*;

const PLUGIN: &str = "metrics";

fn plugin_status<P: PluginObject>(store: &FakeStore) -> PluginStatus {
    store
        .object::<P>(NAMESPACE, PLUGIN)
        .and_then(|p| p.plugin_status().cloned())
        .unwrap_or_default()
}

fn plugin_finalized<P: PluginObject>(store: &FakeStore) -> bool {
    store
        .object::<P>(NAMESPACE, PLUGIN)
        .and_then(|p| p.meta().finalizers.clone())
        .is_some_and(|f| f.iter().any(|n| n == PLUGIN_FINALIZER))
}

fn pod(store: &FakeStore, name: &str) -> Pod {
    store
        .object(NAMESPACE, name)
        .unwrap_or_else(|| panic!("pod {} missing", name))
}

/// Target cluster "demo" with a published admin config, plus the plugin
fn store_with_plugin(
    install: PluginPodSpec,
    uninstall: PluginPodSpec,
) -> (Arc<FakeStore>, Arc<RecordingEvents>, Arc<Context>) {
    let (store, events, ctx) = harness();
    store.insert(&target_cluster("demo"));
    store.insert(&cluster_plugin(PLUGIN, "demo", install, uninstall));
    (store, events, ctx)
}

// =============================================================================
// Install and uninstall phases
// =============================================================================

#[tokio::test]
async fn test_install_pod_created_and_walk_halts_while_pending() {
    let (store, events, ctx) = store_with_plugin(pod_template("busybox"), PluginPodSpec::default());

    let action = plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    assert_eq!(action, Action::requeue(PHASE_REQUEUE));
    assert_eq!(
        store.calls_of(Op::Create),
        vec![("Pod".to_string(), "metrics-install".to_string())]
    );

    let status = plugin_status::<ClusterPlugin>(&store);
    assert_eq!(status.install_status.pod_name, "metrics-install");
    assert_eq!(status.install_status.phase, "Pending");
    assert!(!status.install_status.ready);
    assert!(!plugin_finalized::<ClusterPlugin>(&store));
    assert_eq!(events.count("CreatePod"), 1);

    // Still pending: nothing new
    store.clear_calls();
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    assert!(store.calls_of(Op::Create).is_empty());
}

#[tokio::test]
async fn test_install_pod_mounts_target_kubeconfig() {
    let (store, _events, ctx) = store_with_plugin(pod_template("busybox"), PluginPodSpec::default());
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();

    let pod = pod(&store, "metrics-install");
    let spec = pod.spec.unwrap();
    assert_eq!(spec.restart_policy.as_deref(), Some("Never"));

    let volumes = spec.volumes.unwrap();
    assert_eq!(volumes.len(), 1);
    let secret = volumes[0].secret.as_ref().unwrap();
    assert_eq!(secret.secret_name.as_deref(), Some("demo-admin-config"));

    let mounts = spec.containers[0].volume_mounts.clone().unwrap();
    let paths: Vec<_> = mounts.iter().map(|m| m.mount_path.as_str()).collect();
    assert_eq!(paths, vec!["/etc/cluster/", "/root/.kube/"]);

    let owner = &pod.metadata.owner_references.unwrap()[0];
    assert_eq!(owner.kind, "ClusterPlugin");
    assert_eq!(owner.name, PLUGIN);
    assert_eq!(owner.controller, Some(true));
    assert_eq!(
        pod.metadata.labels.unwrap().get("cluster").map(String::as_str),
        Some("demo")
    );
}

#[tokio::test]
async fn test_succeeded_install_starts_uninstall_phase() {
    let (store, _events, ctx) = store_with_plugin(pod_template("busybox"), pod_template("alpine"));
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();

    simulate_pod_phase(&store, "metrics-install", "Succeeded");
    store.clear_calls();
    let action = plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    assert_eq!(action, Action::requeue(PHASE_REQUEUE));

    assert_eq!(
        store.calls_of(Op::Create),
        vec![("Pod".to_string(), "metrics-uninstall".to_string())]
    );
    let status = plugin_status::<ClusterPlugin>(&store);
    assert_eq!(status.install_status.phase, "Succeeded");
    assert!(status.install_status.ready);
    assert_eq!(status.uninstall_status.pod_name, "metrics-uninstall");
    assert_eq!(status.uninstall_status.phase, "Pending");
    assert!(plugin_finalized::<ClusterPlugin>(&store));
}

#[tokio::test]
async fn test_failed_install_counts_as_finished() {
    let (store, _events, ctx) = store_with_plugin(pod_template("busybox"), PluginPodSpec::default());
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();

    simulate_pod_phase(&store, "metrics-install", "Failed");
    let action = plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    assert_eq!(action, Action::await_change());

    let status = plugin_status::<ClusterPlugin>(&store);
    assert_eq!(status.install_status.phase, "Failed");
    assert!(!status.install_status.ready);
    assert!(plugin_finalized::<ClusterPlugin>(&store));
}

#[tokio::test]
async fn test_finished_pod_is_not_rerun_after_removal() {
    let (store, _events, ctx) = store_with_plugin(pod_template("busybox"), PluginPodSpec::default());
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    simulate_pod_phase(&store, "metrics-install", "Succeeded");
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();

    store.remove::<Pod>(NAMESPACE, "metrics-install");
    store.clear_calls();
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    assert!(store.calls_of(Op::Create).is_empty());
}

#[tokio::test]
async fn test_settled_plugin_writes_nothing() {
    let (store, _events, ctx) = store_with_plugin(pod_template("busybox"), pod_template("alpine"));
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    simulate_pod_phase(&store, "metrics-install", "Succeeded");
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    simulate_pod_phase(&store, "metrics-uninstall", "Succeeded");
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();

    store.clear_calls();
    let action = plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert!(store.calls().iter().all(|c| c.op == Op::Get));
}

// =============================================================================
// Credentials
// =============================================================================

#[tokio::test]
async fn test_unpublished_admin_config_is_retried() {
    let (store, events, ctx) = harness();
    store.insert(&defaulted_cluster("demo"));
    store.insert(&cluster_plugin(PLUGIN, "demo", pod_template("busybox"), PluginPodSpec::default()));

    let err = plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(store.calls_of(Op::Create).is_empty());
    assert_eq!(events.count("PhaseError"), 1);

    let plugin = Arc::new(store.object::<ClusterPlugin>(NAMESPACE, PLUGIN).unwrap());
    assert_eq!(
        plugin_error_policy(plugin, &err, ctx),
        Action::requeue(Duration::from_secs(1))
    );
}

#[tokio::test]
async fn test_multi_cluster_plugin_mounts_every_cluster() {
    let (store, _events, ctx) = harness();
    store.insert(&target_cluster("east"));
    store.insert(&target_cluster("west"));
    store.insert(&multi_cluster_plugin(
        PLUGIN,
        &["east", "west"],
        pod_template("busybox"),
        PluginPodSpec::default(),
    ));

    plugin_pass::<MultiClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();

    let pod = pod(&store, "metrics-install");
    let spec = pod.spec.unwrap();
    let secrets: Vec<_> = spec
        .volumes
        .unwrap()
        .iter()
        .map(|v| v.secret.as_ref().unwrap().secret_name.clone().unwrap())
        .collect();
    assert_eq!(secrets, vec!["east-admin-config", "west-admin-config"]);

    let mounts = spec.containers[0].volume_mounts.clone().unwrap();
    let paths: Vec<_> = mounts.iter().map(|m| m.mount_path.clone()).collect();
    assert_eq!(paths, vec!["/etc/cluster/east/", "/etc/cluster/west/"]);
    assert_eq!(
        pod.metadata.labels.unwrap().get("cluster").map(String::as_str),
        Some("east_west")
    );
    assert_eq!(pod.metadata.owner_references.unwrap()[0].kind, "MultiClusterPlugin");
}

#[tokio::test]
async fn test_many_targets_keep_labels_and_volumes_valid() {
    let (store, _events, ctx) = harness();
    let targets = ["tenant-alpha-prod", "tenant-bravo-prod", "tenant-charlie-prod", "tenant-delta-prod"];
    for target in targets {
        store.insert(&target_cluster(target));
    }
    store.insert(&multi_cluster_plugin(
        PLUGIN,
        &targets,
        pod_template("busybox"),
        PluginPodSpec::default(),
    ));

    plugin_pass::<MultiClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();

    let pod = pod(&store, "metrics-install");
    let label = pod.metadata.labels.unwrap()["cluster"].clone();
    assert!(label.len() <= 63, "label {} too long", label);
    let volumes: Vec<_> = pod.spec.unwrap().volumes.unwrap().into_iter().map(|v| v.name).collect();
    assert_eq!(volumes, vec!["kubeconfig-0", "kubeconfig-1", "kubeconfig-2", "kubeconfig-3"]);
}

// =============================================================================
// Deletion
// =============================================================================

#[tokio::test]
async fn test_deletion_removes_pods_and_releases_finalizer() {
    let (store, events, ctx) = store_with_plugin(pod_template("busybox"), pod_template("alpine"));
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    simulate_pod_phase(&store, "metrics-install", "Succeeded");
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    simulate_pod_phase(&store, "metrics-uninstall", "Succeeded");
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();

    mark_deleting::<ClusterPlugin>(&store, PLUGIN);
    let action = plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    assert_eq!(action, Action::await_change());

    assert!(!store.contains::<Pod>(NAMESPACE, "metrics-install"));
    assert!(!store.contains::<Pod>(NAMESPACE, "metrics-uninstall"));
    assert!(!plugin_finalized::<ClusterPlugin>(&store));
    assert_eq!(events.count("PodsDeleted"), 1);
}

#[tokio::test]
async fn test_deletion_does_not_wait_for_running_uninstall() {
    let (store, events, ctx) = store_with_plugin(pod_template("busybox"), pod_template("alpine"));
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    simulate_pod_phase(&store, "metrics-install", "Succeeded");
    // Install finished, the uninstall Pod was created and the finalizer set
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    simulate_pod_phase(&store, "metrics-uninstall", "Running");
    plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    assert!(plugin_finalized::<ClusterPlugin>(&store));

    mark_deleting::<ClusterPlugin>(&store, PLUGIN);
    let action = plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert!(!store.contains::<Pod>(NAMESPACE, "metrics-install"));
    assert!(!store.contains::<Pod>(NAMESPACE, "metrics-uninstall"));
    assert!(!plugin_finalized::<ClusterPlugin>(&store));
    assert_eq!(events.count("PodsDeleted"), 1);
}

#[tokio::test]
async fn test_deleting_plugin_never_starts_install() {
    let (store, _events, ctx) = harness();
    let mut plugin = cluster_plugin(PLUGIN, "gone", pod_template("busybox"), pod_template("alpine"));
    plugin.metadata.finalizers = Some(vec![PLUGIN_FINALIZER.to_string()]);
    store.insert(&plugin);
    mark_deleting::<ClusterPlugin>(&store, PLUGIN);
    // Keep the Pods around so the rendered uninstall Pod can be inspected
    store.fail_on(Op::Delete, "Pod");

    assert!(plugin_pass::<ClusterPlugin>(&ctx, &store, PLUGIN).await.is_err());
    assert_eq!(
        store.calls_of(Op::Create),
        vec![("Pod".to_string(), "metrics-uninstall".to_string())]
    );
    assert!(plugin_finalized::<ClusterPlugin>(&store));

    // The target Cluster is gone; the deterministic secret name is used
    let pod = pod(&store, "metrics-uninstall");
    let volumes = pod.spec.unwrap().volumes.unwrap();
    assert_eq!(
        volumes[0].secret.as_ref().unwrap().secret_name.as_deref(),
        Some("gone-admin-config")
    );
}
