//! Test fixtures for Cluster and plugin resources
//!
//! Builders produce resources as a user would submit them. The `harness`
//! wires a [`FakeStore`] and [`RecordingEvents`] into a controller `Context`,
//! and the `simulate_*` helpers stand in for the controllers that would
//! normally move child objects forward (Job controller, etcd operator,
//! kubelet).
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let (store, events, ctx) = harness();
//! store.insert(&ClusterBuilder::new("demo").build());
//! cluster_pass(&ctx, &store, "demo").await.unwrap();
//! simulate_init_complete(&store, "demo");
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::{Container, ObjectReference, Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kok_operator::controller::error::Result;
use kok_operator::controller::events::EventPublisher;
use kok_operator::controller::{PluginObject, reconcile, reconcile_plugin};
use kok_operator::crd::{
    Cluster, ClusterPlugin, ClusterPluginSpec, ClusterSpec, ClusterStatus, EtcdCluster,
    EtcdClusterStatus, MembersStatus, MultiClusterPlugin, MultiClusterPluginSpec, PluginPodSpec,
};
use kok_operator::{Context, default_registry};
use kube::Resource;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;

use super::store::FakeStore;

/// Namespace every fixture lives in
pub const NAMESPACE: &str = "tenants";

// =============================================================================
// Events
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub type_: String,
    pub reason: String,
    pub note: String,
}

/// Event sink that keeps everything it is given
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub fn all(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.all().into_iter().map(|e| e.reason).collect()
    }

    pub fn count(&self, reason: &str) -> usize {
        self.all().iter().filter(|e| e.reason == reason).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            type_: format!("{:?}", type_),
            reason: reason.to_string(),
            note: note.unwrap_or_default(),
        });
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Store, event sink and a Context over the default registry
pub fn harness() -> (Arc<FakeStore>, Arc<RecordingEvents>, Arc<Context>) {
    let store = Arc::new(FakeStore::new());
    let events = Arc::new(RecordingEvents::default());
    let ctx = Arc::new(Context::from_parts(
        store.clone(),
        events.clone(),
        Arc::new(default_registry()),
    ));
    (store, events, ctx)
}

/// Run one Cluster pass against the latest stored copy, as the controller would
pub async fn cluster_pass(ctx: &Arc<Context>, store: &FakeStore, name: &str) -> Result<Action> {
    let cluster: Cluster = store
        .object(NAMESPACE, name)
        .unwrap_or_else(|| panic!("Cluster {} not stored", name));
    reconcile(Arc::new(cluster), ctx.clone()).await
}

/// Run one plugin pass against the latest stored copy
pub async fn plugin_pass<P: PluginObject>(
    ctx: &Arc<Context>,
    store: &FakeStore,
    name: &str,
) -> Result<Action> {
    let plugin: P = store
        .object(NAMESPACE, name)
        .unwrap_or_else(|| panic!("plugin {} not stored", name));
    reconcile_plugin(Arc::new(plugin), ctx.clone()).await
}

/// Stored Cluster status, or the default when none was written
pub fn stored_status(store: &FakeStore, name: &str) -> ClusterStatus {
    store
        .object::<Cluster>(NAMESPACE, name)
        .and_then(|c| c.status)
        .unwrap_or_default()
}

// =============================================================================
// Cluster builders
// =============================================================================

/// Builder for Cluster resources
pub struct ClusterBuilder {
    cluster: Cluster,
}

impl ClusterBuilder {
    /// A Cluster as submitted, before admission defaulting
    pub fn new(name: &str) -> Self {
        let mut cluster = Cluster::new(name, ClusterSpec::default());
        cluster.metadata.namespace = Some(NAMESPACE.to_string());
        cluster.metadata.uid = Some(format!("uid-{}", name));
        cluster.metadata.generation = Some(1);
        Self { cluster }
    }

    /// Start from a Cluster the mutating webhook has already defaulted
    pub fn defaulted(name: &str) -> Self {
        let mut builder = Self::new(name);
        default_registry().apply_defaults(&mut builder.cluster);
        builder
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.cluster.spec.cluster_version = version.to_string();
        self
    }

    pub fn with_etcd_count(mut self, count: i32) -> Self {
        self.cluster.spec.etcd.count = count;
        self
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.cluster.metadata.generation = Some(generation);
        self
    }

    pub fn with_finalizer(mut self, finalizer: &str) -> Self {
        self.cluster
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
        self
    }

    pub fn deleting(mut self) -> Self {
        self.cluster.metadata.deletion_timestamp = Some(Time(Utc::now()));
        self
    }

    pub fn with_status(mut self, status: ClusterStatus) -> Self {
        self.cluster.status = Some(status);
        self
    }

    pub fn build(self) -> Cluster {
        self.cluster
    }
}

/// A defaulted Cluster with a three-member etcd
pub fn defaulted_cluster(name: &str) -> Cluster {
    ClusterBuilder::defaulted(name).with_etcd_count(3).build()
}

/// A Cluster a plugin can target: its init stage already published the admin config
pub fn target_cluster(name: &str) -> Cluster {
    let mut status = ClusterStatus::default();
    status.init.admin_config_name = format!("{}-admin-config", name);
    ClusterBuilder::defaulted(name).with_status(status).build()
}

// =============================================================================
// Plugin builders
// =============================================================================

/// Single-container template running `image`
pub fn pod_template(image: &str) -> PluginPodSpec {
    PluginPodSpec {
        containers: vec![Container {
            name: "main".to_string(),
            image: Some(image.to_string()),
            command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), "run".to_string()]),
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub fn cluster_plugin(
    name: &str,
    cluster_name: &str,
    install: PluginPodSpec,
    uninstall: PluginPodSpec,
) -> ClusterPlugin {
    let mut plugin = ClusterPlugin::new(
        name,
        ClusterPluginSpec {
            cluster_name: cluster_name.to_string(),
            install,
            uninstall,
        },
    );
    plugin.metadata.namespace = Some(NAMESPACE.to_string());
    plugin.metadata.uid = Some(format!("uid-{}", name));
    plugin
}

pub fn multi_cluster_plugin(
    name: &str,
    cluster_names: &[&str],
    install: PluginPodSpec,
    uninstall: PluginPodSpec,
) -> MultiClusterPlugin {
    let mut plugin = MultiClusterPlugin::new(
        name,
        MultiClusterPluginSpec {
            cluster_names: cluster_names.iter().map(|s| s.to_string()).collect(),
            install,
            uninstall,
        },
    );
    plugin.metadata.namespace = Some(NAMESPACE.to_string());
    plugin.metadata.uid = Some(format!("uid-{}", name));
    plugin
}

/// Mark a stored plugin as deleted by the user
pub fn mark_deleting<P: PluginObject>(store: &FakeStore, name: &str) {
    store.modify::<P>(NAMESPACE, name, |p| {
        p.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
    });
}

// =============================================================================
// Simulated external controllers
// =============================================================================

/// The Job controller marks the init Job complete
pub fn simulate_init_complete(store: &FakeStore, cluster_name: &str) {
    store.modify::<Job>(NAMESPACE, &format!("{}-init", cluster_name), |job| {
        job.status = Some(JobStatus {
            succeeded: Some(1),
            conditions: Some(vec![JobCondition {
                type_: "Complete".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
    });
}

/// The etcd operator reports `size` members with `ready` of them up
pub fn simulate_etcd_members(store: &FakeStore, cluster_name: &str, size: i32, ready: usize) {
    store.modify::<EtcdCluster>(NAMESPACE, &format!("{}-etcd", cluster_name), |etcd| {
        etcd.status = Some(EtcdClusterStatus {
            phase: "Running".to_string(),
            size,
            service_name: format!("{}-etcd-client", cluster_name),
            client_port: 2379,
            members: MembersStatus {
                ready: (0..ready).map(|i| format!("{}-etcd-{}", cluster_name, i)).collect(),
                unready: Vec::new(),
            },
            current_version: "3.2.13".to_string(),
        });
    });
}

/// The Deployment controller reports the rollout as available
pub fn simulate_deployment_available(store: &FakeStore, name: &str) {
    store.modify::<Deployment>(NAMESPACE, name, |deployment| {
        let replicas = deployment.spec.as_ref().and_then(|s| s.replicas);
        deployment.status = Some(DeploymentStatus {
            replicas,
            ready_replicas: replicas,
            available_replicas: replicas,
            conditions: Some(vec![DeploymentCondition {
                type_: "Available".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
    });
}

/// The kubelet moves a Pod to `phase`
pub fn simulate_pod_phase(store: &FakeStore, name: &str, phase: &str) {
    store.modify::<Pod>(NAMESPACE, name, |pod| {
        pod.status = Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        });
    });
}
