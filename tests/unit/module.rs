//! Module engine tests: composite readiness, minimal-diff leaves and drift detection

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kok_operator::controller::error::Result;
use kok_operator::controller::module::{
    Leaf, Module, ModuleContext, ObjectModule, Stage, spec_drifted, sync_spec,
};
use kok_operator::controller::validation::FieldError;
use kok_operator::crd::{Cluster, ClusterSpec, ClusterStatus};
use kube::core::ObjectMeta;

use crate::common::*;

// =============================================================================
// Helpers
// =============================================================================

/// Module with a fixed readiness answer and optional validation failure
struct Fixed {
    name: &'static str,
    ready: bool,
    invalid: bool,
}

fn fixed(name: &'static str, ready: bool) -> Box<dyn Module> {
    Box::new(Fixed {
        name,
        ready,
        invalid: false,
    })
}

fn invalid(name: &'static str) -> Box<dyn Module> {
    Box::new(Fixed {
        name,
        ready: true,
        invalid: true,
    })
}

#[async_trait]
impl Module for Fixed {
    fn name(&self) -> &str {
        self.name
    }

    async fn reconcile(&self, _ctx: &mut ModuleContext<'_>) -> Result<()> {
        Ok(())
    }

    fn ready(&self, _cluster: &Cluster) -> bool {
        self.ready
    }

    async fn delete(&self, _ctx: &ModuleContext<'_>) -> Result<()> {
        Ok(())
    }

    fn apply_defaults(&self, _spec: &mut ClusterSpec) {}

    fn validate_create(&self, _cluster: &Cluster) -> Vec<FieldError> {
        if self.invalid {
            vec![FieldError::required(&format!("spec.{}", self.name))]
        } else {
            Vec::new()
        }
    }

    fn validate_update(&self, _old: &Cluster, new: &Cluster) -> Vec<FieldError> {
        self.validate_create(new)
    }
}

/// Renders one ConfigMap carrying the cluster domain
struct SettingsMap;

impl ObjectModule for SettingsMap {
    type Object = ConfigMap;

    fn name(&self) -> &'static str {
        "settings"
    }

    fn render(&self, cluster: &Cluster) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(format!("{}-settings", cluster.metadata.name.clone().unwrap())),
                namespace: cluster.metadata.namespace.clone(),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "domain".to_string(),
                cluster.spec.cluster_domain.clone(),
            )])),
            ..Default::default()
        }
    }

    fn set_status(
        &self,
        _spec: &ClusterSpec,
        status: &mut ClusterStatus,
        desired: &ConfigMap,
        observed: &mut ConfigMap,
    ) -> bool {
        status.init.name = observed.metadata.name.clone().unwrap_or_default();
        if spec_drifted(&desired.data, &observed.data) {
            observed.data = desired.data.clone();
            true
        } else {
            false
        }
    }
}

fn cluster() -> Cluster {
    let mut cluster = ClusterBuilder::new("demo").build();
    cluster.spec.cluster_domain = "cluster.local".to_string();
    cluster
}

async fn reconcile_leaf(store: &FakeStore, cluster: &mut Cluster) -> Result<()> {
    let events = RecordingEvents::default();
    let leaf = Leaf::new(SettingsMap);
    let mut ctx = ModuleContext::new(store, &events, cluster);
    leaf.reconcile(&mut ctx).await
}

// =============================================================================
// Composite readiness
// =============================================================================

#[test]
fn test_stage_ready_is_conjunction_of_children() {
    let c = cluster();
    let mixed = Stage::new("mixed", 1)
        .with(fixed("a", true))
        .with(fixed("b", false));
    assert!(!mixed.ready(&c));

    let all = Stage::new("all", 2)
        .with(fixed("a", true))
        .with(fixed("b", true));
    assert!(all.ready(&c));
}

#[test]
fn test_empty_stage_is_vacuously_ready() {
    assert!(Stage::new("empty", 1).ready(&cluster()));
}

#[test]
fn test_nested_stage_readiness() {
    let c = cluster();
    let inner = Stage::new("inner", 1).with(fixed("x", false));
    let outer = Stage::new("outer", 2)
        .with(fixed("a", true))
        .with(Box::new(inner));
    assert!(!outer.ready(&c));
}

#[test]
fn test_stage_validation_stops_at_first_failing_child() {
    let stage = Stage::new("checks", 1)
        .with(fixed("ok", true))
        .with(invalid("first"))
        .with(invalid("second"));
    let errors = stage.validate_create(&cluster());
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].path, "spec.first");
}

// =============================================================================
// Leaf reconcile
// =============================================================================

#[tokio::test]
async fn test_leaf_creates_missing_object() {
    let store = FakeStore::new();
    let mut c = cluster();
    reconcile_leaf(&store, &mut c).await.unwrap();

    assert_eq!(
        store.calls_of(Op::Create),
        vec![("ConfigMap".to_string(), "demo-settings".to_string())]
    );
    // Nothing observed yet
    assert!(c.status.is_none());
}

#[tokio::test]
async fn test_leaf_matching_object_refreshes_status_only() {
    let store = FakeStore::new();
    let mut c = cluster();
    reconcile_leaf(&store, &mut c).await.unwrap();

    // Server adds metadata and a label of its own
    store.modify::<ConfigMap>(NAMESPACE, "demo-settings", |cm| {
        cm.metadata.uid = Some("server-uid".to_string());
        cm.metadata.labels = Some(BTreeMap::from([("injected".to_string(), "yes".to_string())]));
    });
    store.clear_calls();
    reconcile_leaf(&store, &mut c).await.unwrap();

    assert!(store.writes().is_empty());
    assert_eq!(c.status.unwrap().init.name, "demo-settings");
}

#[tokio::test]
async fn test_leaf_rewrites_drifted_object() {
    let store = FakeStore::new();
    let mut c = cluster();
    reconcile_leaf(&store, &mut c).await.unwrap();

    store.modify::<ConfigMap>(NAMESPACE, "demo-settings", |cm| {
        cm.data = Some(BTreeMap::from([("domain".to_string(), "edited".to_string())]));
        cm.metadata.uid = Some("server-uid".to_string());
    });
    store.clear_calls();
    reconcile_leaf(&store, &mut c).await.unwrap();

    assert_eq!(
        store.calls_of(Op::Update),
        vec![("ConfigMap".to_string(), "demo-settings".to_string())]
    );
    let stored: ConfigMap = store.object(NAMESPACE, "demo-settings").unwrap();
    assert_eq!(stored.data.unwrap()["domain"], "cluster.local");
    // Server-owned metadata survives the rewrite
    assert_eq!(stored.metadata.uid.as_deref(), Some("server-uid"));
}

#[tokio::test]
async fn test_leaf_exists_follows_store() {
    let store = FakeStore::new();
    let leaf = Leaf::new(SettingsMap);
    let mut c = cluster();
    assert!(!leaf.exists(&store, &c).await.unwrap());

    reconcile_leaf(&store, &mut c).await.unwrap();
    assert!(leaf.exists(&store, &c).await.unwrap());
}

#[tokio::test]
async fn test_leaf_propagates_read_errors() {
    let store = FakeStore::new();
    store.fail_on(Op::Get, "ConfigMap");
    let mut c = cluster();
    assert!(reconcile_leaf(&store, &mut c).await.is_err());
    assert!(store.calls_of(Op::Create).is_empty());
}

// =============================================================================
// Drift detection
// =============================================================================

#[test]
fn test_sync_spec_fills_missing_desired_fields() {
    let desired = BTreeMap::from([("a".to_string(), "1".to_string())]);
    let mut observed = BTreeMap::new();
    assert!(sync_spec(&desired, &mut observed));
    assert_eq!(observed, desired);
    assert!(!sync_spec(&desired, &mut observed));
}

#[test]
fn test_list_length_change_is_drift() {
    let desired = vec!["a".to_string()];
    assert!(spec_drifted(&desired, &vec!["a".to_string(), "b".to_string()]));
    assert!(!spec_drifted(&desired, &vec!["a".to_string()]));
}
