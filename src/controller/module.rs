//! Module engine
//!
//! A [`Module`] is the unit the Cluster reconciler drives. Leaves wrap an
//! [`ObjectModule`], which renders exactly one child object; a [`Stage`] is an
//! ordered composite of modules and never renders anything itself.
//!
//! Reconciliation is minimal-diff: status is refreshed from every observed
//! object on every pass, but a child is only written back when the fields the
//! render function sets differ from what the API server returned.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Resource;
use kube::discovery::ApiResource;
use kube::runtime::events::EventType;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::controller::error::{Error, Result};
use crate::controller::events::{EventPublisher, actions, reasons};
use crate::controller::store::{
    ManagedObject, ObjectStore, api_resource, create_typed, delete_ignore_missing, get_typed,
    update_typed,
};
use crate::controller::validation::FieldError;
use crate::crd::{Cluster, ClusterSpec, ClusterStatus};

/// Everything one pass needs: the adapter, the event sink and the Cluster being
/// reconciled. Modules write observed state into `cluster.status` in place.
pub struct ModuleContext<'a> {
    pub store: &'a dyn ObjectStore,
    pub events: &'a dyn EventPublisher,
    pub cluster: &'a mut Cluster,
}

impl<'a> ModuleContext<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        events: &'a dyn EventPublisher,
        cluster: &'a mut Cluster,
    ) -> Self {
        Self {
            store,
            events,
            cluster,
        }
    }

    pub fn namespace(&self) -> String {
        self.cluster.metadata.namespace.clone().unwrap_or_default()
    }

    fn object_ref(&self) -> ObjectReference {
        self.cluster.object_ref(&())
    }

    /// Publish an Event on the Cluster being reconciled
    pub async fn publish(&self, type_: EventType, reason: &str, action: &str, note: String) {
        self.events
            .publish(&self.object_ref(), type_, reason, action, Some(note))
            .await;
    }
}

/// Behaviour of one reconciliation unit, leaf or composite
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Drive the live state toward the rendered state; the first error aborts
    async fn reconcile(&self, ctx: &mut ModuleContext<'_>) -> Result<()>;

    /// Whether later stages may proceed, judged from `cluster.status`
    fn ready(&self, cluster: &Cluster) -> bool;

    /// Remove artifacts that owner-reference cascade deletion cannot reach
    async fn delete(&self, ctx: &ModuleContext<'_>) -> Result<()>;

    fn apply_defaults(&self, spec: &mut ClusterSpec);

    fn validate_create(&self, cluster: &Cluster) -> Vec<FieldError>;

    fn validate_update(&self, old: &Cluster, new: &Cluster) -> Vec<FieldError>;
}

/// Renders and tracks a single child object of one concrete kind
pub trait ObjectModule: Send + Sync + 'static {
    type Object: ManagedObject;

    fn name(&self) -> &'static str;

    /// Desired child object; must depend only on the Cluster and fixed variant data
    fn render(&self, cluster: &Cluster) -> Self::Object;

    /// Copy observed state into status. When the observed spec has drifted,
    /// overwrite it with the desired spec and return `true` to request an update.
    fn set_status(
        &self,
        spec: &ClusterSpec,
        status: &mut ClusterStatus,
        desired: &Self::Object,
        observed: &mut Self::Object,
    ) -> bool;

    fn ready(&self, _cluster: &Cluster) -> bool {
        true
    }

    /// Objects created for this module by someone else, deleted by name on teardown
    fn unowned_objects(&self, _cluster: &Cluster) -> Vec<(ApiResource, String)> {
        Vec::new()
    }

    fn apply_defaults(&self, _spec: &mut ClusterSpec) {}

    fn validate_create(&self, _cluster: &Cluster) -> Vec<FieldError> {
        Vec::new()
    }

    fn validate_update(&self, _old: &Cluster, _new: &Cluster) -> Vec<FieldError> {
        Vec::new()
    }
}

/// Adapts an [`ObjectModule`] into a [`Module`]
pub struct Leaf<M> {
    module: M,
}

impl<M: ObjectModule> Leaf<M> {
    pub fn new(module: M) -> Self {
        Self { module }
    }

    pub fn boxed(module: M) -> Box<dyn Module> {
        Box::new(Self::new(module))
    }

    /// Whether the rendered child object is present; other errors propagate
    pub async fn exists(&self, store: &dyn ObjectStore, cluster: &Cluster) -> Result<bool> {
        let desired = self.module.render(cluster);
        let (namespace, name) = object_key(&desired)?;
        Ok(store
            .get(&api_resource::<M::Object>(), &namespace, &name)
            .await?
            .is_some())
    }
}

fn object_key<K: ManagedObject>(object: &K) -> Result<(String, String)> {
    let meta = object.meta();
    let name = meta
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let namespace = meta
        .namespace
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    Ok((namespace, name))
}

#[async_trait]
impl<M: ObjectModule> Module for Leaf<M> {
    fn name(&self) -> &str {
        self.module.name()
    }

    async fn reconcile(&self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        let desired = self.module.render(ctx.cluster);
        let (namespace, name) = object_key(&desired)?;
        let kind = M::Object::kind(&()).to_string();

        match get_typed::<M::Object>(ctx.store, &namespace, &name).await? {
            None => {
                debug!(module = self.module.name(), %kind, %name, "Child object absent, creating");
                if let Err(e) = create_typed(ctx.store, &desired).await {
                    ctx.publish(
                        EventType::Warning,
                        reasons::CREATE_ERROR,
                        actions::CREATE,
                        format!("Failed to create {} {}: {}", kind, name, e),
                    )
                    .await;
                    return Err(e);
                }
                ctx.publish(
                    EventType::Normal,
                    reasons::CREATING,
                    actions::CREATE,
                    format!("Created {} {}", kind, name),
                )
                .await;
                Ok(())
            }
            Some(mut observed) => {
                let Cluster { spec, status, .. } = &mut *ctx.cluster;
                let status = status.get_or_insert_with(ClusterStatus::default);
                if self.module.set_status(spec, status, &desired, &mut observed) {
                    info!(module = self.module.name(), %kind, %name, "Spec drifted, updating child object");
                    update_typed(ctx.store, &observed).await?;
                    ctx.publish(
                        EventType::Normal,
                        reasons::UPDATING,
                        actions::UPDATE,
                        format!("Updated {} {}", kind, name),
                    )
                    .await;
                }
                Ok(())
            }
        }
    }

    fn ready(&self, cluster: &Cluster) -> bool {
        self.module.ready(cluster)
    }

    async fn delete(&self, ctx: &ModuleContext<'_>) -> Result<()> {
        let namespace = ctx.namespace();
        for (resource, name) in self.module.unowned_objects(ctx.cluster) {
            if let Err(e) = delete_ignore_missing(ctx.store, &resource, &namespace, &name).await {
                warn!(module = self.module.name(), kind = %resource.kind, %name, error = %e, "Failed to delete");
                ctx.publish(
                    EventType::Warning,
                    reasons::MODULE_DELETE_ERROR,
                    actions::DELETE,
                    format!("Failed to delete {} {}: {}", resource.kind, name, e),
                )
                .await;
                return Err(e);
            }
        }
        Ok(())
    }

    fn apply_defaults(&self, spec: &mut ClusterSpec) {
        self.module.apply_defaults(spec);
    }

    fn validate_create(&self, cluster: &Cluster) -> Vec<FieldError> {
        self.module.validate_create(cluster)
    }

    fn validate_update(&self, old: &Cluster, new: &Cluster) -> Vec<FieldError> {
        self.module.validate_update(old, new)
    }
}

/// A named, ordered group of modules that must all be ready before the next stage starts
pub struct Stage {
    name: String,
    order: u32,
    children: Vec<Box<dyn Module>>,
}

impl Stage {
    pub fn new(name: impl Into<String>, order: u32) -> Self {
        Self {
            name: name.into(),
            order,
            children: Vec::new(),
        }
    }

    /// Append a child; children run in insertion order
    pub fn with(mut self, child: Box<dyn Module>) -> Self {
        self.children.push(child);
        self
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn children(&self) -> &[Box<dyn Module>] {
        &self.children
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("order", &self.order)
            .field(
                "children",
                &self.children.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[async_trait]
impl Module for Stage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reconcile(&self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        for child in &self.children {
            child.reconcile(ctx).await?;
        }
        Ok(())
    }

    fn ready(&self, cluster: &Cluster) -> bool {
        self.children.iter().all(|c| c.ready(cluster))
    }

    async fn delete(&self, ctx: &ModuleContext<'_>) -> Result<()> {
        for child in &self.children {
            child.delete(ctx).await?;
        }
        Ok(())
    }

    fn apply_defaults(&self, spec: &mut ClusterSpec) {
        for child in &self.children {
            child.apply_defaults(spec);
        }
    }

    fn validate_create(&self, cluster: &Cluster) -> Vec<FieldError> {
        self.children
            .iter()
            .map(|c| c.validate_create(cluster))
            .find(|errors| !errors.is_empty())
            .unwrap_or_default()
    }

    fn validate_update(&self, old: &Cluster, new: &Cluster) -> Vec<FieldError> {
        self.children
            .iter()
            .map(|c| c.validate_update(old, new))
            .find(|errors| !errors.is_empty())
            .unwrap_or_default()
    }
}

/// Whether `observed` no longer carries every field `desired` sets.
///
/// Only fields present in the desired value are compared, so server-populated
/// defaults (node ports, cluster IPs, termination message paths, ...) never
/// count as drift. Arrays compare element-wise and must have equal length.
pub fn spec_drifted<T: Serialize>(desired: &T, observed: &T) -> bool {
    match (serde_json::to_value(desired), serde_json::to_value(observed)) {
        (Ok(d), Ok(o)) => !is_subset(&d, &o),
        _ => true,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn is_subset(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Null, _) => true,
        (Value::Object(d), Value::Object(o)) => d.iter().all(|(k, dv)| match o.get(k) {
            Some(ov) => is_subset(dv, ov),
            None => is_empty(dv),
        }),
        (Value::Array(d), Value::Array(o)) => {
            d.len() == o.len() && d.iter().zip(o).all(|(dv, ov)| is_subset(dv, ov))
        }
        (d, Value::Null) => is_empty(d),
        (d, o) => d == o,
    }
}

/// Overwrite `observed` with `desired` when it drifted; returns whether it did
pub fn sync_spec<T: Serialize + Clone>(desired: &T, observed: &mut T) -> bool {
    if spec_drifted(desired, observed) {
        *observed = desired.clone();
        true
    } else {
        false
    }
}
