//! Reconciliation logic for ClusterPlugin and MultiClusterPlugin resources
//!
//! A plugin runs up to two Pods against its target cluster(s): an install Pod
//! and an uninstall Pod. Each pass walks three phases in order and stops at
//! the first one that cannot advance yet:
//!
//! 1. install: create `<plugin>-install`, advance once it is terminal (or the
//!    plugin is being deleted); the finalizer is set on advance
//! 2. uninstall: the same with `<plugin>-uninstall`
//! 3. delete: only while the plugin is being deleted; removes both Pods and
//!    releases the finalizer. It never advances.
//!
//! Both plugin kinds share this engine; they differ only in how many clusters
//! they target and how credentials are mounted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::{Pod, PodSpec};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::events::{actions, reasons};
use crate::controller::finalizer::{add_finalizer, has_finalizer, remove_finalizer};
use crate::controller::store::{
    ManagedObject, api_resource, create_typed, delete_ignore_missing, get_typed,
};
use crate::crd::{
    Cluster, ClusterPlugin, MultiClusterPlugin, PluginPodSpec, PluginPodStatus, PluginStatus,
};
use crate::resources::names;
use crate::resources::owner_reference;
use crate::resources::plugin_pod::{
    convert_spec, generate_plugin_pod, inject_cluster_credentials,
    inject_multi_cluster_credentials,
};

/// Finalizer name for plugin cleanup
pub const PLUGIN_FINALIZER: &str = "finalizer.clusterplugin.kok.io";

/// Requeue while a phase Pod is still running; Pod watches usually fire sooner
pub const PHASE_REQUEUE: Duration = Duration::from_secs(10);

/// Capabilities the phase engine needs from a plugin kind
pub trait PluginObject: ManagedObject {
    /// Clusters the plugin runs against, in declaration order
    fn cluster_names(&self) -> Vec<String>;

    fn install(&self) -> &PluginPodSpec;

    fn uninstall(&self) -> &PluginPodSpec;

    fn plugin_status(&self) -> Option<&PluginStatus>;

    /// Mount credentials; `credentials` pairs each cluster with its admin config secret
    fn inject_credentials(spec: &mut PodSpec, credentials: &[(String, String)]);
}

impl PluginObject for ClusterPlugin {
    fn cluster_names(&self) -> Vec<String> {
        vec![self.spec.cluster_name.clone()]
    }

    fn install(&self) -> &PluginPodSpec {
        &self.spec.install
    }

    fn uninstall(&self) -> &PluginPodSpec {
        &self.spec.uninstall
    }

    fn plugin_status(&self) -> Option<&PluginStatus> {
        self.status.as_ref()
    }

    fn inject_credentials(spec: &mut PodSpec, credentials: &[(String, String)]) {
        if let Some((_, secret)) = credentials.first() {
            inject_cluster_credentials(spec, secret);
        }
    }
}

impl PluginObject for MultiClusterPlugin {
    fn cluster_names(&self) -> Vec<String> {
        self.spec.cluster_names.clone()
    }

    fn install(&self) -> &PluginPodSpec {
        &self.spec.install
    }

    fn uninstall(&self) -> &PluginPodSpec {
        &self.spec.uninstall
    }

    fn plugin_status(&self) -> Option<&PluginStatus> {
        self.status.as_ref()
    }

    fn inject_credentials(spec: &mut PodSpec, credentials: &[(String, String)]) {
        inject_multi_cluster_credentials(spec, credentials);
    }
}

/// The two Pod-running phases
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    Install,
    Uninstall,
}

impl PodPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            PodPhase::Install => "install",
            PodPhase::Uninstall => "uninstall",
        }
    }

    /// Deterministic Pod name for this phase
    pub fn pod_name(self, plugin: &str) -> String {
        format!("{}-{}", plugin, self.as_str())
    }
}

/// Main reconciliation function, shared by both plugin kinds
#[instrument(skip(plugin, ctx), fields(kind = %P::kind(&()), name = %plugin.name_any(), namespace = plugin.namespace().unwrap_or_default()))]
pub async fn reconcile_plugin<P: PluginObject>(plugin: Arc<P>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let result = reconcile_phases(plugin.as_ref(), &ctx).await;

    if let Some(state) = &ctx.health_state {
        let kind = P::kind(&());
        let ns = plugin.namespace().unwrap_or_default();
        match &result {
            Ok(_) => state.metrics.record_reconcile(
                &kind,
                &ns,
                &plugin.name_any(),
                start.elapsed().as_secs_f64(),
            ),
            Err(_) => state.metrics.record_error(&kind, &ns, &plugin.name_any()),
        }
    }
    result
}

/// Error policy for plugins: every failure is retried after the fixed delay
pub fn plugin_error_policy<P: PluginObject>(plugin: Arc<P>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = plugin.name_any();
    match ctx.retry.delay_for_error(error) {
        Some(delay) => {
            warn!(%name, error = %error, ?delay, "Plugin reconciliation failed, requeuing");
            Action::requeue(delay)
        }
        None => {
            error!(%name, error = %error, "Plugin reconciliation failed permanently");
            Action::await_change()
        }
    }
}

/// What the phase walk decided
#[derive(Debug, Default, PartialEq, Eq)]
struct Outcome {
    /// Install advanced; the finalizer must be present
    keep_finalizer: bool,
    /// The delete phase ran; the finalizer can be released
    release_finalizer: bool,
    /// Some phase is still waiting on its Pod
    waiting: bool,
}

async fn reconcile_phases<P: PluginObject>(plugin: &P, ctx: &Context) -> Result<Action> {
    let ns = plugin
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let deleting = plugin.meta().deletion_timestamp.is_some();
    let mut status = plugin.plugin_status().cloned().unwrap_or_default();

    let outcome = match walk_phases(plugin, ctx, &ns, deleting, &mut status).await {
        Ok(outcome) => outcome,
        Err(e) => {
            ctx.events
                .publish(
                    &plugin.object_ref(&()),
                    EventType::Warning,
                    reasons::PHASE_ERROR,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
            return Err(e);
        }
    };

    // Status first: releasing the finalizer may let the object disappear.
    // The finalizer patch is conditional, so it must carry the version the
    // status write produced.
    let mut current = plugin.clone();
    if plugin.plugin_status().cloned().unwrap_or_default() != status {
        let patched = ctx
            .store
            .patch_status(
                &api_resource::<P>(),
                &ns,
                &plugin.name_any(),
                &serde_json::json!({ "status": status }),
            )
            .await?;
        current.meta_mut().resource_version = patched.metadata.resource_version;
    }

    if outcome.release_finalizer {
        remove_finalizer(ctx.store.as_ref(), &current, PLUGIN_FINALIZER).await?;
        return Ok(Action::await_change());
    }
    if outcome.keep_finalizer && !deleting {
        add_finalizer(ctx.store.as_ref(), &current, PLUGIN_FINALIZER).await?;
    }

    if outcome.waiting {
        Ok(Action::requeue(PHASE_REQUEUE))
    } else {
        Ok(Action::await_change())
    }
}

async fn walk_phases<P: PluginObject>(
    plugin: &P,
    ctx: &Context,
    ns: &str,
    deleting: bool,
    status: &mut PluginStatus,
) -> Result<Outcome> {
    let mut outcome = Outcome::default();

    // Nothing to install on an object that is going away
    let install = run_pod_phase(
        plugin,
        ctx,
        ns,
        PodPhase::Install,
        !deleting,
        deleting,
        &mut status.install_status,
    )
    .await?;
    if !install {
        outcome.waiting = true;
        return Ok(outcome);
    }
    outcome.keep_finalizer = true;

    let uninstall = run_pod_phase(
        plugin,
        ctx,
        ns,
        PodPhase::Uninstall,
        true,
        deleting,
        &mut status.uninstall_status,
    )
    .await?;
    if !uninstall {
        outcome.waiting = true;
        return Ok(outcome);
    }

    if deleting && has_finalizer(plugin, PLUGIN_FINALIZER) {
        delete_pods(plugin, ctx, ns).await?;
        outcome.release_finalizer = true;
    }
    Ok(outcome)
}

/// Ensure the phase Pod exists and refresh its status.
///
/// Returns whether the walk may advance past this phase.
async fn run_pod_phase<P: PluginObject>(
    plugin: &P,
    ctx: &Context,
    ns: &str,
    phase: PodPhase,
    create: bool,
    advance_on_delete: bool,
    status: &mut PluginPodStatus,
) -> Result<bool> {
    let template = match phase {
        PodPhase::Install => plugin.install(),
        PodPhase::Uninstall => plugin.uninstall(),
    };
    if template.is_empty() {
        debug!(phase = phase.as_str(), "No template, phase skipped");
        return Ok(true);
    }

    let pod_name = phase.pod_name(&plugin.name_any());
    match get_typed::<Pod>(ctx.store.as_ref(), ns, &pod_name).await? {
        Some(pod) => record_pod(status, &pod),
        // A finished Pod that was removed is not run again
        None if status.is_terminal() => {}
        None if create => {
            let credentials = resolve_credentials(plugin, ctx, ns).await?;
            let mut spec = convert_spec(template);
            P::inject_credentials(&mut spec, &credentials);
            let pod = generate_plugin_pod(
                &pod_name,
                ns,
                &plugin.cluster_names(),
                owner_reference(plugin),
                spec,
            );
            create_typed(ctx.store.as_ref(), &pod).await?;
            info!(phase = phase.as_str(), pod = %pod_name, "Created plugin pod");
            if let Some(state) = &ctx.health_state {
                state.metrics.record_plugin_pod(&P::kind(&()), phase.as_str());
            }
            ctx.events
                .publish(
                    &plugin.object_ref(&()),
                    EventType::Normal,
                    reasons::CREATE_POD,
                    actions::CREATE,
                    Some(format!("Created {} pod {}", phase.as_str(), pod_name)),
                )
                .await;
            *status = PluginPodStatus {
                pod_name,
                phase: "Pending".to_string(),
                ready: false,
            };
        }
        None => {}
    }

    Ok(status.is_terminal() || advance_on_delete)
}

fn record_pod(status: &mut PluginPodStatus, pod: &Pod) {
    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| "Pending".to_string());
    status.pod_name = pod.name_any();
    status.ready = phase == "Succeeded";
    status.phase = phase;
}

/// Admin config secret of every target cluster.
///
/// A cluster that has not published its secret yet fails the pass transiently.
/// While the plugin is being deleted the target may already be gone, so the
/// deterministic secret name is used instead.
async fn resolve_credentials<P: PluginObject>(
    plugin: &P,
    ctx: &Context,
    ns: &str,
) -> Result<Vec<(String, String)>> {
    let deleting = plugin.meta().deletion_timestamp.is_some();
    let mut credentials = Vec::new();
    for cluster_name in plugin.cluster_names() {
        let cluster = get_typed::<Cluster>(ctx.store.as_ref(), ns, &cluster_name).await?;
        let secret = cluster
            .and_then(|c| c.status)
            .map(|s| s.init.admin_config_name)
            .filter(|s| !s.is_empty());
        let secret = match secret {
            Some(secret) => secret,
            None if deleting => names::admin_config_for(&cluster_name),
            None => {
                return Err(Error::TransientError(format!(
                    "cluster {} has not published its admin config",
                    cluster_name
                )));
            }
        };
        credentials.push((cluster_name, secret));
    }
    Ok(credentials)
}

async fn delete_pods<P: PluginObject>(plugin: &P, ctx: &Context, ns: &str) -> Result<()> {
    let resource = api_resource::<Pod>();
    for phase in [PodPhase::Install, PodPhase::Uninstall] {
        let name = phase.pod_name(&plugin.name_any());
        delete_ignore_missing(ctx.store.as_ref(), &resource, ns, &name).await?;
    }
    info!("Deleted plugin pods");
    ctx.events
        .publish(
            &plugin.object_ref(&()),
            EventType::Normal,
            reasons::PODS_DELETED,
            actions::DELETE,
            Some("Deleted install and uninstall pods".to_string()),
        )
        .await;
    Ok(())
}
