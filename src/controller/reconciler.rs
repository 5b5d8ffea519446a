//! Reconciliation logic for Cluster resources
//!
//! Each pass walks the stage pipeline registered for the Cluster's version,
//! stopping at the first stage that is not ready yet, then makes sure the
//! finalizer is present and persists status once. Deleting Clusters run every
//! stage's teardown in order before the finalizer is released.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::events::{actions, reasons};
use crate::controller::finalizer::{add_finalizer, remove_finalizer};
use crate::controller::module::{Module, ModuleContext, Stage};
use crate::controller::status::{record_progress, status_patch};
use crate::controller::store::api_resource;
use crate::crd::{Cluster, ClusterStatus};

/// Finalizer name for cleanup
pub const FINALIZER: &str = "finalizer.cluster.kok.io";

/// Requeue while a stage is still coming up; owned-object watches usually fire sooner
pub const PENDING_REQUEUE: Duration = Duration::from_secs(10);

/// Periodic resync once every stage is ready
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

const KIND: &str = "Cluster";

/// Main reconciliation function
#[instrument(skip(cluster, ctx), fields(name = %cluster.name_any(), namespace = cluster.namespace().unwrap_or_default()))]
pub async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    let result = if cluster.is_deleting() {
        handle_deletion(&cluster, &ctx).await
    } else {
        reconcile_stages(&cluster, &ctx).await
    };

    if let Some(state) = &ctx.health_state {
        match &result {
            Ok(_) => {
                state
                    .metrics
                    .record_reconcile(KIND, &ns, &name, start.elapsed().as_secs_f64());
                state.mark_reconciled();
            }
            Err(_) => state.metrics.record_error(KIND, &ns, &name),
        }
    }
    result
}

/// Error policy: fixed-delay requeue for transient errors, wait for a spec
/// change for configuration errors
pub fn error_policy(cluster: Arc<Cluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = cluster.name_any();
    match ctx.retry.delay_for_error(error) {
        Some(delay) => {
            warn!(%name, error = %error, ?delay, "Reconciliation failed, requeuing");
            Action::requeue(delay)
        }
        None => {
            error!(%name, error = %error, "Reconciliation failed permanently, waiting for a spec change");
            Action::await_change()
        }
    }
}

async fn reconcile_stages(cluster: &Cluster, ctx: &Context) -> Result<Action> {
    let Some(stages) = ctx.registry.lookup(cluster.version()) else {
        error!(version = cluster.version(), "No pipeline registered for version");
        ctx.events
            .publish(
                &cluster.object_ref(&()),
                EventType::Warning,
                reasons::UNSUPPORTED_VERSION,
                actions::RECONCILE,
                Some(format!("Unsupported cluster version {:?}", cluster.version())),
            )
            .await;
        return Err(Error::UnsupportedVersion(cluster.version().to_string()));
    };

    info!(version = cluster.version(), stages = stages.len(), "Reconciling Cluster");

    let mut working = cluster.clone();
    let pending = {
        let mut mctx = ModuleContext::new(ctx.store.as_ref(), ctx.events.as_ref(), &mut working);
        walk_stages(stages, &mut mctx).await?
    };

    let pending_stage = pending.and_then(|i| stages.get(i)).map(|s| s.name().to_string());
    let ready_stages = pending.unwrap_or(stages.len());
    if let Some(state) = &ctx.health_state {
        state.metrics.set_stages_ready(
            &working.namespace().unwrap_or_default(),
            &working.name_any(),
            i64::try_from(ready_stages).unwrap_or(i64::MAX),
        );
    }

    // The status write is conditional on the version the finalizer write left
    let resource_version = match add_finalizer(ctx.store.as_ref(), cluster, FINALIZER).await? {
        Some(patched) => {
            info!("Finalizer added");
            patched.metadata.resource_version
        }
        None => cluster.resource_version(),
    };

    let mut status = working.status.take().unwrap_or_default();
    record_progress(
        &mut status,
        cluster.metadata.generation,
        pending_stage.as_deref(),
    );
    persist_status(cluster, ctx, &status, resource_version.as_deref()).await?;

    match pending_stage {
        Some(stage) => {
            debug!(%stage, "Waiting on stage");
            Ok(Action::requeue(PENDING_REQUEUE))
        }
        None => {
            info!("All stages ready");
            Ok(Action::requeue(RESYNC_INTERVAL))
        }
    }
}

/// Reconcile each stage in order; returns the index of the first stage that
/// is not ready, or `None` when all are
async fn walk_stages(stages: &[Stage], mctx: &mut ModuleContext<'_>) -> Result<Option<usize>> {
    let previous = mctx
        .cluster
        .status
        .as_ref()
        .map(|s| s.current_stage.clone())
        .unwrap_or_default();

    for (index, stage) in stages.iter().enumerate() {
        if let Err(e) = stage.reconcile(mctx).await {
            warn!(stage = stage.name(), error = %e, "Stage reconcile failed");
            mctx.publish(
                EventType::Warning,
                reasons::RECONCILE_ERROR,
                actions::RECONCILE,
                format!("Stage {} failed: {}", stage.name(), e),
            )
            .await;
            return Err(e);
        }

        if !stage.ready(mctx.cluster) {
            info!(stage = stage.name(), "Stage not ready, later stages deferred");
            return Ok(Some(index));
        }

        if previous == stage.name() {
            mctx.publish(
                EventType::Normal,
                reasons::STAGE_READY,
                actions::RECONCILE,
                format!("Stage {} is ready", stage.name()),
            )
            .await;
        }
    }
    Ok(None)
}

/// Write status only when the pass changed it; a stale `resource_version`
/// makes the write fail with a conflict
async fn persist_status(
    cluster: &Cluster,
    ctx: &Context,
    status: &ClusterStatus,
    resource_version: Option<&str>,
) -> Result<()> {
    if cluster.status.as_ref() == Some(status) {
        debug!("Status unchanged");
        return Ok(());
    }
    let ns = cluster
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    ctx.store
        .patch_status(
            &api_resource::<Cluster>(),
            &ns,
            &cluster.name_any(),
            &status_patch(status, resource_version),
        )
        .await?;
    Ok(())
}

/// Handle deletion of the Cluster
async fn handle_deletion(cluster: &Cluster, ctx: &Context) -> Result<Action> {
    if !cluster.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(Action::await_change());
    }
    info!("Handling Cluster deletion");

    match ctx.registry.lookup(cluster.version()) {
        Some(stages) => {
            let mut working = cluster.clone();
            let mctx = ModuleContext::new(ctx.store.as_ref(), ctx.events.as_ref(), &mut working);
            for stage in stages {
                // Leaves publish their own failure events
                stage.delete(&mctx).await?;
                mctx.publish(
                    EventType::Normal,
                    reasons::STAGE_DELETED,
                    actions::DELETE,
                    format!("Stage {} deleted", stage.name()),
                )
                .await;
            }
        }
        None => {
            warn!(
                version = cluster.version(),
                "No pipeline registered for version, releasing finalizer"
            );
        }
    }

    remove_finalizer(ctx.store.as_ref(), cluster, FINALIZER).await?;
    if let Some(state) = &ctx.health_state {
        state
            .metrics
            .forget_cluster(&cluster.namespace().unwrap_or_default(), &cluster.name_any());
    }
    Ok(Action::await_change())
}
