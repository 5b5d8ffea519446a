//! Kubernetes Event recording.
//!
//! Events are fire-and-forget: a failed publish is logged and never fails a
//! reconciliation pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Reporting component shown on every Event
pub const CONTROLLER_NAME: &str = "kok-operator";

/// Publishes Events about a resource
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops every Event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    pub const CREATING: &str = "Creating";
    pub const CREATE_ERROR: &str = "CreateError";
    pub const UPDATING: &str = "Updating";
    pub const RECONCILE_ERROR: &str = "ReconcileError";
    pub const STAGE_READY: &str = "StageReady";
    pub const STAGE_DELETED: &str = "StageDeleted";
    pub const MODULE_DELETE_ERROR: &str = "ModuleDeleteError";
    pub const UNSUPPORTED_VERSION: &str = "UnsupportedVersion";
    pub const CREATE_POD: &str = "CreatePod";
    pub const PHASE_ERROR: &str = "PhaseError";
    pub const PODS_DELETED: &str = "PodsDeleted";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const CREATE: &str = "Create";
    pub const UPDATE: &str = "Update";
    pub const DELETE: &str = "Delete";
}
