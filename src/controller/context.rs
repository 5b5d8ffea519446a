use std::sync::Arc;

use kube::Client;

use crate::controller::error::RetryPolicy;
use crate::controller::events::{CONTROLLER_NAME, EventPublisher, KubeEventPublisher};
use crate::controller::registry::Registry;
use crate::controller::store::{KubeObjectStore, ObjectStore};
use crate::health::HealthState;

/// Shared context for the Cluster and plugin controllers
#[derive(Clone)]
pub struct Context {
    /// Managed-object adapter
    pub store: Arc<dyn ObjectStore>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Version -> stage pipeline table, built once at startup
    pub registry: Arc<Registry>,
    /// Fixed-delay requeue for transient failures
    pub retry: RetryPolicy,
    /// Metrics, when the health server is running
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(
        client: Client,
        registry: Arc<Registry>,
        retry: RetryPolicy,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            store: Arc::new(KubeObjectStore::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            registry,
            retry,
            health_state,
        }
    }

    /// Context over arbitrary collaborators; used to drive passes without an API server
    pub fn from_parts(
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventPublisher>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            store,
            events,
            registry,
            retry: RetryPolicy::default(),
            health_state: None,
        }
    }
}
