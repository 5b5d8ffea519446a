//! Finalizer bookkeeping shared by the Cluster and plugin controllers.
//!
//! Writes go through [`ObjectStore::patch_metadata`] as merge patches that
//! carry the observed `resourceVersion`, so a concurrent edit turns into a
//! conflict and the pass is retried.

use kube::ResourceExt;
use kube::api::DynamicObject;
use serde_json::json;
use tracing::info;

use crate::controller::error::{Error, Result};
use crate::controller::store::{ManagedObject, ObjectStore, api_resource};

/// Check if the finalizer is present
pub fn has_finalizer<K: ManagedObject>(object: &K, finalizer: &str) -> bool {
    object.finalizers().iter().any(|f| f == finalizer)
}

fn key<K: ManagedObject>(object: &K) -> Result<(String, String)> {
    let namespace = object
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    Ok((namespace, object.name_any()))
}

async fn write_finalizers<K: ManagedObject>(
    store: &dyn ObjectStore,
    object: &K,
    finalizers: Vec<String>,
) -> Result<DynamicObject> {
    let (namespace, name) = key(object)?;
    let patch = json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": object.resource_version(),
        }
    });
    store
        .patch_metadata(&api_resource::<K>(), &namespace, &name, &patch)
        .await
}

/// Append the finalizer, keeping any others already present.
///
/// Returns the patched object, or `None` when nothing had to change.
pub async fn add_finalizer<K: ManagedObject>(
    store: &dyn ObjectStore,
    object: &K,
    finalizer: &str,
) -> Result<Option<DynamicObject>> {
    if has_finalizer(object, finalizer) {
        return Ok(None);
    }
    let mut finalizers = object.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    let patched = write_finalizers(store, object, finalizers).await?;
    info!(name = %object.name_any(), finalizer, "Added finalizer");
    Ok(Some(patched))
}

/// Drop the finalizer so the garbage collector can remove the object
pub async fn remove_finalizer<K: ManagedObject>(
    store: &dyn ObjectStore,
    object: &K,
    finalizer: &str,
) -> Result<()> {
    if !has_finalizer(object, finalizer) {
        return Ok(());
    }
    let finalizers = object
        .finalizers()
        .iter()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect();
    write_finalizers(store, object, finalizers).await?;
    info!(name = %object.name_any(), finalizer, "Removed finalizer");
    Ok(())
}
