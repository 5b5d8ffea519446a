//! Managed-object adapter
//!
//! A uniform create/get/update/delete surface over namespaced objects of any
//! kind, keyed by `ApiResource`, namespace and name. Modules talk to the API
//! server only through this trait so that passes can be driven against an
//! in-memory store in tests.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::controller::error::{Error, Result};

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "kok-operator";

/// Any namespaced, statically typed Kubernetes object the operator manages
pub trait ManagedObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Serialize
    + DeserializeOwned
    + Clone
    + Debug
    + Send
    + Sync
    + 'static
{
}

impl<T> ManagedObject for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Serialize
        + DeserializeOwned
        + Clone
        + Debug
        + Send
        + Sync
        + 'static
{
}

/// Object store abstraction over the Kubernetes API.
///
/// - `get` returns `Ok(None)` on a definitive not-found
/// - `create` treats "already exists" as success
/// - `delete` surfaces not-found as [`Error::NotFound`] so callers can decide to tolerate it
/// - patches are JSON merge patches; a `metadata.resourceVersion` inside the
///   patch makes the write conditional
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<()>;

    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> Result<()>;

    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()>;

    async fn patch_metadata(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject>;

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject>;
}

/// Production store backed by the API server
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

fn object_key(object: &DynamicObject) -> Result<(String, String)> {
    let name = object
        .metadata
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let namespace = object
        .metadata
        .namespace
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    Ok((namespace, name))
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.api(resource, namespace).get_opt(name).await?)
    }

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<()> {
        let (namespace, name) = object_key(object)?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let result = self
            .api(resource, &namespace)
            .create(&params, object)
            .await
            .map_err(Error::from);
        match ignore_already_exists(result)? {
            Some(_) => debug!(kind = %resource.kind, %namespace, %name, "Created object"),
            None => debug!(kind = %resource.kind, %namespace, %name, "Object already exists"),
        }
        Ok(())
    }

    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> Result<()> {
        let (namespace, name) = object_key(object)?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api(resource, &namespace)
            .replace(&name, &params, object)
            .await?;
        debug!(kind = %resource.kind, %namespace, %name, "Replaced object");
        Ok(())
    }

    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        match self
            .api(resource, namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => {
                debug!(kind = %resource.kind, %namespace, %name, "Deleted object");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Err(Error::NotFound(format!(
                "{} {}/{}",
                resource.kind, namespace, name
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_metadata(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject> {
        Ok(self
            .api(resource, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject> {
        Ok(self
            .api(resource, namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }
}

/// `ApiResource` for a statically typed kind
pub fn api_resource<K: ManagedObject>() -> ApiResource {
    ApiResource::erase::<K>(&())
}

/// Convert a typed object into its dynamic form
pub fn to_dynamic<K: ManagedObject>(object: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Convert a dynamic object back into a typed one
pub fn from_dynamic<K: ManagedObject>(object: DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Fetch a typed object; `None` when it does not exist
pub async fn get_typed<K: ManagedObject>(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<Option<K>> {
    match store.get(&api_resource::<K>(), namespace, name).await? {
        Some(object) => Ok(Some(from_dynamic(object)?)),
        None => Ok(None),
    }
}

/// Create a typed object; an existing object of the same name counts as success
pub async fn create_typed<K: ManagedObject>(store: &dyn ObjectStore, object: &K) -> Result<()> {
    store
        .create(&api_resource::<K>(), &to_dynamic(object)?)
        .await
}

/// Replace a typed object
pub async fn update_typed<K: ManagedObject>(store: &dyn ObjectStore, object: &K) -> Result<()> {
    store
        .update(&api_resource::<K>(), &to_dynamic(object)?)
        .await
}

/// Delete an object by name, treating not-found as success
pub async fn delete_ignore_missing(
    store: &dyn ObjectStore,
    resource: &ApiResource,
    namespace: &str,
    name: &str,
) -> Result<()> {
    match store.delete(resource, namespace, name).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!(kind = %resource.kind, %namespace, %name, "Already deleted");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// `None` when a create lost the race to an identical name; every other
/// failure, including other 409s, is returned
fn ignore_already_exists<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_already_exists() => Ok(None),
        Err(e) => Err(e),
    }
}
