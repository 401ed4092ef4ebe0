//! Resource store abstraction
//!
//! Reconcilers never talk to `kube::Client` directly. They go through the
//! [`ResourceStore`] trait so every read and write is wrapped with the same
//! error context, and so tests can substitute an in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::{debug, info};

use crate::kinds::KindRegistry;
use crate::kube_utils::{is_not_found, object_name, object_namespace, object_type};
use crate::Error;

/// Options for server-side apply
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Field manager that owns the applied fields
    pub field_manager: String,
    /// Take ownership of fields held by other managers on conflict
    pub force_ownership: bool,
}

impl ApplyOptions {
    /// Apply as `field_manager`, forcing ownership
    pub fn forced(field_manager: impl Into<String>) -> Self {
        Self {
            field_manager: field_manager.into(),
            force_ownership: true,
        }
    }

    fn patch_params(&self) -> PatchParams {
        let params = PatchParams::apply(&self.field_manager);
        if self.force_ownership {
            params.force()
        } else {
            params
        }
    }
}

/// Trait abstracting the declarative object backend
///
/// Kinds are identified by `ApiResource`. An empty namespace addresses a
/// cluster-scoped object.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get an object; `Ok(None)` if it does not exist
    async fn get(
        &self,
        kind: &ApiResource,
        name: &str,
        namespace: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// List objects, optionally scoped to a namespace and an equality label selector
    async fn list(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, Error>;

    /// Create an object; fails if it already exists
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, Error>;

    /// Replace an object; fails on resourceVersion conflict
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, Error>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete(&self, kind: &ApiResource, name: &str, namespace: &str) -> Result<(), Error>;

    /// Delete every object of a kind matching a label selector in a namespace
    async fn delete_all_matching(
        &self,
        kind: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<(), Error>;

    /// Create-or-patch an object with server-side apply
    async fn apply_server_side(
        &self,
        obj: &DynamicObject,
        options: &ApplyOptions,
    ) -> Result<(), Error>;

    /// Merge-patch the status subresource of an object
    async fn patch_status(
        &self,
        kind: &ApiResource,
        name: &str,
        namespace: &str,
        status: &serde_json::Value,
    ) -> Result<(), Error>;
}

/// Real store implementation backed by a kube-rs `Client`
pub struct KubeStore {
    client: Client,
    kinds: Arc<KindRegistry>,
}

impl KubeStore {
    /// Create a store using `kinds` to resolve object types
    pub fn new(client: Client, kinds: Arc<KindRegistry>) -> Self {
        Self { client, kinds }
    }

    fn api(&self, kind: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        if namespace.is_empty() {
            Api::all_with(self.client.clone(), kind)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, kind)
        }
    }

    fn api_for_object(&self, obj: &DynamicObject) -> Result<(Api<DynamicObject>, ApiResource), Error> {
        let (api_version, kind) = object_type(obj)?;
        let ar = self.kinds.resolve(api_version, kind);
        Ok((self.api(&ar, object_namespace(obj)), ar))
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(
        &self,
        kind: &ApiResource,
        name: &str,
        namespace: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        match self.api(kind, namespace).get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::store("get", &kind.kind, name, namespace, e)),
        }
    }

    async fn list(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, Error> {
        let namespace = namespace.unwrap_or_default();
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }

        let list = self
            .api(kind, namespace)
            .list(&params)
            .await
            .map_err(|e| Error::store("list", &kind.kind, "", namespace, e))?;
        Ok(list.items)
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let (api, ar) = self.api_for_object(obj)?;
        api.create(&PostParams::default(), obj).await.map_err(|e| {
            Error::store("create", &ar.kind, object_name(obj), object_namespace(obj), e)
        })
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let (api, ar) = self.api_for_object(obj)?;
        let name = object_name(obj);
        api.replace(name, &PostParams::default(), obj)
            .await
            .map_err(|e| Error::store("update", &ar.kind, name, object_namespace(obj), e))
    }

    async fn delete(&self, kind: &ApiResource, name: &str, namespace: &str) -> Result<(), Error> {
        match self
            .api(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!(kind = %kind.kind, name, namespace, "deleted object");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::store("delete", &kind.kind, name, namespace, e)),
        }
    }

    async fn delete_all_matching(
        &self,
        kind: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<(), Error> {
        self.api(kind, namespace)
            .delete_collection(
                &DeleteParams::default(),
                &ListParams::default().labels(label_selector),
            )
            .await
            .map_err(|e| Error::store("delete collection", &kind.kind, label_selector, namespace, e))?;
        Ok(())
    }

    async fn apply_server_side(
        &self,
        obj: &DynamicObject,
        options: &ApplyOptions,
    ) -> Result<(), Error> {
        let (api, ar) = self.api_for_object(obj)?;
        let name = object_name(obj);
        let namespace = object_namespace(obj);

        api.patch(name, &options.patch_params(), &Patch::Apply(obj))
            .await
            .map_err(|e| Error::store("apply", &ar.kind, name, namespace, e))?;

        debug!(kind = %ar.kind, name, namespace, "applied object");
        Ok(())
    }

    async fn patch_status(
        &self,
        kind: &ApiResource,
        name: &str,
        namespace: &str,
        status: &serde_json::Value,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "status": status });
        self.api(kind, namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::store("patch status", &kind.kind, name, namespace, e))?;
        Ok(())
    }
}

/// Fetch an object and deserialize it into a typed resource
pub async fn get_typed<K>(
    store: &dyn ResourceStore,
    kind: &ApiResource,
    name: &str,
    namespace: &str,
) -> Result<Option<K>, Error>
where
    K: kube::Resource + serde::de::DeserializeOwned,
{
    let Some(obj) = store.get(kind, name, namespace).await? else {
        return Ok(None);
    };
    obj.try_parse::<K>()
        .map(Some)
        .map_err(|e| Error::serialization_for_kind(&kind.kind, format!("{}/{}: {}", namespace, name, e)))
}
