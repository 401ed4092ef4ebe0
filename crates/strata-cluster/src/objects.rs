//! Builder for untyped Kubernetes objects
//!
//! Generated CAPI objects are plain JSON, so they are assembled as
//! `DynamicObject`s and go through the store exactly like manifests parsed
//! from YAML.

use std::collections::BTreeMap;

use kube::api::{DynamicObject, ObjectMeta, TypeMeta};
use serde_json::Value;
use tracing::debug;

use strata_common::kinds::ObjectKind;
use strata_common::kube_utils::{object_kind, object_name, object_namespace};
use strata_common::store::{ApplyOptions, ResourceStore};
use strata_common::{Error, CLUSTER_NAME_LABEL};

/// Label recording which controller generated an object
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Builder producing a `DynamicObject`
#[derive(Clone, Debug)]
pub struct ObjectBuilder {
    api_version: String,
    kind: String,
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
    data: serde_json::Map<String, Value>,
}

impl ObjectBuilder {
    /// Start an object of an arbitrary apiVersion/kind
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            data: serde_json::Map::new(),
        }
    }

    /// Start an object of a known kind
    pub fn of(kind: ObjectKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new(kind.api_version(), kind.kind_str(), name, namespace)
    }

    /// Add the cluster-name and managed-by labels
    pub fn for_cluster(self, cluster_name: &str) -> Self {
        self.with_label(CLUSTER_NAME_LABEL, cluster_name)
            .with_label(MANAGED_BY_LABEL, "strata")
    }

    /// Add one label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set the object's spec
    pub fn with_spec(self, spec: Value) -> Self {
        self.with_field("spec", spec)
    }

    /// Set a top-level field (spec, status, data, ...)
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Finish the object
    pub fn build(self) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: self.api_version,
                kind: self.kind,
            }),
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: (!self.namespace.is_empty()).then_some(self.namespace),
                labels: (!self.labels.is_empty()).then_some(self.labels),
                ..Default::default()
            },
            data: Value::Object(self.data),
        }
    }
}

/// Server-side apply objects one after another.
///
/// Stops at the first failure; objects applied before it stay applied.
pub async fn apply_batch<'a>(
    store: &dyn ResourceStore,
    objects: impl IntoIterator<Item = &'a DynamicObject>,
    options: &ApplyOptions,
) -> Result<usize, Error> {
    let mut applied = 0;
    for obj in objects {
        store.apply_server_side(obj, options).await?;
        debug!(
            kind = object_kind(obj),
            name = object_name(obj),
            namespace = object_namespace(obj),
            "applied"
        );
        applied += 1;
    }
    Ok(applied)
}
