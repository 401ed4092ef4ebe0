//! In-memory test doubles shared by the engine's unit tests

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::{DynamicObject, ObjectMeta};
use kube::discovery::ApiResource;
use serde_json::{json, Value};

use strata_common::crd::{
    CiliumBundle, CiliumConfig, Cluster, ClusterNetwork, CniConfig, ControlPlaneConfiguration,
    DockerDatacenterConfig, DockerDatacenterConfigSpec, Image, Ref, VersionsBundle,
    VersionsBundleSpec, WorkerNodeGroupConfiguration,
};
use strata_common::kinds::ObjectKind;
use strata_common::kube_utils::{
    matches_label_selector, object_name, object_namespace, object_spec, object_type,
};
use strata_common::store::{ApplyOptions, ResourceStore};
use strata_common::Error;

use crate::spec::ClusterSpec;

type ObjectKey = (String, String, String, String);

fn key(api_version: &str, kind: &str, namespace: &str, name: &str) -> ObjectKey {
    (
        api_version.to_string(),
        kind.to_string(),
        namespace.to_string(),
        name.to_string(),
    )
}

fn object_key(obj: &DynamicObject) -> ObjectKey {
    let (api_version, kind) = object_type(obj).expect("test objects carry types");
    key(api_version, kind, object_namespace(obj), object_name(obj))
}

/// Store that keeps objects in a map and records every write.
///
/// Applying an object whose spec changed bumps `metadata.generation` the way
/// the API server does; status is preserved across applies.
#[derive(Default)]
pub(crate) struct MemoryStore {
    objects: Mutex<BTreeMap<ObjectKey, DynamicObject>>,
    writes: Mutex<Vec<String>>,
    failures: Mutex<HashSet<(String, String)>>,
}

impl MemoryStore {
    /// Seed an object without recording a write
    pub fn insert(&self, mut obj: DynamicObject) {
        obj.metadata.generation.get_or_insert(1);
        self.objects.lock().unwrap().insert(object_key(&obj), obj);
    }

    /// Seed a typed resource
    pub fn insert_typed<K: serde::Serialize>(&self, kind: ObjectKind, resource: &K) {
        let mut value = serde_json::to_value(resource).unwrap();
        value["apiVersion"] = json!(kind.api_version());
        value["kind"] = json!(kind.kind_str());
        self.insert(serde_json::from_value(value).unwrap());
    }

    /// Current copy of an object
    pub fn object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&key(kind.api_version(), kind.kind_str(), namespace, name))
            .cloned()
    }

    /// Names of every stored object of a kind, sorted
    pub fn names(&self, kind: ObjectKind) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(v, k, _, _)| v == kind.api_version() && k == kind.kind_str())
            .map(|(_, _, _, name)| name.clone())
            .collect()
    }

    /// Set the status of a stored object
    pub fn set_status(&self, kind: ObjectKind, namespace: &str, name: &str, status: Value) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(&key(kind.api_version(), kind.kind_str(), namespace, name))
            .expect("object to update exists");
        obj.data["status"] = status;
    }

    /// Every write so far, formatted `"<op> <Kind> <namespace>/<name>"`
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    /// Forget recorded writes
    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    /// Make `operation` fail for objects named `name`
    pub fn fail_on(&self, operation: &str, name: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert((operation.to_string(), name.to_string()));
    }

    fn record(&self, operation: &str, kind: &str, namespace: &str, name: &str) -> Result<(), Error> {
        if self
            .failures
            .lock()
            .unwrap()
            .contains(&(operation.to_string(), name.to_string()))
        {
            return Err(Error::store(operation, kind, name, namespace, "injected failure"));
        }
        self.writes
            .lock()
            .unwrap()
            .push(format!("{} {} {}/{}", operation, kind, namespace, name));
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(
        &self,
        kind: &ApiResource,
        name: &str,
        namespace: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        if self
            .failures
            .lock()
            .unwrap()
            .contains(&("get".to_string(), name.to_string()))
        {
            return Err(Error::store("get", &kind.kind, name, namespace, "injected failure"));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&key(&kind.api_version, &kind.kind, namespace, name))
            .cloned())
    }

    async fn list(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, Error> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((v, k, ns, _), _)| {
                *v == kind.api_version && *k == kind.kind && namespace.is_none_or(|n| n == ns)
            })
            .filter(|(_, obj)| matches_label_selector(obj, label_selector.unwrap_or_default()))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let k = object_key(obj);
        self.record("create", &k.1, &k.2, &k.3)?;
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&k) {
            return Err(Error::store("create", &k.1, &k.3, &k.2, "already exists"));
        }
        let mut created = obj.clone();
        created.metadata.generation = Some(1);
        objects.insert(k, created.clone());
        Ok(created)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let k = object_key(obj);
        self.record("update", &k.1, &k.2, &k.3)?;
        let mut objects = self.objects.lock().unwrap();
        if !objects.contains_key(&k) {
            return Err(Error::store("update", &k.1, &k.3, &k.2, "not found"));
        }
        objects.insert(k, obj.clone());
        Ok(obj.clone())
    }

    async fn delete(&self, kind: &ApiResource, name: &str, namespace: &str) -> Result<(), Error> {
        self.record("delete", &kind.kind, namespace, name)?;
        self.objects
            .lock()
            .unwrap()
            .remove(&key(&kind.api_version, &kind.kind, namespace, name));
        Ok(())
    }

    async fn delete_all_matching(
        &self,
        kind: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<(), Error> {
        let matching = self.list(kind, Some(namespace), Some(label_selector)).await?;
        for obj in matching {
            self.delete(kind, object_name(&obj), namespace).await?;
        }
        Ok(())
    }

    async fn apply_server_side(
        &self,
        obj: &DynamicObject,
        _options: &ApplyOptions,
    ) -> Result<(), Error> {
        let k = object_key(obj);
        self.record("apply", &k.1, &k.2, &k.3)?;

        let mut objects = self.objects.lock().unwrap();
        let mut applied = obj.clone();
        match objects.get(&k) {
            Some(live) => {
                let generation = live.metadata.generation.unwrap_or(1);
                applied.metadata.generation = Some(if object_spec(live) == object_spec(obj) {
                    generation
                } else {
                    generation + 1
                });
                if let Some(status) = live.data.get("status") {
                    applied.data["status"] = status.clone();
                }
            }
            None => applied.metadata.generation = Some(1),
        }
        objects.insert(k, applied);
        Ok(())
    }

    async fn patch_status(
        &self,
        kind: &ApiResource,
        name: &str,
        namespace: &str,
        status: &Value,
    ) -> Result<(), Error> {
        self.record("patch-status", &kind.kind, namespace, name)?;
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(&key(&kind.api_version, &kind.kind, namespace, name))
            .ok_or_else(|| Error::store("patch status", &kind.kind, name, namespace, "not found"))?;
        merge_patch(&mut obj.data["status"], status);
        Ok(())
    }
}

/// JSON merge patch (RFC 7386), as the API server applies status patches
fn merge_patch(target: &mut Value, patch: &Value) {
    if !patch.is_object() {
        *target = patch.clone();
        return;
    }
    if !target.is_object() {
        *target = json!({});
    }
    let map = target.as_object_mut().unwrap();
    for (key, value) in patch.as_object().unwrap() {
        if value.is_null() {
            map.remove(key);
        } else {
            merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
        }
    }
}

fn image(uri: &str, tag: &str) -> Image {
    Image {
        uri: uri.to_string(),
        tag: tag.to_string(),
    }
}

/// Docker cluster "prod" in "eksa-system": 3 control plane nodes, one worker
/// group "md-0" of 2, stacked etcd, Cilium bundle v1.14.2
pub(crate) fn sample_spec() -> ClusterSpec {
    let cluster = Cluster {
        metadata: ObjectMeta {
            name: Some("prod".to_string()),
            namespace: Some("eksa-system".to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: strata_common::crd::ClusterSpec {
            kubernetes_version: "1.31".to_string(),
            control_plane_configuration: ControlPlaneConfiguration {
                count: 3,
                endpoint: None,
                taints: None,
            },
            external_etcd_configuration: None,
            worker_node_group_configurations: vec![WorkerNodeGroupConfiguration {
                name: "md-0".to_string(),
                count: 2,
                taints: Vec::new(),
                labels: BTreeMap::new(),
            }],
            cluster_network: ClusterNetwork {
                pod_cidrs: vec!["192.168.0.0/16".to_string()],
                service_cidrs: vec!["10.96.0.0/12".to_string()],
                cni_config: CniConfig {
                    cilium: Some(CiliumConfig::default()),
                },
            },
            datacenter_ref: Ref {
                kind: "DockerDatacenterConfig".to_string(),
                name: "dev".to_string(),
            },
            bundle_ref: "bundle-31".to_string(),
        },
        status: None,
    };

    let datacenter = DockerDatacenterConfig::new("dev", DockerDatacenterConfigSpec::default());
    let mut datacenter = serde_json::to_value(datacenter).unwrap();
    datacenter["metadata"]["namespace"] = json!("eksa-system");
    let datacenter: DynamicObject = serde_json::from_value(datacenter).unwrap();

    let mut bundle = VersionsBundle::new(
        "bundle-31",
        VersionsBundleSpec {
            kubernetes_version: "v1.31.2".to_string(),
            kind_node: image("public.ecr.aws/eks-anywhere/kubernetes-sigs/kind/node", "v1.31.2"),
            etcd: image("public.ecr.aws/eks-distro/etcd-io/etcd", "v3.5.15"),
            cilium: CiliumBundle {
                cilium: image("public.ecr.aws/isovalent/cilium", "v1.14.2"),
                operator: image("public.ecr.aws/isovalent/operator-generic", "v1.14.2"),
                version: "v1.14.2".to_string(),
            },
        },
    );
    bundle.metadata.namespace = Some("eksa-system".to_string());

    ClusterSpec::new(cluster, datacenter, bundle)
}

/// Seed the cluster, datacenter config and bundle of `spec`
pub(crate) fn seed_spec(store: &MemoryStore, spec: &ClusterSpec) {
    store.insert_typed(ObjectKind::StrataCluster, &spec.cluster);
    store.insert(spec.datacenter.clone());
    store.insert_typed(ObjectKind::VersionsBundle, &spec.bundle);
}

/// Same as [`sample_spec`] with a 3-node external etcd
pub(crate) fn external_etcd_spec() -> ClusterSpec {
    let mut spec = sample_spec();
    spec.cluster.spec.external_etcd_configuration =
        Some(strata_common::crd::ExternalEtcdConfiguration { count: 3 });
    spec
}

/// Multi-document Cilium manifest with the given agent and operator images
pub(crate) fn cilium_manifest(agent: &str, operator: &str) -> Vec<u8> {
    format!(
        r#"apiVersion: v1
kind: ServiceAccount
metadata:
  name: cilium
  namespace: kube-system
---
apiVersion: apps/v1
kind: DaemonSet
metadata:
  name: cilium
  namespace: kube-system
spec:
  selector:
    matchLabels:
      k8s-app: cilium
  template:
    spec:
      containers:
        - name: cilium-agent
          image: {agent}
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: cilium-operator
  namespace: kube-system
spec:
  replicas: 2
  selector:
    matchLabels:
      name: cilium-operator
  template:
    spec:
      containers:
        - name: cilium-operator
          image: {operator}
"#
    )
    .into_bytes()
}
