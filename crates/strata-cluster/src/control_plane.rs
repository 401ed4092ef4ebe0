//! Control plane rollout
//!
//! Stacked etcd clusters apply the control plane objects in one batch. With
//! external etcd the etcd machines have to be upgraded before the control
//! plane, so when the desired etcd spec differs from the live one the etcd
//! cluster is marked as upgrading and the control plane is paused until the
//! etcdadm controller finishes.

use std::sync::Arc;

use kube::api::DynamicObject;
use serde_json::Value;
use tracing::{debug, info, instrument};

use strata_common::kinds::{ObjectKind, ETCD_API_VERSION};
use strata_common::kube_utils::{
    build_api_resource, object_name, object_namespace, object_spec, set_annotation,
};
use strata_common::store::{ApplyOptions, ResourceStore};
use strata_common::{Error, ETCD_UPGRADING_ANNOTATION, PAUSED_ANNOTATION};

use crate::naming::is_derivative;
use crate::objects::apply_batch;

/// Every object making up a cluster's control plane
#[derive(Clone, Debug)]
pub struct ControlPlaneObjectSet {
    /// CAPI Cluster
    pub cluster: DynamicObject,
    /// Provider infrastructure cluster (DockerCluster, ...)
    pub infra_cluster: DynamicObject,
    /// KubeadmControlPlane
    pub control_plane: DynamicObject,
    /// Machine template referenced by the control plane
    pub control_plane_machine_template: DynamicObject,
    /// EtcdadmCluster, only with external etcd
    pub etcd_cluster: Option<DynamicObject>,
    /// Machine template referenced by the etcd cluster
    pub etcd_machine_template: Option<DynamicObject>,
    /// Anything else applied alongside (secrets, config maps)
    pub other: Vec<DynamicObject>,
}

impl ControlPlaneObjectSet {
    /// Namespace of the set, taken from the CAPI Cluster
    pub fn namespace(&self) -> &str {
        object_namespace(&self.cluster)
    }

    /// Objects in apply order: templates before the objects referencing them
    pub fn objects(&self) -> Vec<&DynamicObject> {
        let mut objects = vec![&self.cluster, &self.infra_cluster];
        objects.extend(self.etcd_machine_template.iter());
        objects.extend(self.etcd_cluster.iter());
        objects.push(&self.control_plane_machine_template);
        objects.push(&self.control_plane);
        objects.extend(self.other.iter());
        objects
    }

    /// Every object must live in the cluster's namespace
    pub fn validate(&self) -> Result<(), Error> {
        let namespace = self.namespace();
        if namespace.is_empty() {
            return Err(Error::validation_for_field(
                object_name(&self.cluster),
                "metadata.namespace",
                "control plane objects must be namespaced",
            ));
        }
        for obj in self.objects() {
            if object_namespace(obj) != namespace {
                return Err(Error::validation_for_field(
                    object_name(&self.cluster),
                    "metadata.namespace",
                    format!(
                        "{} is in namespace '{}', expected '{}'",
                        object_name(obj),
                        object_namespace(obj),
                        namespace
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Applies control plane objects, coordinating external etcd upgrades
pub struct ControlPlaneOrchestrator {
    store: Arc<dyn ResourceStore>,
    apply: ApplyOptions,
}

impl ControlPlaneOrchestrator {
    /// Create an orchestrator writing through `store`
    pub fn new(store: Arc<dyn ResourceStore>, apply: ApplyOptions) -> Self {
        Self { store, apply }
    }

    /// Apply the control plane.
    ///
    /// Read failures other than not-found and apply failures abort the call;
    /// objects applied before the failure are not rolled back.
    #[instrument(skip(self, objects), fields(cluster = object_name(&objects.cluster)))]
    pub async fn reconcile(&self, objects: ControlPlaneObjectSet) -> Result<(), Error> {
        objects.validate()?;

        let objects = if objects.etcd_cluster.is_some() {
            self.prepare_external_etcd(objects).await?
        } else {
            objects
        };

        let applied = apply_batch(self.store.as_ref(), objects.objects(), &self.apply).await?;
        debug!(applied, "control plane objects applied");
        Ok(())
    }

    async fn prepare_external_etcd(
        &self,
        mut objects: ControlPlaneObjectSet,
    ) -> Result<ControlPlaneObjectSet, Error> {
        let name = object_name(&objects.cluster);
        let namespace = objects.namespace();

        let Some(live_cluster) = self
            .store
            .get(&ObjectKind::CapiCluster.api_resource(), name, namespace)
            .await?
        else {
            debug!("cluster does not exist yet, applying full control plane");
            return Ok(objects);
        };

        let Some(live_etcd) = self.live_etcd(&live_cluster).await? else {
            debug!("live cluster has no external etcd, applying full control plane");
            return Ok(objects);
        };

        let Some(desired_etcd) = objects.etcd_cluster.as_mut() else {
            return Ok(objects);
        };
        if is_derivative(object_spec(desired_etcd), object_spec(&live_etcd)) {
            return Ok(objects);
        }

        info!(
            etcd = object_name(desired_etcd),
            "etcd spec changed, pausing control plane for etcd upgrade"
        );
        set_annotation(desired_etcd, ETCD_UPGRADING_ANNOTATION, "true");
        set_annotation(&mut objects.control_plane, PAUSED_ANNOTATION, "true");
        Ok(objects)
    }

    /// Etcd object referenced by the live cluster's `spec.managedExternalEtcdRef`
    async fn live_etcd(&self, live_cluster: &DynamicObject) -> Result<Option<DynamicObject>, Error> {
        let etcd_ref = &object_spec(live_cluster)["managedExternalEtcdRef"];
        let Some(etcd_name) = etcd_ref["name"].as_str().filter(|n| !n.is_empty()) else {
            return Ok(None);
        };

        let api_version = non_empty(&etcd_ref["apiVersion"]).unwrap_or(ETCD_API_VERSION);
        let kind = non_empty(&etcd_ref["kind"]).unwrap_or(ObjectKind::EtcdadmCluster.kind_str());
        let namespace =
            non_empty(&etcd_ref["namespace"]).unwrap_or_else(|| object_namespace(live_cluster));

        self.store
            .get(&build_api_resource(api_version, kind), etcd_name, namespace)
            .await
    }
}

fn non_empty(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}
