//! Infrastructure providers
//!
//! A provider turns a [`ClusterSpec`] into CAPI objects and drives them
//! through an ordered [`PhaseRunner`](crate::phases::PhaseRunner). The
//! phases here do not depend on the infrastructure and are shared by every
//! provider.

pub mod docker;

pub use docker::{DockerObjects, DockerReconciler};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::Value;
use tracing::debug;

use strata_common::kinds::ObjectKind;
use strata_common::kube_utils::{object_namespace, object_spec};
use strata_common::store::ResourceStore;
use strata_common::Error;

use crate::cilium::CiliumUpgrader;
use crate::conditions::control_plane_ready;
use crate::phases::{Phase, ReconcileResult};
use crate::spec::ClusterSpec;

/// Pointer to the machine template name in a KubeadmControlPlane spec
pub const CONTROL_PLANE_TEMPLATE_REF: &str = "/machineTemplate/infrastructureRef/name";
/// Pointer to the machine template name in an EtcdadmCluster spec
pub const ETCD_TEMPLATE_REF: &str = "/infrastructureTemplate/name";
/// Pointer to the bootstrap template name in a MachineDeployment spec
pub const BOOTSTRAP_TEMPLATE_REF: &str = "/template/spec/bootstrap/configRef/name";
/// Pointer to the machine template name in a MachineDeployment spec
pub const INFRA_TEMPLATE_REF: &str = "/template/spec/infrastructureRef/name";

/// Object of `kind` named at `pointer` in the spec of a live owner.
///
/// Returns `None` when there is no owner or the owner names nothing.
pub async fn referenced_object(
    store: &dyn ResourceStore,
    owner: Option<&DynamicObject>,
    pointer: &str,
    kind: ObjectKind,
) -> Result<Option<DynamicObject>, Error> {
    let Some(owner) = owner else {
        return Ok(None);
    };
    let Some(name) = object_spec(owner)
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
    else {
        return Ok(None);
    };
    store
        .get(&kind.api_resource(), name, object_namespace(owner))
        .await
}

/// Requeues until every control plane machine is updated and ready
pub struct ControlPlaneReadyPhase {
    store: Arc<dyn ResourceStore>,
    requeue: Duration,
}

impl ControlPlaneReadyPhase {
    /// Create the phase, polling every `requeue`
    pub fn new(store: Arc<dyn ResourceStore>, requeue: Duration) -> Self {
        Self { store, requeue }
    }
}

#[async_trait]
impl Phase for ControlPlaneReadyPhase {
    fn name(&self) -> &str {
        "control-plane-ready"
    }

    async fn run(&self, spec: &ClusterSpec) -> Result<ReconcileResult, Error> {
        let desired = spec.config().control_plane_configuration.count;
        let control_plane = self
            .store
            .get(
                &ObjectKind::KubeadmControlPlane.api_resource(),
                spec.name(),
                spec.namespace(),
            )
            .await?;

        match control_plane {
            Some(cp) if control_plane_ready(&cp, desired) => Ok(ReconcileResult::Continue),
            _ => {
                debug!(desired, "control plane not ready, requeueing");
                Ok(ReconcileResult::RequeueAfter(self.requeue))
            }
        }
    }
}

/// Installs or upgrades Cilium when it is the cluster's CNI
pub struct CniPhase {
    upgrader: CiliumUpgrader,
}

impl CniPhase {
    /// Create the phase around an upgrader
    pub fn new(upgrader: CiliumUpgrader) -> Self {
        Self { upgrader }
    }
}

#[async_trait]
impl Phase for CniPhase {
    fn name(&self) -> &str {
        "cni"
    }

    async fn run(&self, spec: &ClusterSpec) -> Result<ReconcileResult, Error> {
        if !spec.config().uses_cilium() {
            debug!("cluster does not use cilium, skipping cni");
            return Ok(ReconcileResult::Continue);
        }
        self.upgrader.reconcile(spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cilium::MockCiliumTemplater;
    use crate::objects::ObjectBuilder;
    use crate::testing::{sample_spec, MemoryStore};
    use serde_json::json;
    use strata_common::store::ApplyOptions;

    const NS: &str = "eksa-system";

    fn control_plane(ready: i64) -> DynamicObject {
        let mut cp = ObjectBuilder::of(ObjectKind::KubeadmControlPlane, "prod", NS)
            .with_spec(json!({
                "replicas": 3,
                "machineTemplate": {"infrastructureRef": {"name": "prod-control-plane-2"}}
            }))
            .build();
        cp.data["status"] = json!({"replicas": 3, "updatedReplicas": 3, "readyReplicas": ready});
        cp
    }

    #[tokio::test]
    async fn test_referenced_object_follows_owner_pointer() {
        let store = MemoryStore::default();
        let owner = control_plane(3);
        store.insert(
            ObjectBuilder::of(ObjectKind::DockerMachineTemplate, "prod-control-plane-2", NS)
                .build(),
        );

        let found = referenced_object(
            &store,
            Some(&owner),
            CONTROL_PLANE_TEMPLATE_REF,
            ObjectKind::DockerMachineTemplate,
        )
        .await
        .unwrap();
        assert_eq!(
            found.unwrap().metadata.name.as_deref(),
            Some("prod-control-plane-2")
        );

        let missing = referenced_object(
            &store,
            Some(&owner),
            ETCD_TEMPLATE_REF,
            ObjectKind::DockerMachineTemplate,
        )
        .await
        .unwrap();
        assert!(missing.is_none());

        let no_owner = referenced_object(
            &store,
            None,
            CONTROL_PLANE_TEMPLATE_REF,
            ObjectKind::DockerMachineTemplate,
        )
        .await
        .unwrap();
        assert!(no_owner.is_none());
    }

    #[tokio::test]
    async fn test_control_plane_ready_phase_requeues_until_all_ready() {
        let store = Arc::new(MemoryStore::default());
        let phase = ControlPlaneReadyPhase::new(store.clone(), Duration::from_secs(30));
        let spec = sample_spec();

        assert_eq!(
            phase.run(&spec).await.unwrap(),
            ReconcileResult::RequeueAfter(Duration::from_secs(30))
        );

        store.insert(control_plane(2));
        assert_eq!(
            phase.run(&spec).await.unwrap(),
            ReconcileResult::RequeueAfter(Duration::from_secs(30))
        );

        store.insert(control_plane(3));
        assert_eq!(phase.run(&spec).await.unwrap(), ReconcileResult::Continue);
    }

    #[tokio::test]
    async fn test_cni_phase_skips_clusters_without_cilium() {
        let store = Arc::new(MemoryStore::default());
        let phase = CniPhase::new(CiliumUpgrader::new(
            store.clone(),
            Arc::new(MockCiliumTemplater::new()),
            ApplyOptions::forced("strata-controller"),
            Duration::from_secs(10),
        ));

        let mut spec = sample_spec();
        spec.cluster.spec.cluster_network.cni_config.cilium = None;

        assert_eq!(phase.run(&spec).await.unwrap(), ReconcileResult::Continue);
        assert!(store.writes().is_empty());
    }
}
