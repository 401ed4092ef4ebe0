//! Worker node group rollout
//!
//! Applies every desired worker object, then deletes MachineDeployments that
//! belong to the cluster but no longer match a desired node group.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use kube::api::DynamicObject;
use tracing::{debug, info, instrument, warn};

use strata_common::kinds::ObjectKind;
use strata_common::kube_utils::object_name;
use strata_common::store::{ApplyOptions, ResourceStore};
use strata_common::{Error, CLUSTER_NAME_LABEL};

use crate::objects::apply_batch;
use crate::phases::ReconcileResult;

/// Objects for one worker node group
#[derive(Clone, Debug)]
pub struct WorkerGroupObjects {
    /// MachineDeployment owning the group's machines
    pub machine_deployment: DynamicObject,
    /// Bootstrap config template (KubeadmConfigTemplate)
    pub bootstrap_config_template: DynamicObject,
    /// Infrastructure machine template (DockerMachineTemplate, ...)
    pub infra_machine_template: DynamicObject,
}

/// Every worker object for a cluster
#[derive(Clone, Debug, Default)]
pub struct WorkerObjectSet {
    /// One entry per worker node group
    pub groups: Vec<WorkerGroupObjects>,
    /// Anything else applied alongside
    pub other: Vec<DynamicObject>,
}

impl WorkerObjectSet {
    /// Names of the MachineDeployments that should exist
    pub fn desired_deployment_names(&self) -> BTreeSet<&str> {
        self.groups
            .iter()
            .map(|g| object_name(&g.machine_deployment))
            .collect()
    }

    /// Objects in apply order: templates before the deployment using them
    pub fn objects(&self) -> impl Iterator<Item = &DynamicObject> {
        self.groups
            .iter()
            .flat_map(|g| {
                [
                    &g.bootstrap_config_template,
                    &g.infra_machine_template,
                    &g.machine_deployment,
                ]
            })
            .chain(self.other.iter())
    }
}

/// Applies worker objects and prunes stale MachineDeployments
pub struct WorkerOrchestrator {
    store: Arc<dyn ResourceStore>,
    apply: ApplyOptions,
    requeue: Duration,
}

impl WorkerOrchestrator {
    /// Create an orchestrator; `requeue` is used while the cluster is missing
    pub fn new(store: Arc<dyn ResourceStore>, apply: ApplyOptions, requeue: Duration) -> Self {
        Self {
            store,
            apply,
            requeue,
        }
    }

    /// Reconcile the workers of `cluster` in `namespace`.
    ///
    /// Requeues without error while the CAPI cluster does not exist. Every
    /// stale MachineDeployment is attempted; all deletion failures are
    /// returned together.
    #[instrument(skip(self, workers))]
    pub async fn reconcile(
        &self,
        cluster: &str,
        namespace: &str,
        workers: &WorkerObjectSet,
    ) -> Result<ReconcileResult, Error> {
        let cluster_exists = self
            .store
            .get(&ObjectKind::CapiCluster.api_resource(), cluster, namespace)
            .await?
            .is_some();
        if !cluster_exists {
            debug!("cluster does not exist yet, requeueing workers");
            return Ok(ReconcileResult::RequeueAfter(self.requeue));
        }

        let applied = apply_batch(self.store.as_ref(), workers.objects(), &self.apply).await?;
        debug!(applied, "worker objects applied");

        let machine_deployments = ObjectKind::MachineDeployment.api_resource();
        let selector = format!("{}={}", CLUSTER_NAME_LABEL, cluster);
        let live = self
            .store
            .list(&machine_deployments, Some(namespace), Some(&selector))
            .await?;

        let desired = workers.desired_deployment_names();
        let mut errors = Vec::new();
        for deployment in &live {
            let name = object_name(deployment);
            if desired.contains(name) {
                continue;
            }
            info!(machine_deployment = name, "deleting stale machine deployment");
            if let Err(e) = self.store.delete(&machine_deployments, name, namespace).await {
                warn!(machine_deployment = name, error = %e, "failed to delete machine deployment");
                errors.push(e);
            }
        }

        match Error::aggregate("delete stale machine deployments", errors) {
            Some(err) => Err(err),
            None => Ok(ReconcileResult::Continue),
        }
    }
}
