//! Live view of a Cilium installation

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::PodSpec;

use strata_common::kinds::ObjectKind;
use strata_common::store::{get_typed, ResourceStore};
use strata_common::{Error, CNI_NAMESPACE};

/// Name of the Cilium agent DaemonSet
pub const CILIUM_DAEMON_SET: &str = "cilium";
/// Name of the Cilium operator Deployment
pub const CILIUM_OPERATOR: &str = "cilium-operator";
/// Name shared by the preflight DaemonSet and Deployment
pub const CILIUM_PREFLIGHT: &str = "cilium-pre-flight-check";

/// The Cilium workloads currently in the cluster
#[derive(Clone, Debug, Default)]
pub struct CiliumInstallation {
    /// Agent DaemonSet
    pub daemon_set: Option<DaemonSet>,
    /// Operator Deployment
    pub operator: Option<Deployment>,
    /// Preflight DaemonSet, present only during an upgrade
    pub preflight_daemon_set: Option<DaemonSet>,
    /// Preflight Deployment, present only during an upgrade
    pub preflight_deployment: Option<Deployment>,
}

impl CiliumInstallation {
    /// Read every Cilium workload from the store
    pub async fn load(store: &dyn ResourceStore) -> Result<Self, Error> {
        let daemon_sets = ObjectKind::DaemonSet.api_resource();
        let deployments = ObjectKind::Deployment.api_resource();

        Ok(Self {
            daemon_set: get_typed(store, &daemon_sets, CILIUM_DAEMON_SET, CNI_NAMESPACE).await?,
            operator: get_typed(store, &deployments, CILIUM_OPERATOR, CNI_NAMESPACE).await?,
            preflight_daemon_set: get_typed(store, &daemon_sets, CILIUM_PREFLIGHT, CNI_NAMESPACE)
                .await?,
            preflight_deployment: get_typed(store, &deployments, CILIUM_PREFLIGHT, CNI_NAMESPACE)
                .await?,
        })
    }

    /// Agent and operator both exist
    pub fn is_installed(&self) -> bool {
        self.daemon_set.is_some() && self.operator.is_some()
    }

    /// Any preflight object exists
    pub fn has_preflight(&self) -> bool {
        self.preflight_daemon_set.is_some() || self.preflight_deployment.is_some()
    }

    /// Image of the agent container
    pub fn agent_image(&self) -> Option<&str> {
        self.daemon_set
            .as_ref()
            .and_then(|ds| ds.spec.as_ref())
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|pod| container_image(pod, "cilium-agent"))
    }

    /// Image of the operator container
    pub fn operator_image(&self) -> Option<&str> {
        self.operator
            .as_ref()
            .and_then(|d| d.spec.as_ref())
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|pod| container_image(pod, "cilium-operator"))
    }

    /// Both preflight objects exist and have finished rolling out.
    ///
    /// The preflight DaemonSet must have as many ready pods as the live agent
    /// DaemonSet, both observed at their current generation, and the
    /// preflight Deployment must be observed with every replica ready.
    pub fn preflight_ready(&self) -> bool {
        let (Some(live), Some(preflight), Some(deployment)) = (
            self.daemon_set.as_ref(),
            self.preflight_daemon_set.as_ref(),
            self.preflight_deployment.as_ref(),
        ) else {
            return false;
        };

        daemon_set_ready(live)
            && daemon_set_ready(preflight)
            && number_ready(preflight) == number_ready(live)
            && deployment_ready(deployment)
    }
}

/// Image of the named container, or of the first container if none matches
fn container_image<'a>(pod: &'a PodSpec, name: &str) -> Option<&'a str> {
    pod.containers
        .iter()
        .find(|c| c.name == name)
        .or_else(|| pod.containers.first())
        .and_then(|c| c.image.as_deref())
}

fn number_ready(ds: &DaemonSet) -> i32 {
    ds.status.as_ref().map(|s| s.number_ready).unwrap_or(0)
}

/// The DaemonSet controller has observed the current generation
pub fn daemon_set_ready(ds: &DaemonSet) -> bool {
    let observed = ds.status.as_ref().and_then(|s| s.observed_generation);
    ds.metadata.generation.is_some() && observed == ds.metadata.generation
}

/// The Deployment is observed at its current generation with all replicas ready
pub fn deployment_ready(deployment: &Deployment) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };
    let observed = deployment.metadata.generation.is_some()
        && status.observed_generation == deployment.metadata.generation;
    let replicas = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    observed && status.ready_replicas.unwrap_or(0) == replicas
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn daemon_set(generation: i64, observed: i64, ready: i32) -> DaemonSet {
        serde_json::from_value(json!({
            "metadata": {"name": "cilium", "namespace": "kube-system", "generation": generation},
            "spec": {
                "selector": {},
                "template": {"spec": {"containers": [
                    {"name": "cilium-agent", "image": "quay.io/cilium/cilium:v1.13.9"}
                ]}}
            },
            "status": {
                "observedGeneration": observed,
                "numberReady": ready,
                "desiredNumberScheduled": ready,
                "currentNumberScheduled": ready,
                "numberMisscheduled": 0
            }
        }))
        .unwrap()
    }

    fn deployment(replicas: i32, ready: i32) -> Deployment {
        serde_json::from_value(json!({
            "metadata": {"name": "cilium-pre-flight-check", "generation": 1},
            "spec": {
                "replicas": replicas,
                "selector": {},
                "template": {"spec": {"containers": [{"name": "cilium-pre-flight-check"}]}}
            },
            "status": {"observedGeneration": 1, "readyReplicas": ready}
        }))
        .unwrap()
    }

    #[test]
    fn test_daemon_set_ready_requires_observed_generation() {
        assert!(daemon_set_ready(&daemon_set(2, 2, 3)));
        assert!(!daemon_set_ready(&daemon_set(2, 1, 3)));
    }

    #[test]
    fn test_deployment_ready_requires_all_replicas() {
        assert!(deployment_ready(&deployment(1, 1)));
        assert!(!deployment_ready(&deployment(2, 1)));
    }

    #[test]
    fn test_preflight_ready_matches_agent_ready_count() {
        let mut installation = CiliumInstallation {
            daemon_set: Some(daemon_set(1, 1, 3)),
            preflight_daemon_set: Some(daemon_set(1, 1, 2)),
            preflight_deployment: Some(deployment(1, 1)),
            ..Default::default()
        };
        assert!(!installation.preflight_ready());

        installation.preflight_daemon_set = Some(daemon_set(1, 1, 3));
        assert!(installation.preflight_ready());

        installation.preflight_deployment = None;
        assert!(!installation.preflight_ready());
    }

    #[test]
    fn test_agent_image() {
        let installation = CiliumInstallation {
            daemon_set: Some(daemon_set(1, 1, 1)),
            ..Default::default()
        };
        assert_eq!(
            installation.agent_image(),
            Some("quay.io/cilium/cilium:v1.13.9")
        );
        assert!(!installation.is_installed());
        assert!(!installation.has_preflight());
    }
}
