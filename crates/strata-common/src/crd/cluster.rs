//! Cluster Custom Resource Definition
//!
//! The Cluster CRD is the user-facing declaration of a Kubernetes cluster.
//! Strata reconciles it into Cluster API objects and CNI workloads.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    Condition, ClusterNetwork, ControlPlaneConfiguration, ExternalEtcdConfiguration, Ref,
    WorkerNodeGroupConfiguration,
};

/// Desired state of a Cluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters",
    status = "ClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"K8s","type":"string","jsonPath":".spec.kubernetesVersion"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Kubernetes minor version (e.g., "1.31")
    pub kubernetes_version: String,

    /// Control plane topology
    pub control_plane_configuration: ControlPlaneConfiguration,

    /// External etcd topology; `None` means stacked etcd on control plane nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_etcd_configuration: Option<ExternalEtcdConfiguration>,

    /// Worker node groups
    #[serde(default)]
    pub worker_node_group_configurations: Vec<WorkerNodeGroupConfiguration>,

    /// Networking and CNI
    #[serde(default)]
    pub cluster_network: ClusterNetwork,

    /// Provider datacenter config; its kind selects the provider reconciler
    pub datacenter_ref: Ref,

    /// Name of the VersionsBundle pinning component images
    pub bundle_ref: String,
}

/// Observed state of a Cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Readiness conditions, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation of the spec last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Message for a terminal, human-actionable failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl ClusterSpec {
    /// Validate the parts of the spec the reconciler depends on
    pub fn validate(&self, cluster: &str) -> Result<(), crate::Error> {
        if self.control_plane_configuration.count == 0 {
            return Err(crate::Error::validation_for_field(
                cluster,
                "spec.controlPlaneConfiguration.count",
                "control plane count must be at least 1",
            ));
        }

        if self.datacenter_ref.kind.is_empty() || self.datacenter_ref.name.is_empty() {
            return Err(crate::Error::validation_for_field(
                cluster,
                "spec.datacenterRef",
                "datacenter reference requires kind and name",
            ));
        }

        if self.bundle_ref.is_empty() {
            return Err(crate::Error::validation_for_field(
                cluster,
                "spec.bundleRef",
                "bundle reference cannot be empty",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for group in &self.worker_node_group_configurations {
            if group.name.is_empty() {
                return Err(crate::Error::validation_for_field(
                    cluster,
                    "spec.workerNodeGroupConfigurations",
                    "worker node group name cannot be empty",
                ));
            }
            if !seen.insert(group.name.as_str()) {
                return Err(crate::Error::validation_for_field(
                    cluster,
                    "spec.workerNodeGroupConfigurations",
                    format!("duplicate worker node group name '{}'", group.name),
                ));
            }
        }

        Ok(())
    }

    /// Returns true when etcd runs on its own machines
    pub fn has_external_etcd(&self) -> bool {
        self.external_etcd_configuration.is_some()
    }

    /// Returns true when Cilium is the configured CNI
    pub fn uses_cilium(&self) -> bool {
        self.cluster_network.cni_config.cilium.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::types::CniConfig;

    fn sample_spec() -> ClusterSpec {
        ClusterSpec {
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
                labels: Default::default(),
            }],
            cluster_network: ClusterNetwork {
                cni_config: CniConfig {
                    cilium: Some(Default::default()),
                },
                ..Default::default()
            },
            datacenter_ref: Ref {
                kind: "DockerDatacenterConfig".to_string(),
                name: "dev".to_string(),
            },
            bundle_ref: "bundle-1".to_string(),
        }
    }

    #[test]
    fn test_valid_spec_passes() {
        assert!(sample_spec().validate("dev").is_ok());
    }

    #[test]
    fn test_zero_control_plane_rejected() {
        let mut spec = sample_spec();
        spec.control_plane_configuration.count = 0;
        let err = spec.validate("dev").unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_duplicate_worker_groups_rejected() {
        let mut spec = sample_spec();
        let dup = spec.worker_node_group_configurations[0].clone();
        spec.worker_node_group_configurations.push(dup);
        let err = spec.validate("dev").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_missing_datacenter_ref_rejected() {
        let mut spec = sample_spec();
        spec.datacenter_ref.kind.clear();
        assert!(spec.validate("dev").is_err());
    }

    #[test]
    fn test_spec_round_trips_camel_case() {
        let value = serde_json::to_value(sample_spec()).unwrap();
        assert_eq!(value["kubernetesVersion"], "1.31");
        assert_eq!(value["controlPlaneConfiguration"]["count"], 3);
        assert!(value.get("externalEtcdConfiguration").is_none());
    }

    #[test]
    fn test_topology_helpers() {
        let mut spec = sample_spec();
        assert!(!spec.has_external_etcd());
        assert!(spec.uses_cilium());
        spec.external_etcd_configuration = Some(ExternalEtcdConfiguration { count: 3 });
        assert!(spec.has_external_etcd());
    }
}
