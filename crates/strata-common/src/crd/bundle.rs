//! VersionsBundle Custom Resource Definition
//!
//! Pins every component image for a Kubernetes version so that a cluster's
//! desired state is fully determined by its spec plus one bundle.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Image;

/// Component images for one Kubernetes release
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "VersionsBundle",
    plural = "versionsbundles",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VersionsBundleSpec {
    /// Full Kubernetes version (e.g., "v1.31.2")
    pub kubernetes_version: String,

    /// kind node image used by the docker provider
    pub kind_node: Image,

    /// etcd image for external etcd machines
    pub etcd: Image,

    /// Cilium images
    pub cilium: CiliumBundle,
}

/// Cilium component images
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CiliumBundle {
    /// Agent image (DaemonSet)
    pub cilium: Image,
    /// Operator image (Deployment)
    pub operator: Image,
    /// Chart version used by the templater
    #[serde(default)]
    pub version: String,
}
