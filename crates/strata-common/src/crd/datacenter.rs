//! Provider datacenter configuration CRDs
//!
//! A cluster's `datacenterRef.kind` names one of these kinds and doubles as
//! the key that selects the provider reconciler.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kind string for [`DockerDatacenterConfig`]
pub const DOCKER_DATACENTER_KIND: &str = "DockerDatacenterConfig";

/// Docker datacenter settings (local development provider)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "DockerDatacenterConfig",
    plural = "dockerdatacenterconfigs",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DockerDatacenterConfigSpec {
    /// Mount the host docker socket into nodes
    #[serde(default)]
    pub mount_docker_socket: bool,
}
