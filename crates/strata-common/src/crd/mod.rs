//! Custom Resource Definitions for Strata

mod bundle;
mod cluster;
mod datacenter;
mod types;

pub use bundle::{CiliumBundle, VersionsBundle, VersionsBundleSpec};
pub use cluster::{Cluster, ClusterSpec, ClusterStatus};
pub use datacenter::{DockerDatacenterConfig, DockerDatacenterConfigSpec, DOCKER_DATACENTER_KIND};
pub use types::{
    get_condition, set_condition, CiliumConfig, ClusterNetwork, CniConfig, Condition,
    ConditionSeverity, ConditionStatus, ControlPlaneConfiguration, ExternalEtcdConfiguration,
    Image, Ref, Taint, WorkerNodeGroupConfiguration,
};
