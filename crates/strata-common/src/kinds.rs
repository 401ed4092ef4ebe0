//! Object-kind registry
//!
//! The store works on untyped `DynamicObject`s, so it needs to map an
//! apiVersion/kind pair to an `ApiResource` (group, version, plural). The
//! registry is built once at startup with every kind the reconcilers touch
//! and shared read-only via `Arc<KindRegistry>`.

use std::collections::HashMap;

use kube::discovery::ApiResource;
use tracing::debug;

use crate::kube_utils::build_api_resource;

/// CAPI core API version
pub const CAPI_API_VERSION: &str = "cluster.x-k8s.io/v1beta1";
/// CAPI control plane API version (KubeadmControlPlane)
pub const CONTROL_PLANE_API_VERSION: &str = "controlplane.cluster.x-k8s.io/v1beta1";
/// CAPI bootstrap API version (KubeadmConfigTemplate)
pub const BOOTSTRAP_API_VERSION: &str = "bootstrap.cluster.x-k8s.io/v1beta1";
/// CAPI infrastructure API version (Docker provider)
pub const INFRASTRUCTURE_API_VERSION: &str = "infrastructure.cluster.x-k8s.io/v1beta1";
/// etcdadm cluster API version
pub const ETCD_API_VERSION: &str = "etcdcluster.cluster.x-k8s.io/v1beta1";
/// Strata CRD API version
pub const STRATA_API_VERSION: &str = "strata.dev/v1alpha1";

/// Object kinds the Strata reconcilers read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// CAPI Cluster (cluster.x-k8s.io)
    CapiCluster,
    /// KubeadmControlPlane (controlplane.cluster.x-k8s.io)
    KubeadmControlPlane,
    /// KubeadmConfigTemplate (bootstrap.cluster.x-k8s.io)
    KubeadmConfigTemplate,
    /// MachineDeployment (cluster.x-k8s.io)
    MachineDeployment,
    /// EtcdadmCluster (etcdcluster.cluster.x-k8s.io)
    EtcdadmCluster,
    /// DockerCluster (infrastructure.cluster.x-k8s.io)
    DockerCluster,
    /// DockerMachineTemplate (infrastructure.cluster.x-k8s.io)
    DockerMachineTemplate,
    /// DaemonSet (apps)
    DaemonSet,
    /// Deployment (apps)
    Deployment,
    /// Strata Cluster (strata.dev)
    StrataCluster,
    /// DockerDatacenterConfig (strata.dev)
    DockerDatacenterConfig,
    /// VersionsBundle (strata.dev)
    VersionsBundle,
}

/// All ObjectKind variants for iteration.
pub const ALL_OBJECT_KINDS: &[ObjectKind] = &[
    ObjectKind::CapiCluster,
    ObjectKind::KubeadmControlPlane,
    ObjectKind::KubeadmConfigTemplate,
    ObjectKind::MachineDeployment,
    ObjectKind::EtcdadmCluster,
    ObjectKind::DockerCluster,
    ObjectKind::DockerMachineTemplate,
    ObjectKind::DaemonSet,
    ObjectKind::Deployment,
    ObjectKind::StrataCluster,
    ObjectKind::DockerDatacenterConfig,
    ObjectKind::VersionsBundle,
];

impl ObjectKind {
    /// apiVersion served for this kind
    pub fn api_version(&self) -> &'static str {
        match self {
            Self::CapiCluster | Self::MachineDeployment => CAPI_API_VERSION,
            Self::KubeadmControlPlane => CONTROL_PLANE_API_VERSION,
            Self::KubeadmConfigTemplate => BOOTSTRAP_API_VERSION,
            Self::EtcdadmCluster => ETCD_API_VERSION,
            Self::DockerCluster | Self::DockerMachineTemplate => INFRASTRUCTURE_API_VERSION,
            Self::DaemonSet | Self::Deployment => "apps/v1",
            Self::StrataCluster | Self::DockerDatacenterConfig | Self::VersionsBundle => {
                STRATA_API_VERSION
            }
        }
    }

    /// Kubernetes Kind string
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::CapiCluster | Self::StrataCluster => "Cluster",
            Self::KubeadmControlPlane => "KubeadmControlPlane",
            Self::KubeadmConfigTemplate => "KubeadmConfigTemplate",
            Self::MachineDeployment => "MachineDeployment",
            Self::EtcdadmCluster => "EtcdadmCluster",
            Self::DockerCluster => "DockerCluster",
            Self::DockerMachineTemplate => "DockerMachineTemplate",
            Self::DaemonSet => "DaemonSet",
            Self::Deployment => "Deployment",
            Self::DockerDatacenterConfig => "DockerDatacenterConfig",
            Self::VersionsBundle => "VersionsBundle",
        }
    }

    /// `ApiResource` for this kind
    pub fn api_resource(&self) -> ApiResource {
        build_api_resource(self.api_version(), self.kind_str())
    }
}

/// Read-only map from (apiVersion, kind) to `ApiResource`.
#[derive(Debug, Clone)]
pub struct KindRegistry {
    entries: HashMap<(String, String), ApiResource>,
}

impl KindRegistry {
    /// Start building a registry
    pub fn builder() -> KindRegistryBuilder {
        KindRegistryBuilder::default()
    }

    /// Registry holding every [`ObjectKind`]
    pub fn with_defaults() -> Self {
        Self::builder().defaults().build()
    }

    /// Resolve an apiVersion/kind pair.
    ///
    /// Unregistered pairs (e.g. RBAC objects in a CNI manifest) resolve by
    /// rule-based pluralization rather than failing.
    pub fn resolve(&self, api_version: &str, kind: &str) -> ApiResource {
        match self
            .entries
            .get(&(api_version.to_string(), kind.to_string()))
        {
            Some(ar) => ar.clone(),
            None => {
                debug!(api_version, kind, "kind not registered, using derived resource");
                build_api_resource(api_version, kind)
            }
        }
    }

    /// Returns true if the pair was registered explicitly
    pub fn contains(&self, api_version: &str, kind: &str) -> bool {
        self.entries
            .contains_key(&(api_version.to_string(), kind.to_string()))
    }

    /// Number of registered kinds
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for [`KindRegistry`]
#[derive(Debug, Default)]
pub struct KindRegistryBuilder {
    entries: HashMap<(String, String), ApiResource>,
}

impl KindRegistryBuilder {
    /// Register every [`ObjectKind`]
    pub fn defaults(mut self) -> Self {
        for kind in ALL_OBJECT_KINDS {
            self = self.register(kind.api_resource());
        }
        self
    }

    /// Register one resource, replacing any previous entry for its kind
    pub fn register(mut self, ar: ApiResource) -> Self {
        self.entries
            .insert((ar.api_version.clone(), ar.kind.clone()), ar);
        self
    }

    /// Freeze the registry
    pub fn build(self) -> KindRegistry {
        KindRegistry {
            entries: self.entries,
        }
    }
}
