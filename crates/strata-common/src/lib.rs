//! Common types for Strata: CRDs, errors, resource store and utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod kinds;
pub mod kube_utils;
pub mod store;
pub mod telemetry;
pub mod yaml;

pub use config::ReconcilerConfig;
pub use error::Error;
pub use store::{ApplyOptions, KubeStore, ResourceStore};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label linking CAPI objects to their owning cluster
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Annotation telling the etcdadm controller an etcd upgrade is in progress
pub const ETCD_UPGRADING_ANNOTATION: &str = "etcdcluster.cluster.x-k8s.io/upgrading";

/// Annotation pausing reconciliation of a CAPI object
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Namespace the CNI workloads run in
pub const CNI_NAMESPACE: &str = "kube-system";
