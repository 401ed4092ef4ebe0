//! Cluster reconciliation engine for Strata
//!
//! A reconcile pass reads a [`ClusterSpec`], picks the provider registered for
//! its datacenter kind and runs the provider's ordered phases. Each phase
//! returns a [`ReconcileResult`]; the first that does not continue ends the
//! pass.
//!
//! Building blocks, leaf first:
//!
//! - [`phases`]: the tri-state result and the sequential [`PhaseRunner`]
//! - [`naming`]: names for immutable templates, diffed against live objects
//! - [`conditions`]: bounded-concurrency condition checks
//! - [`control_plane`] and [`workers`]: orchestrators applying object sets
//! - [`cilium`]: the Cilium install and upgrade state machine
//! - [`provider`]: provider reconcilers, currently Docker
//! - [`reconciler`]: per-cluster entry point and status reporting

#![deny(missing_docs)]

pub mod cilium;
pub mod conditions;
pub mod control_plane;
pub mod naming;
pub mod objects;
pub mod phases;
pub mod provider;
pub mod reconciler;
pub mod registry;
pub mod spec;
pub mod workers;

#[cfg(test)]
mod testing;

pub use conditions::{CheckedCondition, ConditionChecker, ConditionFetcher, FetchOutcome};
pub use control_plane::{ControlPlaneObjectSet, ControlPlaneOrchestrator};
pub use naming::{ImmutableObjectNamer, ObjectName};
pub use phases::{Phase, PhaseRunner, ReconcileResult};
pub use provider::DockerReconciler;
pub use reconciler::{error_action, ClusterReconciler};
pub use registry::{ProviderReconciler, ProviderRegistry, ProviderRegistryBuilder};
pub use spec::{fetch_cluster_spec, ClusterSpec};
pub use workers::{WorkerGroupObjects, WorkerObjectSet, WorkerOrchestrator};
