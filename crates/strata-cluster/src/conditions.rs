//! Condition aggregation
//!
//! A [`ConditionChecker`] inspects live objects and reports one condition
//! about a cluster. The [`ConditionFetcher`] runs every registered checker
//! concurrently (bounded by `min(max_workers, checkers)`) and gathers the
//! conditions and errors once all of them finished.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kube::api::DynamicObject;
use k8s_openapi::api::apps::v1::DaemonSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use strata_common::crd::{Condition, ConditionSeverity};
use strata_common::kinds::ObjectKind;
use strata_common::store::{get_typed, ResourceStore};
use strata_common::{Error, CLUSTER_NAME_LABEL, CNI_NAMESPACE};

use crate::cilium::{daemon_set_ready, CILIUM_DAEMON_SET};
use crate::spec::ClusterSpec;

/// Control plane machines are all up to date and ready
pub const CONTROL_PLANE_READY: &str = "ControlPlaneReady";
/// Every worker node group is at its desired size and ready
pub const WORKERS_READY: &str = "WorkersReady";
/// The default CNI is installed and rolled out
pub const DEFAULT_CNI_CONFIGURED: &str = "DefaultCNIConfigured";

/// Reports one condition about a cluster
#[async_trait]
pub trait ConditionChecker: Send + Sync {
    /// Checker name, attached to its results
    fn name(&self) -> &str;

    /// Inspect the cluster; `Ok(None)` when the condition does not apply
    async fn check(
        &self,
        store: &dyn ResourceStore,
        spec: &ClusterSpec,
    ) -> Result<Option<Condition>, Error>;
}

/// A condition together with the checker that produced it
#[derive(Clone, Debug, PartialEq)]
pub struct CheckedCondition {
    /// Name of the checker
    pub checker: String,
    /// The reported condition
    pub condition: Condition,
}

/// Result of one fetch.
///
/// Conditions from successful checkers are kept even when others failed;
/// their order is not specified.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Conditions reported by successful checkers
    pub conditions: Vec<CheckedCondition>,
    /// Every checker failure, aggregated
    pub error: Option<Error>,
}

/// Runs condition checkers with bounded concurrency
pub struct ConditionFetcher {
    checkers: Vec<Arc<dyn ConditionChecker>>,
    max_workers: usize,
}

impl ConditionFetcher {
    /// Create a fetcher running at most `max_workers` checkers at once
    pub fn new(max_workers: usize) -> Self {
        Self {
            checkers: Vec::new(),
            max_workers: max_workers.max(1),
        }
    }

    /// Fetcher with the built-in checkers registered
    pub fn with_builtin_checkers(max_workers: usize) -> Self {
        Self::new(max_workers)
            .register(ControlPlaneReadyChecker)
            .register(WorkersReadyChecker)
            .register(DefaultCniConfiguredChecker)
    }

    /// Add a checker
    pub fn register<C: ConditionChecker + 'static>(mut self, checker: C) -> Self {
        self.checkers.push(Arc::new(checker));
        self
    }

    /// Number of registered checkers
    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    /// Returns true if no checker is registered
    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    /// Run every checker and collect results
    pub async fn fetch(
        &self,
        store: &dyn ResourceStore,
        spec: &ClusterSpec,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, Error> {
        if self.checkers.is_empty() {
            return Ok(FetchOutcome::default());
        }

        let workers = self.max_workers.min(self.checkers.len());
        let results = stream::iter(self.checkers.iter())
            .map(|checker| async move {
                (checker.name().to_string(), checker.check(store, spec).await)
            })
            .buffer_unordered(workers)
            .collect::<Vec<_>>();

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled("condition checks")),
            results = results => results,
        };

        let mut outcome = FetchOutcome::default();
        let mut errors = Vec::new();
        for (checker, result) in results {
            match result {
                Ok(Some(condition)) => {
                    outcome
                        .conditions
                        .push(CheckedCondition { checker, condition })
                }
                Ok(None) => debug!(checker = %checker, "condition not applicable"),
                Err(e) => {
                    warn!(checker = %checker, error = %e, "condition check failed");
                    errors.push(e);
                }
            }
        }
        outcome.error = Error::aggregate("condition checks", errors);
        Ok(outcome)
    }
}

fn status_i64(obj: &DynamicObject, field: &str) -> i64 {
    obj.data["status"][field].as_i64().unwrap_or(0)
}

/// Returns true when a KubeadmControlPlane has exactly `desired` machines,
/// all updated and ready.
pub fn control_plane_ready(control_plane: &DynamicObject, desired: u32) -> bool {
    let desired = i64::from(desired);
    status_i64(control_plane, "replicas") == desired
        && status_i64(control_plane, "updatedReplicas") == desired
        && status_i64(control_plane, "readyReplicas") == desired
}

/// Checks the KubeadmControlPlane and, with external etcd, the etcd cluster
pub struct ControlPlaneReadyChecker;

#[async_trait]
impl ConditionChecker for ControlPlaneReadyChecker {
    fn name(&self) -> &str {
        "control-plane-ready"
    }

    async fn check(
        &self,
        store: &dyn ResourceStore,
        spec: &ClusterSpec,
    ) -> Result<Option<Condition>, Error> {
        if spec.config().has_external_etcd() {
            let etcd = store
                .get(
                    &ObjectKind::EtcdadmCluster.api_resource(),
                    &etcd_cluster_name(spec.name()),
                    spec.namespace(),
                )
                .await?;
            let etcd_ready = etcd
                .as_ref()
                .and_then(|e| e.data["status"]["ready"].as_bool())
                .unwrap_or(false);
            if !etcd_ready {
                return Ok(Some(Condition::false_condition(
                    CONTROL_PLANE_READY,
                    "ExternalEtcdNotReady",
                    ConditionSeverity::Info,
                    "external etcd cluster is not ready",
                )));
            }
        }

        let desired = spec.config().control_plane_configuration.count;
        let control_plane = store
            .get(
                &ObjectKind::KubeadmControlPlane.api_resource(),
                spec.name(),
                spec.namespace(),
            )
            .await?;

        let condition = match control_plane {
            None => Condition::false_condition(
                CONTROL_PLANE_READY,
                "WaitingForControlPlane",
                ConditionSeverity::Info,
                "control plane has not been created",
            ),
            Some(cp) if control_plane_ready(&cp, desired) => {
                Condition::true_condition(CONTROL_PLANE_READY)
            }
            Some(cp) => Condition::false_condition(
                CONTROL_PLANE_READY,
                "ControlPlaneNotReady",
                ConditionSeverity::Info,
                format!(
                    "{}/{} control plane machines ready, {} updated",
                    status_i64(&cp, "readyReplicas"),
                    desired,
                    status_i64(&cp, "updatedReplicas")
                ),
            ),
        };
        Ok(Some(condition))
    }
}

/// Name of the etcdadm cluster generated for a cluster
pub fn etcd_cluster_name(cluster: &str) -> String {
    format!("{}-etcd", cluster)
}

/// Name of the MachineDeployment generated for a worker node group
pub fn machine_deployment_name(cluster: &str, group: &str) -> String {
    format!("{}-{}", cluster, group)
}

/// Checks every worker group's MachineDeployment
pub struct WorkersReadyChecker;

#[async_trait]
impl ConditionChecker for WorkersReadyChecker {
    fn name(&self) -> &str {
        "workers-ready"
    }

    async fn check(
        &self,
        store: &dyn ResourceStore,
        spec: &ClusterSpec,
    ) -> Result<Option<Condition>, Error> {
        let selector = format!("{}={}", CLUSTER_NAME_LABEL, spec.name());
        let deployments = store
            .list(
                &ObjectKind::MachineDeployment.api_resource(),
                Some(spec.namespace()),
                Some(&selector),
            )
            .await?;

        let mut desired_total = 0i64;
        let mut ready_total = 0i64;
        let mut pending = Vec::new();
        for group in &spec.config().worker_node_group_configurations {
            let name = machine_deployment_name(spec.name(), &group.name);
            let desired = i64::from(group.count);
            desired_total += desired;

            let deployment = deployments
                .iter()
                .find(|d| d.metadata.name.as_deref() == Some(name.as_str()));
            let Some(deployment) = deployment else {
                pending.push(group.name.clone());
                continue;
            };

            let ready = status_i64(deployment, "readyReplicas");
            ready_total += ready.min(desired);
            if ready != desired
                || status_i64(deployment, "updatedReplicas") != desired
                || status_i64(deployment, "replicas") != desired
            {
                pending.push(group.name.clone());
            }
        }

        if pending.is_empty() {
            return Ok(Some(Condition::true_condition(WORKERS_READY)));
        }
        Ok(Some(Condition::false_condition(
            WORKERS_READY,
            "WorkersNotReady",
            ConditionSeverity::Info,
            format!(
                "{}/{} worker machines ready; waiting on {}",
                ready_total,
                desired_total,
                pending.join(", ")
            ),
        )))
    }
}

/// Checks the Cilium agent when Cilium is the cluster CNI
pub struct DefaultCniConfiguredChecker;

#[async_trait]
impl ConditionChecker for DefaultCniConfiguredChecker {
    fn name(&self) -> &str {
        "default-cni-configured"
    }

    async fn check(
        &self,
        store: &dyn ResourceStore,
        spec: &ClusterSpec,
    ) -> Result<Option<Condition>, Error> {
        if !spec.config().uses_cilium() {
            return Ok(None);
        }

        let daemon_set = get_typed::<DaemonSet>(
            store,
            &ObjectKind::DaemonSet.api_resource(),
            CILIUM_DAEMON_SET,
            CNI_NAMESPACE,
        )
        .await?;

        let condition = match daemon_set {
            None => Condition::false_condition(
                DEFAULT_CNI_CONFIGURED,
                "CiliumNotInstalled",
                ConditionSeverity::Info,
                "cilium has not been installed",
            ),
            Some(ds) if daemon_set_ready(&ds) && all_scheduled_ready(&ds) => {
                Condition::true_condition(DEFAULT_CNI_CONFIGURED)
            }
            Some(_) => Condition::false_condition(
                DEFAULT_CNI_CONFIGURED,
                "CiliumRolloutInProgress",
                ConditionSeverity::Info,
                "cilium agents are rolling out",
            ),
        };
        Ok(Some(condition))
    }
}

fn all_scheduled_ready(ds: &DaemonSet) -> bool {
    ds.status
        .as_ref()
        .is_some_and(|s| s.number_ready == s.desired_number_scheduled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjectBuilder;
    use crate::testing::{external_etcd_spec, sample_spec, MemoryStore};
    use serde_json::json;
    use std::time::Duration;
    use strata_common::crd::ConditionStatus;

    enum Outcome {
        Report(&'static str),
        Fail(&'static str),
        Skip,
    }

    struct DelayedChecker {
        name: &'static str,
        delay: Duration,
        outcome: Outcome,
    }

    #[async_trait]
    impl ConditionChecker for DelayedChecker {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(
            &self,
            _store: &dyn ResourceStore,
            _spec: &ClusterSpec,
        ) -> Result<Option<Condition>, Error> {
            tokio::time::sleep(self.delay).await;
            match self.outcome {
                Outcome::Report(type_) => Ok(Some(Condition::true_condition(type_))),
                Outcome::Fail(msg) => Err(Error::internal_with_context(self.name, msg)),
                Outcome::Skip => Ok(None),
            }
        }
    }

    fn delayed(name: &'static str, secs: u64, outcome: Outcome) -> DelayedChecker {
        DelayedChecker {
            name,
            delay: Duration::from_secs(secs),
            outcome,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkers_run_concurrently() {
        let fetcher = ConditionFetcher::new(5)
            .register(delayed("one", 1, Outcome::Report("A")))
            .register(delayed("two", 2, Outcome::Report("B")))
            .register(delayed("three", 3, Outcome::Report("C")));

        let start = tokio::time::Instant::now();
        let outcome = fetcher
            .fetch(&MemoryStore::default(), &sample_spec(), &CancellationToken::new())
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(outcome.conditions.len(), 3);
        assert!(outcome.error.is_none());
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(4), "took {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_worker_runs_sequentially() {
        let fetcher = ConditionFetcher::new(1)
            .register(delayed("one", 1, Outcome::Report("A")))
            .register(delayed("two", 2, Outcome::Report("B")))
            .register(delayed("three", 3, Outcome::Report("C")));

        let start = tokio::time::Instant::now();
        fetcher
            .fetch(&MemoryStore::default(), &sample_spec(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_failures_are_aggregated_and_successes_kept() {
        let fetcher = ConditionFetcher::new(5)
            .register(delayed("bad-1", 0, Outcome::Fail("etcd unreachable")))
            .register(delayed("good", 0, Outcome::Report("Ready")))
            .register(delayed("bad-2", 0, Outcome::Fail("api timeout")));

        let outcome = fetcher
            .fetch(&MemoryStore::default(), &sample_spec(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.conditions.len(), 1);
        assert_eq!(outcome.conditions[0].checker, "good");
        assert_eq!(outcome.conditions[0].condition.type_, "Ready");

        let err = outcome.error.expect("two checkers failed");
        assert!(matches!(err, Error::Aggregate { .. }));
        let msg = err.to_string();
        assert!(msg.contains("etcd unreachable"));
        assert!(msg.contains("api timeout"));
    }

    #[tokio::test]
    async fn test_not_applicable_checkers_report_nothing() {
        let fetcher = ConditionFetcher::new(5).register(delayed("skip", 0, Outcome::Skip));
        let outcome = fetcher
            .fetch(&MemoryStore::default(), &sample_spec(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.conditions.is_empty());
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_no_checkers_returns_immediately() {
        let fetcher = ConditionFetcher::new(5);
        assert!(fetcher.is_empty());
        let outcome = fetcher
            .fetch(&MemoryStore::default(), &sample_spec(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.conditions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch() {
        let fetcher = ConditionFetcher::new(5).register(delayed("slow", 60, Outcome::Skip));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetcher
            .fetch(&MemoryStore::default(), &sample_spec(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }

    fn control_plane(status: serde_json::Value) -> DynamicObject {
        ObjectBuilder::of(ObjectKind::KubeadmControlPlane, "prod", "eksa-system")
            .with_spec(json!({"replicas": 3}))
            .with_field("status", status)
            .build()
    }

    #[tokio::test]
    async fn test_control_plane_checker_states() {
        let store = MemoryStore::default();
        let spec = sample_spec();
        let checker = ControlPlaneReadyChecker;

        let missing = checker.check(&store, &spec).await.unwrap().unwrap();
        assert_eq!(missing.reason, "WaitingForControlPlane");

        store.insert(control_plane(
            json!({"replicas": 3, "updatedReplicas": 3, "readyReplicas": 2}),
        ));
        let scaling = checker.check(&store, &spec).await.unwrap().unwrap();
        assert_eq!(scaling.status, ConditionStatus::False);
        assert!(scaling.message.contains("2/3"));

        store.insert(control_plane(
            json!({"replicas": 3, "updatedReplicas": 3, "readyReplicas": 3}),
        ));
        let ready = checker.check(&store, &spec).await.unwrap().unwrap();
        assert!(ready.is_true());
        assert_eq!(ready.type_, CONTROL_PLANE_READY);
    }

    #[tokio::test]
    async fn test_control_plane_checker_waits_for_external_etcd() {
        let store = MemoryStore::default();
        store.insert(control_plane(
            json!({"replicas": 3, "updatedReplicas": 3, "readyReplicas": 3}),
        ));
        store.insert(
            ObjectBuilder::of(ObjectKind::EtcdadmCluster, "prod-etcd", "eksa-system")
                .with_field("status", json!({"ready": false}))
                .build(),
        );

        let condition = ControlPlaneReadyChecker
            .check(&store, &external_etcd_spec())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(condition.reason, "ExternalEtcdNotReady");
    }

    #[tokio::test]
    async fn test_control_plane_checker_propagates_store_errors() {
        let store = MemoryStore::default();
        store.fail_on("get", "prod");
        let err = ControlPlaneReadyChecker
            .check(&store, &sample_spec())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_workers_checker() {
        let store = MemoryStore::default();
        let spec = sample_spec();

        let waiting = WorkersReadyChecker.check(&store, &spec).await.unwrap().unwrap();
        assert!(!waiting.is_true());
        assert!(waiting.message.contains("md-0"));

        store.insert(
            ObjectBuilder::of(ObjectKind::MachineDeployment, "prod-md-0", "eksa-system")
                .for_cluster("prod")
                .with_field(
                    "status",
                    json!({"replicas": 2, "updatedReplicas": 2, "readyReplicas": 2}),
                )
                .build(),
        );
        let ready = WorkersReadyChecker.check(&store, &spec).await.unwrap().unwrap();
        assert!(ready.is_true());
    }

    #[tokio::test]
    async fn test_cni_checker_skips_clusters_without_cilium() {
        let mut spec = sample_spec();
        spec.cluster.spec.cluster_network.cni_config.cilium = None;
        let result = DefaultCniConfiguredChecker
            .check(&MemoryStore::default(), &spec)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_cni_checker_reports_rollout() {
        let store = MemoryStore::default();
        let mut ds = ObjectBuilder::of(ObjectKind::DaemonSet, "cilium", "kube-system")
            .with_spec(json!({"selector": {}, "template": {}}))
            .with_field(
                "status",
                json!({
                    "observedGeneration": 1,
                    "numberReady": 2,
                    "desiredNumberScheduled": 3,
                    "currentNumberScheduled": 3,
                    "numberMisscheduled": 0
                }),
            )
            .build();
        ds.metadata.generation = Some(1);
        store.insert(ds);

        let condition = DefaultCniConfiguredChecker
            .check(&store, &sample_spec())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(condition.reason, "CiliumRolloutInProgress");
    }
}
