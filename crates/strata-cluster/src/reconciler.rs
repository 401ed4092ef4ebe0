//! Cluster reconciler
//!
//! Entry point for one cluster: assembles the [`ClusterSpec`] from the
//! store, hands it to the provider registered for its datacenter kind, and
//! separately reports readiness conditions on the cluster status.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use strata_common::crd::{set_condition, ClusterStatus};
use strata_common::kinds::ObjectKind;
use strata_common::store::ResourceStore;
use strata_common::{Error, ReconcilerConfig};

use crate::conditions::ConditionFetcher;
use crate::phases::ReconcileResult;
use crate::registry::ProviderRegistry;
use crate::spec::{fetch_cluster_spec, ClusterSpec};

/// Reconciles `Cluster` resources through their provider
pub struct ClusterReconciler {
    store: Arc<dyn ResourceStore>,
    registry: ProviderRegistry,
    fetcher: ConditionFetcher,
}

impl ClusterReconciler {
    /// Reconciler using the built-in condition checkers
    pub fn new(
        store: Arc<dyn ResourceStore>,
        registry: ProviderRegistry,
        config: &ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            fetcher: ConditionFetcher::with_builtin_checkers(config.max_condition_workers),
        }
    }

    /// Replace the condition fetcher
    pub fn with_condition_fetcher(mut self, fetcher: ConditionFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Run one reconcile pass for the named cluster.
    ///
    /// A cluster that no longer exists yields `Stop`. Failures that need a
    /// spec change are recorded as the status failure message before being
    /// returned; a later successful pass clears it.
    #[instrument(skip(self, cancel))]
    pub async fn reconcile(
        &self,
        name: &str,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult, Error> {
        match self.run_pass(name, namespace, cancel).await {
            Ok(result) => Ok(result),
            Err(e) => Err(self.record_failure(name, namespace, e).await),
        }
    }

    async fn run_pass(
        &self,
        name: &str,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult, Error> {
        let Some(spec) = fetch_cluster_spec(self.store.as_ref(), name, namespace).await? else {
            debug!("cluster not found, nothing to reconcile");
            return Ok(ReconcileResult::Stop);
        };

        let provider = self.registry.for_cluster(&spec)?;
        let result = provider.reconcile(&spec, cancel).await?;

        let had_failure = spec
            .cluster
            .status
            .as_ref()
            .is_some_and(|s| s.failure_message.is_some());
        if had_failure {
            self.patch_status(name, namespace, &json!({ "failureMessage": null }))
                .await?;
            info!("cleared failure message");
        }

        info!(result = ?result, "reconcile pass finished");
        Ok(result)
    }

    async fn record_failure(&self, name: &str, namespace: &str, error: Error) -> Error {
        if error.is_retryable() {
            return error;
        }
        warn!(error = %error, "reconcile failed until the cluster spec changes");
        let patch = json!({ "failureMessage": error.to_string() });
        if let Err(e) = self.patch_status(name, namespace, &patch).await {
            warn!(error = %e, "failed to record failure message");
        }
        error
    }

    /// Evaluate every condition checker and write the results to status.
    ///
    /// Conditions from checkers that succeeded are written even when others
    /// failed; the aggregated checker error is returned afterwards.
    #[instrument(skip(self, spec, cancel), fields(cluster = spec.name()))]
    pub async fn report_status(
        &self,
        spec: &ClusterSpec,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let outcome = self
            .fetcher
            .fetch(self.store.as_ref(), spec, cancel)
            .await?;

        let mut status = spec.cluster.status.clone().unwrap_or_default();
        for checked in outcome.conditions {
            debug!(
                checker = %checked.checker,
                condition = %checked.condition.type_,
                status = %checked.condition.status,
                "condition evaluated"
            );
            set_condition(&mut status.conditions, checked.condition);
        }
        status.observed_generation = spec.cluster.metadata.generation;

        self.patch_status(spec.name(), spec.namespace(), &status_patch(&status)?)
            .await?;

        match outcome.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &Value,
    ) -> Result<(), Error> {
        self.store
            .patch_status(
                &ObjectKind::StrataCluster.api_resource(),
                name,
                namespace,
                status,
            )
            .await
    }
}

/// Status as a merge patch; the failure message is only ever cleared by a
/// successful pass, so it is left out here
fn status_patch(status: &ClusterStatus) -> Result<Value, Error> {
    let mut value = serde_json::to_value(status)
        .map_err(|e| Error::serialization_for_kind("Cluster", e.to_string()))?;
    if let Some(map) = value.as_object_mut() {
        map.remove("failureMessage");
    }
    Ok(value)
}

/// Requeue decision after a failed pass.
///
/// Transient failures retry after `retry`; anything else waits for the
/// cluster to change.
pub fn error_action(error: &Error, retry: Duration) -> Action {
    if error.is_retryable() {
        Action::requeue(retry)
    } else {
        Action::await_change()
    }
}
