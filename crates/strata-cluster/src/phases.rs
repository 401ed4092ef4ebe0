//! Reconcile phases
//!
//! A reconcile pass is an ordered list of [`Phase`]s. Each phase reports a
//! [`ReconcileResult`]: keep going, come back later, or stop. The
//! [`PhaseRunner`] runs them in registration order and short-circuits on the
//! first phase that does not return `Continue`.

use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use strata_common::Error;

use crate::spec::ClusterSpec;

/// Control signal returned by a phase.
///
/// Errors travel separately in `Result`; a requeue is neither success nor
/// failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReconcileResult {
    /// Proceed to the next phase
    #[default]
    Continue,
    /// Stop this pass and run again after the delay
    RequeueAfter(Duration),
    /// Stop this pass without scheduling a retry
    Stop,
}

impl ReconcileResult {
    /// Delay before the next pass, if one was requested
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::RequeueAfter(delay) => Some(*delay),
            _ => None,
        }
    }

    /// Returns true if the pass should proceed
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

impl From<ReconcileResult> for Action {
    fn from(result: ReconcileResult) -> Self {
        match result {
            ReconcileResult::RequeueAfter(delay) => Action::requeue(delay),
            ReconcileResult::Continue | ReconcileResult::Stop => Action::await_change(),
        }
    }
}

/// One step of a reconcile pass
#[async_trait]
pub trait Phase: Send + Sync {
    /// Name used for the phase's log span
    fn name(&self) -> &str;

    /// Run the phase against the cluster spec
    async fn run(&self, spec: &ClusterSpec) -> Result<ReconcileResult, Error>;
}

/// Runs phases strictly in registration order
#[derive(Default)]
pub struct PhaseRunner {
    phases: Vec<Box<dyn Phase>>,
}

impl PhaseRunner {
    /// Create an empty runner
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a phase
    pub fn register<P: Phase + 'static>(mut self, phase: P) -> Self {
        self.phases.push(Box::new(phase));
        self
    }

    /// Number of registered phases
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Returns true if no phase is registered
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Run every phase until one requeues, stops or fails.
    ///
    /// No rollback and no retry: a failed phase's error is returned as is and
    /// the phases after it do not run. Cancellation aborts the in-flight
    /// phase.
    pub async fn run(
        &self,
        spec: &ClusterSpec,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult, Error> {
        for phase in &self.phases {
            let name = phase.name();
            let span = info_span!("phase", phase = name, cluster = spec.name());

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(Error::cancelled(format!("phase {}", name)));
                }
                result = phase.run(spec).instrument(span) => result?,
            };

            if !result.is_continue() {
                debug!(phase = name, result = ?result, "phase short-circuited pass");
                return Ok(result);
            }
        }

        Ok(ReconcileResult::Continue)
    }
}
