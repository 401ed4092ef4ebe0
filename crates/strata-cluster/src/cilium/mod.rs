//! Cilium install and upgrade
//!
//! Cilium upgrades go through a preflight stage: a parallel DaemonSet and
//! Deployment pre-pull the new images and validate the upgrade before the
//! agents are touched. One pass moves the installation forward as far as it
//! can and requeues whenever it has to wait on a rollout.
//!
//! ```text
//! absent ──install──▶ installed-current ◀──────────────────────┐
//!                         │ bundle images change               │
//!                         ▼                                     │
//!                   installed-stale ──agent ready──▶ preflight-pending
//!                                                        │ preflight ready
//!                                                        ▼
//!                   preflight-cleanup ◀── upgrading ◀── preflight-ready
//! ```

mod installation;
mod templater;

pub use installation::{
    daemon_set_ready, deployment_ready, CiliumInstallation, CILIUM_DAEMON_SET, CILIUM_OPERATOR,
    CILIUM_PREFLIGHT,
};
pub use templater::{CiliumTemplater, ManifestOptions};

#[cfg(test)]
pub use templater::MockCiliumTemplater;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use strata_common::kinds::ObjectKind;
use strata_common::store::{ApplyOptions, ResourceStore};
use strata_common::yaml::parse_manifest_objects;
use strata_common::{Error, CNI_NAMESPACE};

use crate::objects::apply_batch;
use crate::phases::ReconcileResult;
use crate::spec::ClusterSpec;

/// Where an installation stands relative to the bundle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpgradeState {
    /// Agent or operator missing
    Absent,
    /// Running the bundle's images, no preflight objects
    InstalledCurrent,
    /// Running images that differ from the bundle
    InstalledStale,
    /// Waiting for preflight objects to exist and roll out
    PreflightPending,
    /// Preflight finished; ready to upgrade
    PreflightReady,
    /// Applying the upgrade manifest from the given `major.minor`
    Upgrading {
        /// Running `major.minor` version
        from_version: String,
    },
    /// Removing preflight objects
    PreflightCleanup,
}

impl UpgradeState {
    /// Classify a live installation against the images the bundle pins
    pub fn classify(installation: &CiliumInstallation, spec: &ClusterSpec) -> Self {
        if !installation.is_installed() {
            return Self::Absent;
        }

        let cilium = &spec.bundle.spec.cilium;
        let current = installation.agent_image() == Some(cilium.cilium.reference().as_str())
            && installation.operator_image() == Some(cilium.operator.reference().as_str());

        match (current, installation.has_preflight()) {
            (true, false) => Self::InstalledCurrent,
            (true, true) => Self::PreflightCleanup,
            (false, _) => Self::InstalledStale,
        }
    }
}

/// Parse `major.minor` out of an image reference's tag.
///
/// `quay.io/cilium/cilium:v1.13.9-eksa.1` yields `1.13`.
pub fn minor_version(image: &str) -> Result<String, Error> {
    let invalid = |msg: &str| Error::invalid_input("cilium-image", format!("{}: {}", image, msg));

    let (_, tag) = image
        .rsplit_once(':')
        .filter(|(_, tag)| !tag.contains('/'))
        .ok_or_else(|| invalid("image has no tag"))?;

    let version = tag.strip_prefix('v').unwrap_or(tag);
    let mut parts = version.split(['.', '-', '+']);
    let major = parts.next().filter(|p| is_number(p));
    let minor = parts.next().filter(|p| is_number(p));
    match (major, minor) {
        (Some(major), Some(minor)) => Ok(format!("{}.{}", major, minor)),
        _ => Err(invalid("tag is not a semantic version")),
    }
}

fn is_number(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

/// Drives a Cilium installation towards the bundle's version
pub struct CiliumUpgrader {
    store: Arc<dyn ResourceStore>,
    templater: Arc<dyn CiliumTemplater>,
    apply: ApplyOptions,
    requeue: Duration,
}

impl CiliumUpgrader {
    /// Create an upgrader that requeues after `requeue` while waiting
    pub fn new(
        store: Arc<dyn ResourceStore>,
        templater: Arc<dyn CiliumTemplater>,
        apply: ApplyOptions,
        requeue: Duration,
    ) -> Self {
        Self {
            store,
            templater,
            apply,
            requeue,
        }
    }

    /// Advance the installation as far as possible in one pass
    pub async fn reconcile(&self, spec: &ClusterSpec) -> Result<ReconcileResult, Error> {
        let mut installation = CiliumInstallation::load(self.store.as_ref()).await?;
        let mut state = UpgradeState::classify(&installation, spec);

        loop {
            debug!(cluster = spec.name(), state = ?state, "cilium state");
            state = match state {
                UpgradeState::Absent => {
                    info!(cluster = spec.name(), "installing cilium");
                    let manifest = self
                        .templater
                        .generate_manifest(spec, ManifestOptions::default())
                        .await?;
                    self.apply_manifest("cilium-manifest", &manifest).await?;
                    return Ok(ReconcileResult::Continue);
                }
                UpgradeState::InstalledCurrent => return Ok(ReconcileResult::Continue),
                UpgradeState::InstalledStale => {
                    let ready = installation
                        .daemon_set
                        .as_ref()
                        .is_some_and(daemon_set_ready);
                    if !ready {
                        debug!(cluster = spec.name(), "cilium agent rollout in progress, waiting");
                        return Ok(ReconcileResult::RequeueAfter(self.requeue));
                    }
                    UpgradeState::PreflightPending
                }
                UpgradeState::PreflightPending => {
                    // Applied every pass so a partial or outdated preflight converges
                    if !installation.has_preflight() {
                        info!(cluster = spec.name(), "installing cilium upgrade preflight");
                    }
                    let manifest = self
                        .templater
                        .generate_upgrade_preflight_manifest(spec)
                        .await?;
                    self.apply_manifest("cilium-preflight-manifest", &manifest)
                        .await?;

                    installation = CiliumInstallation::load(self.store.as_ref()).await?;
                    if !installation.preflight_ready() {
                        debug!(cluster = spec.name(), "cilium preflight not ready, waiting");
                        return Ok(ReconcileResult::RequeueAfter(self.requeue));
                    }
                    UpgradeState::PreflightReady
                }
                UpgradeState::PreflightReady => {
                    let image = installation.agent_image().ok_or_else(|| {
                        Error::invalid_input("cilium-daemonset", "agent container has no image")
                    })?;
                    UpgradeState::Upgrading {
                        from_version: minor_version(image)?,
                    }
                }
                UpgradeState::Upgrading { from_version } => {
                    info!(
                        cluster = spec.name(),
                        from = %from_version,
                        to = %spec.bundle.spec.cilium.cilium.tag,
                        "upgrading cilium"
                    );
                    let manifest = self
                        .templater
                        .generate_manifest(spec, ManifestOptions::upgrade_from(from_version))
                        .await?;
                    self.apply_manifest("cilium-manifest", &manifest).await?;
                    UpgradeState::PreflightCleanup
                }
                UpgradeState::PreflightCleanup => {
                    self.delete_preflight().await?;
                    return Ok(ReconcileResult::Continue);
                }
            };
        }
    }

    async fn apply_manifest(&self, context: &str, manifest: &[u8]) -> Result<(), Error> {
        let objects = parse_manifest_objects(context, manifest)?;
        let applied = apply_batch(self.store.as_ref(), &objects, &self.apply).await?;
        debug!(context, applied, "applied cilium manifest");
        Ok(())
    }

    async fn delete_preflight(&self) -> Result<(), Error> {
        info!("removing cilium preflight");
        self.store
            .delete(
                &ObjectKind::DaemonSet.api_resource(),
                CILIUM_PREFLIGHT,
                CNI_NAMESPACE,
            )
            .await?;
        self.store
            .delete(
                &ObjectKind::Deployment.api_resource(),
                CILIUM_PREFLIGHT,
                CNI_NAMESPACE,
            )
            .await
    }
}
