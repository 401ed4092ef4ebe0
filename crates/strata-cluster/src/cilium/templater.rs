//! Cilium manifest rendering interface
//!
//! Chart rendering lives outside the engine. The upgrader only asks for
//! multi-document YAML and applies what it gets back.

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use strata_common::Error;

use crate::spec::ClusterSpec;

/// Options for rendering the main Cilium manifest
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestOptions {
    /// `major.minor` of the running Cilium when rendering an upgrade
    pub upgrade_from_version: Option<String>,
}

impl ManifestOptions {
    /// Options for upgrading from `version`
    pub fn upgrade_from(version: impl Into<String>) -> Self {
        Self {
            upgrade_from_version: Some(version.into()),
        }
    }
}

/// Renders Cilium manifests for a cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CiliumTemplater: Send + Sync {
    /// Render the full Cilium install or upgrade manifest
    async fn generate_manifest(
        &self,
        spec: &ClusterSpec,
        options: ManifestOptions,
    ) -> Result<Vec<u8>, Error>;

    /// Render the preflight DaemonSet and Deployment that pre-pull the new
    /// images and validate the upgrade
    async fn generate_upgrade_preflight_manifest(&self, spec: &ClusterSpec)
        -> Result<Vec<u8>, Error>;
}
