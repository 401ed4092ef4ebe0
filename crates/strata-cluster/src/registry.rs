//! Provider reconciler registry
//!
//! Each infrastructure provider contributes a [`ProviderReconciler`] keyed by
//! the kind of its datacenter config. The registry is assembled once at
//! startup and only read afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use mockall::automock;

use strata_common::Error;

use crate::phases::ReconcileResult;
use crate::spec::ClusterSpec;

/// Reconciles clusters backed by one infrastructure provider
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderReconciler: Send + Sync {
    /// Run one reconcile pass for the cluster
    async fn reconcile(
        &self,
        spec: &ClusterSpec,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult, Error>;
}

/// Provider reconcilers keyed by datacenter kind
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProviderReconciler>>,
}

impl ProviderRegistry {
    /// Start building a registry
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Reconciler registered for `datacenter_kind`
    pub fn get(&self, datacenter_kind: &str) -> Option<Arc<dyn ProviderReconciler>> {
        self.providers.get(datacenter_kind).cloned()
    }

    /// Reconciler for the cluster's datacenter kind.
    ///
    /// An unregistered kind is a validation error on the cluster: nothing
    /// will reconcile it until the reference changes.
    pub fn for_cluster(&self, spec: &ClusterSpec) -> Result<Arc<dyn ProviderReconciler>, Error> {
        self.get(spec.datacenter_kind()).ok_or_else(|| {
            Error::validation_for_field(
                spec.name(),
                "spec.datacenterRef.kind",
                format!(
                    "no provider registered for datacenter kind '{}'",
                    spec.datacenter_kind()
                ),
            )
        })
    }

    /// Registered datacenter kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if no provider is registered
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Builder for [`ProviderRegistry`]
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    providers: HashMap<String, Arc<dyn ProviderReconciler>>,
}

impl ProviderRegistryBuilder {
    /// Register a reconciler; a later registration for the same kind wins
    pub fn add(
        mut self,
        datacenter_kind: impl Into<String>,
        reconciler: Arc<dyn ProviderReconciler>,
    ) -> Self {
        self.providers.insert(datacenter_kind.into(), reconciler);
        self
    }

    /// Finish the registry
    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            providers: self.providers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_spec;

    #[test]
    fn test_lookup_by_datacenter_kind() {
        let registry = ProviderRegistry::builder()
            .add("DockerDatacenterConfig", Arc::new(MockProviderReconciler::new()))
            .add("VSphereDatacenterConfig", Arc::new(MockProviderReconciler::new()))
            .build();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("DockerDatacenterConfig").is_some());
        assert!(registry.get("dockerdatacenterconfig").is_none());
        assert_eq!(
            registry.kinds(),
            vec!["DockerDatacenterConfig", "VSphereDatacenterConfig"]
        );
    }

    #[test]
    fn test_unknown_kind_is_validation_error() {
        let registry = ProviderRegistry::builder().build();
        assert!(registry.is_empty());

        let err = registry.for_cluster(&sample_spec()).err().unwrap();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains("DockerDatacenterConfig"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_registered_reconciler_is_dispatched() {
        let mut provider = MockProviderReconciler::new();
        provider
            .expect_reconcile()
            .times(1)
            .returning(|_, _| Ok(ReconcileResult::Stop));
        let registry = ProviderRegistry::builder()
            .add("DockerDatacenterConfig", Arc::new(provider))
            .build();

        let spec = sample_spec();
        let result = registry
            .for_cluster(&spec)
            .unwrap()
            .reconcile(&spec, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, ReconcileResult::Stop);
    }
}
