//! Cluster spec assembly
//!
//! One reconcile pass works on a [`ClusterSpec`]: the `Cluster` resource
//! together with the datacenter config and versions bundle it references.
//! It is read fresh from the store at the start of every pass.

use kube::api::DynamicObject;
use kube::ResourceExt;
use tracing::debug;

use strata_common::crd::{self, Cluster, VersionsBundle};
use strata_common::kinds::{ObjectKind, STRATA_API_VERSION};
use strata_common::kube_utils::build_api_resource;
use strata_common::store::{get_typed, ResourceStore};
use strata_common::Error;

/// Everything one reconcile pass needs to know about a cluster
#[derive(Clone, Debug)]
pub struct ClusterSpec {
    /// The cluster resource
    pub cluster: Cluster,
    /// The provider datacenter config named by `spec.datacenterRef`
    pub datacenter: DynamicObject,
    /// The versions bundle named by `spec.bundleRef`
    pub bundle: VersionsBundle,
}

impl ClusterSpec {
    /// Assemble a spec from already-fetched parts
    pub fn new(cluster: Cluster, datacenter: DynamicObject, bundle: VersionsBundle) -> Self {
        Self {
            cluster,
            datacenter,
            bundle,
        }
    }

    /// Cluster name
    pub fn name(&self) -> &str {
        self.cluster.metadata.name.as_deref().unwrap_or_default()
    }

    /// Namespace of the cluster and of every CAPI object generated for it
    pub fn namespace(&self) -> &str {
        self.cluster.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// The user-declared cluster configuration
    pub fn config(&self) -> &crd::ClusterSpec {
        &self.cluster.spec
    }

    /// Kind of the datacenter config, used to select the provider
    pub fn datacenter_kind(&self) -> &str {
        &self.cluster.spec.datacenter_ref.kind
    }
}

/// Read a cluster and the objects it references.
///
/// Returns `Ok(None)` when the cluster itself does not exist. A missing
/// datacenter config or bundle is a validation error: the cluster cannot be
/// reconciled until the reference is fixed.
pub async fn fetch_cluster_spec(
    store: &dyn ResourceStore,
    name: &str,
    namespace: &str,
) -> Result<Option<ClusterSpec>, Error> {
    let Some(cluster) = get_typed::<Cluster>(
        store,
        &ObjectKind::StrataCluster.api_resource(),
        name,
        namespace,
    )
    .await?
    else {
        debug!(cluster = name, namespace, "cluster not found");
        return Ok(None);
    };

    cluster.spec.validate(name)?;

    let datacenter_ref = &cluster.spec.datacenter_ref;
    let datacenter = store
        .get(
            &build_api_resource(STRATA_API_VERSION, &datacenter_ref.kind),
            &datacenter_ref.name,
            namespace,
        )
        .await?
        .ok_or_else(|| {
            Error::validation_for_field(
                name,
                "spec.datacenterRef",
                format!(
                    "{} {} not found",
                    datacenter_ref.kind, datacenter_ref.name
                ),
            )
        })?;

    let bundle = get_typed::<VersionsBundle>(
        store,
        &ObjectKind::VersionsBundle.api_resource(),
        &cluster.spec.bundle_ref,
        namespace,
    )
    .await?
    .ok_or_else(|| {
        Error::validation_for_field(
            name,
            "spec.bundleRef",
            format!("VersionsBundle {} not found", cluster.spec.bundle_ref),
        )
    })?;

    debug!(
        cluster = %cluster.name_any(),
        datacenter = %datacenter_ref.kind,
        bundle = %cluster.spec.bundle_ref,
        "assembled cluster spec"
    );
    Ok(Some(ClusterSpec::new(cluster, datacenter, bundle)))
}
