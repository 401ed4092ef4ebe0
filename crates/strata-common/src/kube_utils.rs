//! Shared Kubernetes utilities using kube-rs
//!
//! Helpers for turning apiVersion/kind pairs into `ApiResource`s and for
//! reading and writing common fields on untyped `DynamicObject`s.

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;

use crate::Error;

/// Known plural forms for kinds the simple rules get wrong or that are hot paths
const KIND_PLURALS: &[(&str, &str)] = &[
    // Core CAPI types
    ("cluster", "clusters"),
    ("machine", "machines"),
    ("machinedeployment", "machinedeployments"),
    ("machineset", "machinesets"),
    // Control plane providers
    ("kubeadmcontrolplane", "kubeadmcontrolplanes"),
    // Bootstrap providers
    ("kubeadmconfig", "kubeadmconfigs"),
    ("kubeadmconfigtemplate", "kubeadmconfigtemplates"),
    // External etcd
    ("etcdadmcluster", "etcdadmclusters"),
    ("etcdadmconfig", "etcdadmconfigs"),
    // Docker provider
    ("dockercluster", "dockerclusters"),
    ("dockermachine", "dockermachines"),
    ("dockermachinetemplate", "dockermachinetemplates"),
    // Core Kubernetes types with irregular plurals
    ("ingress", "ingresses"),
    ("networkpolicy", "networkpolicies"),
    ("podsecuritypolicy", "podsecuritypolicies"),
];

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use strata_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("apps/v1");
/// assert_eq!(group, "apps");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an `ApiResource` from an apiVersion and kind without discovery
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for known CAPI/Kubernetes types, falling back to
/// simple pluralization rules for unknown types.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Returns true if the kube error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// apiVersion and kind of a dynamic object, or an error if either is missing
pub fn object_type(obj: &DynamicObject) -> Result<(&str, &str), Error> {
    obj.types
        .as_ref()
        .map(|t| (t.api_version.as_str(), t.kind.as_str()))
        .ok_or_else(|| {
            Error::invalid_input(
                "object",
                format!(
                    "object {} has no apiVersion/kind",
                    obj.metadata.name.as_deref().unwrap_or_default()
                ),
            )
        })
}

/// Kind of a dynamic object, `"Unknown"` if unset (for log and error context)
pub fn object_kind(obj: &DynamicObject) -> &str {
    obj.types
        .as_ref()
        .map(|t| t.kind.as_str())
        .unwrap_or("Unknown")
}

/// Name of a dynamic object, empty if unset
pub fn object_name(obj: &DynamicObject) -> &str {
    obj.metadata.name.as_deref().unwrap_or_default()
}

/// Namespace of a dynamic object, empty if cluster-scoped or unset
pub fn object_namespace(obj: &DynamicObject) -> &str {
    obj.metadata.namespace.as_deref().unwrap_or_default()
}

/// Set (or overwrite) one annotation on an object
pub fn set_annotation(obj: &mut DynamicObject, key: &str, value: &str) {
    obj.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
}

/// Read one annotation from an object
pub fn annotation<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Read one label from an object
pub fn label<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(String::as_str)
}

/// The object's `spec`, or `Null` if it has none
pub fn object_spec(obj: &DynamicObject) -> &serde_json::Value {
    obj.data.get("spec").unwrap_or(&serde_json::Value::Null)
}

/// Check whether an object matches an equality-based label selector
/// (`k1=v1,k2=v2`). An empty selector matches everything.
pub fn matches_label_selector(obj: &DynamicObject, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => label(obj, key.trim()) == Some(value.trim()),
            None => label(obj, term).is_some(),
        })
}
