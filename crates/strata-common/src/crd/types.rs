//! Shared types used by the Strata CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How serious a False condition is
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionSeverity {
    /// Requires human attention
    Error,
    /// Degraded but progressing
    Warning,
    /// Informational only
    Info,
    /// No severity (used for True conditions)
    #[default]
    #[serde(rename = "")]
    None,
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., ControlPlaneReady)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Severity of a False condition
    #[serde(default)]
    pub severity: ConditionSeverity,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            severity: ConditionSeverity::None,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// A True condition with no reason
    pub fn true_condition(type_: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::True, "", "")
    }

    /// A False condition with a reason, severity and message
    pub fn false_condition(
        type_: impl Into<String>,
        reason: impl Into<String>,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            ..Self::new(type_, ConditionStatus::False, reason, message)
        }
    }

    /// Returns true if the condition status is True
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Insert or replace a condition, keeping at most one per type.
///
/// The stored transition time only moves when the status actually changes,
/// so re-reporting the same status does not churn the object.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Look up a condition by type
pub fn get_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Reference to another object by kind and name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ref {
    /// Kind of the referenced object (e.g., DockerDatacenterConfig)
    pub kind: String,
    /// Name of the referenced object
    pub name: String,
}

/// Node taint applied through kubeadm node registration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    /// Taint key
    pub key: String,
    /// Taint value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Taint effect (NoSchedule, PreferNoSchedule, NoExecute)
    pub effect: String,
}

/// Control plane topology
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneConfiguration {
    /// Number of control plane machines
    pub count: u32,
    /// Control plane endpoint host (optional for docker)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Taints for control plane nodes; `None` keeps the kubeadm default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taints: Option<Vec<Taint>>,
}

/// External (unstacked) etcd topology
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEtcdConfiguration {
    /// Number of etcd machines
    pub count: u32,
}

/// A named group of worker machines
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerNodeGroupConfiguration {
    /// Group name, unique within the cluster
    pub name: String,
    /// Number of machines
    pub count: u32,
    /// Taints for the group's nodes; an empty list clears all taints
    #[serde(default)]
    pub taints: Vec<Taint>,
    /// Node labels
    #[serde(default)]
    pub labels: std::collections::BTreeMap<String, String>,
}

/// CNI selection
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CniConfig {
    /// Cilium settings; present when Cilium is the cluster CNI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cilium: Option<CiliumConfig>,
}

/// Cilium-specific settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CiliumConfig {
    /// Policy enforcement mode (default, always, never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_enforcement_mode: Option<String>,
}

/// Cluster networking
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetwork {
    /// Pod CIDR blocks
    #[serde(default)]
    pub pod_cidrs: Vec<String>,
    /// Service CIDR blocks
    #[serde(default)]
    pub service_cidrs: Vec<String>,
    /// CNI configuration
    #[serde(default)]
    pub cni_config: CniConfig,
}

/// A container image reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Repository URI without tag (e.g., "quay.io/cilium/cilium")
    pub uri: String,
    /// Image tag (e.g., "v1.13.9")
    pub tag: String,
}

impl Image {
    /// Full image reference `uri:tag`
    pub fn reference(&self) -> String {
        format!("{}:{}", self.uri, self.tag)
    }
}
