//! Error types for Strata reconciliation
//!
//! Errors carry enough context (operation, kind, name, namespace) to be
//! actionable from a single log line. "Not found" is never an error: store
//! reads return `Option` and the caller branches on it.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Strata operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Resource store operation failed
    #[error("failed to {operation} {kind} {namespace}/{name}: {message}")]
    Store {
        /// Store operation (get, list, apply, delete, ...)
        operation: String,
        /// Object kind
        kind: String,
        /// Object name (empty for list operations)
        name: String,
        /// Object namespace (empty for cluster-scoped objects)
        namespace: String,
        /// Description of what failed
        message: String,
    },

    /// Validation error for cluster specs and references
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.datacenterRef")
        field: Option<String>,
    },

    /// Malformed input that retrying will not fix (bad manifest, bad image tag)
    #[error("invalid input [{context}]: {message}")]
    InvalidInput {
        /// Where the input came from (e.g., "cilium-manifest")
        context: String,
        /// Description of what is malformed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Several independent operations failed
    #[error("{context}: {}", join_messages(.errors))]
    Aggregate {
        /// What the operations were doing (e.g., "delete stale machine deployments")
        context: String,
        /// Every underlying error, none dropped
        errors: Vec<Error>,
    },

    /// The caller cancelled the operation
    #[error("cancelled during {context}")]
    Cancelled {
        /// What was running when cancellation was observed
        context: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Wrap a store failure with the operation and object it concerned
    pub fn store(
        operation: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
        source: impl std::fmt::Display,
    ) -> Self {
        Self::Store {
            operation: operation.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            message: source.to_string(),
        }
    }

    /// Create a validation error with the given message
    ///
    /// For simple validation errors without cluster context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context
    pub fn validation_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context and field path
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Merge errors into one.
    ///
    /// Returns `None` for an empty list and the error itself for a single one,
    /// so callers can write `if let Some(err) = Error::aggregate(..)`.
    pub fn aggregate(context: impl Into<String>, mut errors: Vec<Error>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate {
                context: context.into(),
                errors,
            }),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, malformed input and serialization errors need a human to
    /// fix the input. Store and internal errors are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Store { .. } => true,
            Error::Validation { .. } => false,
            Error::InvalidInput { .. } => false,
            Error::Serialization { .. } => false,
            Error::Aggregate { errors, .. } => errors.iter().any(Error::is_retryable),
            Error::Cancelled { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Get the cluster name if this error is associated with a specific cluster
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::Validation { cluster, .. } => Some(cluster),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::InvalidInput { context, .. } => Some(context),
            Error::Aggregate { context, .. } => Some(context),
            Error::Cancelled { context } => Some(context),
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Propagation in Reconciliation
    // ==========================================================================

    /// Story: a failed write names exactly what was being written
    #[test]
    fn story_store_errors_carry_object_context() {
        let err = Error::store(
            "apply",
            "KubeadmControlPlane",
            "prod-cp",
            "eksa-system",
            "connection refused",
        );
        let msg = err.to_string();
        assert!(msg.contains("apply"));
        assert!(msg.contains("KubeadmControlPlane"));
        assert!(msg.contains("eksa-system/prod-cp"));
        assert!(msg.contains("connection refused"));
        assert!(err.is_retryable());
    }

    /// Story: a bad image tag is surfaced to a human, never retried
    #[test]
    fn story_malformed_input_is_not_retryable() {
        let err = Error::invalid_input("cilium-daemonset", "image has no tag");
        assert!(!err.is_retryable());
        assert_eq!(err.context(), Some("cilium-daemonset"));
        assert!(err.to_string().contains("image has no tag"));
    }

    /// Story: validation errors point to the broken cluster and field
    #[test]
    fn story_validation_errors_include_cluster_and_field() {
        let err = Error::validation_for_field("prod", "spec.datacenterRef", "kind is empty");
        assert_eq!(err.cluster(), Some("prod"));
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.datacenterRef"));
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    /// Story: when several deletions fail, every failure is reported
    #[test]
    fn story_aggregate_keeps_every_message() {
        let err = Error::aggregate(
            "delete stale machine deployments",
            vec![
                Error::store("delete", "MachineDeployment", "md-1", "ns", "timeout"),
                Error::store("delete", "MachineDeployment", "md-2", "ns", "forbidden"),
            ],
        )
        .expect("two errors aggregate");

        let msg = err.to_string();
        assert!(msg.starts_with("delete stale machine deployments"));
        assert!(msg.contains("md-1"));
        assert!(msg.contains("timeout"));
        assert!(msg.contains("md-2"));
        assert!(msg.contains("forbidden"));
    }

    #[test]
    fn test_aggregate_of_nothing_is_none() {
        assert!(Error::aggregate("ctx", Vec::new()).is_none());
    }

    #[test]
    fn test_aggregate_of_one_is_that_error() {
        let err = Error::aggregate("ctx", vec![Error::validation("bad")]).unwrap();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_aggregate_retryable_if_any_member_is() {
        let err = Error::Aggregate {
            context: "ctx".to_string(),
            errors: vec![Error::validation("bad"), Error::internal("flaky")],
        };
        assert!(err.is_retryable());

        let err = Error::Aggregate {
            context: "ctx".to_string(),
            errors: vec![Error::validation("bad"), Error::serialization("worse")],
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_cancelled_display() {
        let err = Error::cancelled("phase control-plane");
        assert_eq!(err.to_string(), "cancelled during phase control-plane");
    }

    #[test]
    fn test_kube_conflict_is_retryable() {
        let err = Error::from(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        }));
        assert!(err.is_retryable());
    }
}
