//! Error types for cluster operations.
//!
//! Errors are categorized to enable smart retry logic and appropriate
//! user feedback. Each error type includes the object it concerns so a
//! rejected resource can be identified.

use thiserror::Error;

/// Categories of cluster errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network or API server connectivity (transient, retryable)
    Network,
    /// The object failed validation
    Invalid,
    /// A quota or limit range rejected the object
    Quota,
    /// Object or referenced object not found
    NotFound,
    /// Optimistic concurrency conflict (retryable)
    Conflict,
    /// RBAC or authentication denied the operation
    Permission,
    /// Readiness wait ran out of time (retryable)
    Timeout,
    /// kubectl not found or not configured
    KubectlNotFound,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Conflict | Self::Timeout)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "API server unreachable",
            Self::Invalid => "Invalid object",
            Self::Quota => "Quota exceeded",
            Self::NotFound => "Not found",
            Self::Conflict => "Update conflict",
            Self::Permission => "Permission denied",
            Self::Timeout => "Timed out waiting for readiness",
            Self::KubectlNotFound => "kubectl not installed",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check the cluster endpoint and your kubeconfig, then retry",
            Self::Invalid => "Fix the offending field in the stack configuration",
            Self::Quota => "Raise the namespace quota or lower resource requests",
            Self::NotFound => "Make sure the referenced object is declared as a dependency",
            Self::Conflict => "Retry; another writer changed the object",
            Self::Permission => "Check the RBAC permissions of the current context",
            Self::Timeout => "Inspect the workload's pods and events, then retry",
            Self::KubectlNotFound => "Install kubectl or use --backend memory",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur during cluster operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The platform rejected a field of the object
    #[error("invalid {object}: {message}")]
    Invalid {
        /// Object the error concerns ("Kind/namespace/name")
        object: String,
        /// Validation message
        message: String,
    },

    /// A quota or limit was exceeded
    #[error("quota exceeded for {object}: {message}")]
    QuotaExceeded { object: String, message: String },

    /// Object not found
    #[error("not found: {object}")]
    NotFound { object: String },

    /// The namespace of a namespaced object does not exist
    #[error("namespace {namespace} not found (required by {object})")]
    NamespaceMissing { namespace: String, object: String },

    /// Optimistic concurrency conflict
    #[error("conflict on {object}: {message}")]
    Conflict { object: String, message: String },

    /// Network-related error (connection refused, TLS, DNS, ...)
    #[error("network error: {message}")]
    Network { message: String },

    /// Permission denied by the API server
    #[error("permission denied: {message}")]
    Permission { message: String },

    /// Readiness wait timed out
    #[error("timed out after {seconds}s waiting for {object} to become ready")]
    Timeout { object: String, seconds: u64 },

    /// kubectl is not installed or not on PATH
    #[error("kubectl not found. Install it or use the memory backend")]
    KubectlNotFound,

    /// Command execution failed
    #[error("command failed: {message}")]
    CommandFailed {
        /// Description of what command failed
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Invalid { .. } => ErrorCategory::Invalid,
            Error::QuotaExceeded { .. } => ErrorCategory::Quota,
            Error::NotFound { .. } | Error::NamespaceMissing { .. } => ErrorCategory::NotFound,
            Error::Conflict { .. } => ErrorCategory::Conflict,
            Error::Network { .. } => ErrorCategory::Network,
            Error::Permission { .. } => ErrorCategory::Permission,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::KubectlNotFound => ErrorCategory::KubectlNotFound,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Create an error from kubectl output.
    ///
    /// Analyzes stderr to categorize the error appropriately.
    pub fn from_kubectl_output(stderr: &str, object: &str) -> Self {
        let stderr_lower = stderr.to_lowercase();
        let message = stderr.trim().to_string();

        if stderr_lower.contains("exceeded quota") || stderr_lower.contains("forbidden: exceeded")
        {
            return Error::QuotaExceeded {
                object: object.to_string(),
                message,
            };
        }

        if stderr_lower.contains("forbidden") || stderr_lower.contains("unauthorized") {
            return Error::Permission { message };
        }

        if stderr_lower.contains("is invalid")
            || stderr_lower.contains("invalid value")
            || stderr_lower.contains("quantities must match")
            || stderr_lower.contains("error validating")
        {
            return Error::Invalid {
                object: object.to_string(),
                message,
            };
        }

        if stderr_lower.contains("the object has been modified")
            || stderr_lower.contains("conflict")
        {
            return Error::Conflict {
                object: object.to_string(),
                message,
            };
        }

        if stderr_lower.contains("namespaces \"") && stderr_lower.contains("not found") {
            let namespace = message
                .split("namespaces \"")
                .nth(1)
                .and_then(|rest| rest.split('"').next())
                .unwrap_or("unknown")
                .to_string();
            return Error::NamespaceMissing {
                namespace,
                object: object.to_string(),
            };
        }

        if stderr_lower.contains("notfound") || stderr_lower.contains("not found") {
            return Error::NotFound {
                object: object.to_string(),
            };
        }

        if stderr_lower.contains("connection refused")
            || stderr_lower.contains("unable to connect")
            || stderr_lower.contains("i/o timeout")
            || stderr_lower.contains("tls handshake")
            || stderr_lower.contains("no such host")
        {
            return Error::Network { message };
        }

        Error::CommandFailed {
            message: format!("kubectl failed for {object}"),
            stderr: message,
        }
    }
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::Conflict.is_retryable());
        assert!(!ErrorCategory::Invalid.is_retryable());
        assert!(!ErrorCategory::Quota.is_retryable());
    }

    #[test]
    fn test_from_kubectl_output_network() {
        let err = Error::from_kubectl_output(
            "The connection to the server localhost:6443 was refused - did you specify the right host or port?\nUnable to connect to the server",
            "Namespace/mongodb",
        );
        assert_eq!(err.category(), ErrorCategory::Network);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_kubectl_output_quota() {
        let err = Error::from_kubectl_output(
            "Error from server (Forbidden): error when creating \"STDIN\": pods \"x\" is forbidden: exceeded quota: compute",
            "Deployment/mongodb/mongodb",
        );
        assert_eq!(err.category(), ErrorCategory::Quota);
    }

    #[test]
    fn test_from_kubectl_output_invalid() {
        let err = Error::from_kubectl_output(
            "The Deployment \"mongodb\" is invalid: spec.template.spec.containers[0].resources.requests[cpu]: Invalid value: \"lots\"",
            "Deployment/mongodb/mongodb",
        );
        assert_eq!(err.category(), ErrorCategory::Invalid);
        assert!(err.to_string().contains("Deployment/mongodb/mongodb"));
    }

    #[test]
    fn test_from_kubectl_output_namespace_missing() {
        let err = Error::from_kubectl_output(
            "Error from server (NotFound): error when creating \"STDIN\": namespaces \"mongodb\" not found",
            "Secret/mongodb/mongodb-secret",
        );
        match err {
            Error::NamespaceMissing { namespace, .. } => assert_eq!(namespace, "mongodb"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_from_kubectl_output_conflict() {
        let err = Error::from_kubectl_output(
            "Operation cannot be fulfilled on deployments.apps \"mongodb\": the object has been modified",
            "Deployment/mongodb/mongodb",
        );
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }
}
