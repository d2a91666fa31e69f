//! Error types for the declarative crate

use thiserror::Error;

/// Errors raised while declaring, compiling or provisioning resources
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The dependency graph contains a cycle
    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Resource ids along the cycle, first id repeated at the end
        cycle: Vec<String>,
    },

    /// A dependency refers to a resource that was never declared
    #[error("resource {resource} depends on undeclared resource {missing}")]
    DanglingReference { resource: String, missing: String },

    /// Two declarations share an id
    #[error("resource {0} is already declared")]
    DuplicateResource(String),

    /// The platform rejected a resource
    #[error("failed to provision {resource}: {message}")]
    Provisioning {
        resource: String,
        message: String,
        /// Whether a later pass may succeed
        retryable: bool,
    },

    /// A status change that the lifecycle does not allow
    #[error("illegal transition for {resource}: {from} -> {to}")]
    InvalidTransition {
        resource: String,
        from: String,
        to: String,
    },
}

impl Error {
    /// Identity of the resource the error is about, when there is one
    pub fn resource(&self) -> Option<&str> {
        match self {
            Self::DanglingReference { resource, .. }
            | Self::Provisioning { resource, .. }
            | Self::InvalidTransition { resource, .. } => Some(resource),
            Self::DuplicateResource(id) => Some(id),
            Self::CyclicDependency { cycle } => cycle.first().map(String::as_str),
        }
    }

    /// Only provisioning failures can be transient; graph errors never are
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provisioning { retryable: true, .. })
    }
}

/// Result type for declarative operations
pub type Result<T> = std::result::Result<T, Error>;
