//! # Declarative
//!
//! A framework for dependency-ordered, declarative resource provisioning.
//!
//! This crate provides the core abstractions for declaring desired state and
//! the prerequisites between resources, detecting current state, and
//! converging a target environment to match, one dependency wave at a time.
//!
//! ## Core Concepts
//!
//! - **Resource**: Something with state that can be managed (namespaces, secrets, workloads)
//! - **ResourceGraph**: Declared resources plus the dependency edges between them
//! - **ExecutionPlan**: A compiled graph, grouped into waves of independent resources
//! - **ResourceStatus**: `Declared -> Pending -> Applying -> Ready | Failed`
//! - **Executor**: Applies waves in order, fanning each wave out over a thread pool
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{ExecuteOptions, ExecutionPlan, ResourceGraph, execute_simple};
//!
//! let mut graph = ResourceGraph::new();
//! let ns = graph.declare(namespace, &[])?;
//! let secret = graph.declare(credentials, &[&ns])?;
//! graph.declare(database, &[&ns, &secret])?;
//!
//! let plan = ExecutionPlan::compile(graph)?;
//! let summary = execute_simple(&plan, &ExecuteOptions::default())?;
//! assert!(summary.is_success());
//! ```
//!
//! ## Errors
//!
//! - [`Error::CyclicDependency`]: a declaration closes a cycle
//! - [`Error::DanglingReference`]: a dependency was never declared
//! - [`Error::Provisioning`]: the platform rejected a resource
//!
//! ## Callback Traits
//!
//! - [`ProgressCallback`]: Receives progress updates
//! - [`ConfirmCallback`]: Handles user confirmations
//!
//! This allows the crate to be used without hard dependencies on
//! specific UI frameworks.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod resource;
pub mod types;

// Re-export main types at crate root
pub use context::{
    ApplyContext, AutoConfirm, AutoDecline, ConfirmCallback, NoProgress, ProgressCallback,
};
pub use diff::{DiffSummary, ResourceDiff, compute_diffs, group_by_type};
pub use error::{Error, Result};
pub use executor::{destroy, execute, execute_simple};
pub use graph::{ResourceGraph, ResourceHandle};
pub use planner::{ExecutionPlan, PlanEntry};
pub use resource::{BoxedResource, Resource};
pub use types::{
    ApplyResult, ExecuteOptions, ExecuteSummary, FailureHint, Outputs, ResourceOutcome, ResourceState,
    ResourceStatus, StatusTracker, Transition,
};
