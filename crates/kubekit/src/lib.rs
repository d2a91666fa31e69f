//! # Kubekit
//!
//! Typed cluster objects and the backends that apply them.
//!
//! ## Features
//!
//! - **Typed specs**: namespaces, secrets, volume claims and app workloads
//! - **Workload compilation**: an app becomes a Deployment plus a Service
//! - **Backends**: `kubectl` against a real cluster, or an in-memory cluster
//!   that emulates the platform's admission checks
//! - **Error categorization**: kubectl failures mapped to retryable or not
//!
//! ## Example
//!
//! ```no_run
//! use kubekit::{Cluster, MemoryCluster, NamespaceSpec};
//!
//! let cluster = MemoryCluster::new();
//! let live = cluster.apply(&NamespaceSpec::new("mongodb").to_object())?;
//! assert!(live.metadata.uid.is_some());
//! # Ok::<(), kubekit::Error>(())
//! ```

pub mod backend;
pub mod error;
pub mod quantity;
pub mod types;
pub mod workload;

pub use backend::kubectl::KubectlCluster;
pub use backend::memory::{MemoryCluster, WriteOp, WriteRecord};
pub use backend::{BackendKind, Cluster, object_is_ready};
pub use error::{Error, ErrorCategory, Result};
pub use types::{
    AccessMode, ApiObject, MANAGED_BY, NamespaceSpec, ObjectMeta, ObjectRef, SPEC_HASH_ANNOTATION,
    SecretSpec, VolumeClaimSpec,
};
pub use workload::{
    AppSpec, EnvBinding, EnvSource, MountSpec, PortSpec, ResourceLimits, ServiceType, VolumeSource,
    VolumeSpec,
};
