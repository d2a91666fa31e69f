//! Cluster-bound resources
//!
//! Every stack entry is an [`ObjectResource`]: one or more cluster objects
//! applied and removed as a unit, with:
//! - State detection by spec hash (current vs desired)
//! - Create-or-update through a [`kubekit::Cluster`]
//! - A readiness gate for the object dependents rely on
//! - Platform-assigned identity read back as outputs

mod object;

pub use object::{Kind, ObjectResource, spec_hash};
