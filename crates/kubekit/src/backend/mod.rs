//! Backend abstraction for cluster operations.
//!
//! The [`Cluster`] trait defines the interface for talking to a cluster,
//! allowing for different implementations (real kubectl, in-memory for
//! tests and offline plans).

pub mod kubectl;
pub mod memory;

use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::types::{ApiObject, ObjectRef};

/// Interval between readiness polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Backend trait for cluster operations.
pub trait Cluster: Send + Sync {
    /// Short backend name, for logs and state records
    fn name(&self) -> &str;

    /// Fetch the live object, or `None` if it does not exist.
    fn get(&self, object: &ObjectRef) -> Result<Option<ApiObject>>;

    /// Create or update an object.
    ///
    /// Returns the live object, including platform-assigned fields.
    fn apply(&self, object: &ApiObject) -> Result<ApiObject>;

    /// Delete an object. Returns `false` if it did not exist.
    fn delete(&self, object: &ObjectRef) -> Result<bool>;

    /// Whether the object exists and is ready to be depended on.
    fn is_ready(&self, object: &ObjectRef) -> Result<bool>;

    /// Interval between readiness polls
    fn poll_interval(&self) -> Duration {
        POLL_INTERVAL
    }

    /// Poll [`Cluster::is_ready`] until it succeeds or `timeout` elapses.
    fn wait_ready(&self, object: &ObjectRef, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        loop {
            if self.is_ready(object)? {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(Error::Timeout {
                    object: object.to_string(),
                    seconds: timeout.as_secs(),
                });
            }
            log::debug!("waiting for {object} to become ready");
            thread::sleep(self.poll_interval());
        }
    }
}

/// Readiness rules for live objects.
///
/// Namespaces must be `Active`, Deployments must have every replica
/// available, and anything else is ready once it exists.
pub fn object_is_ready(object: &ApiObject) -> bool {
    match object.kind.as_str() {
        "Namespace" => object.str_field(&["status", "phase"]) == Some("Active"),
        "Deployment" => {
            let wanted = object
                .field(&["spec", "replicas"])
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(1);
            let available = object
                .field(&["status", "availableReplicas"])
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0);
            available >= wanted
        }
        _ => true,
    }
}

/// Which backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// In-process cluster emulation
    #[default]
    Memory,
    /// The `kubectl` CLI against a real cluster
    Kubectl,
}

impl BackendKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Kubectl => "kubectl",
        }
    }
}
