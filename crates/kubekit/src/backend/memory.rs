//! In-process cluster backend.
//!
//! Keeps objects in memory, assigns the fields the platform would (uid,
//! resourceVersion, cluster IPs, status) and emulates its admission checks.
//! Every write lands in a log so callers can assert on ordering and
//! idempotency.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Value, json};

use crate::backend::{Cluster, object_is_ready};
use crate::error::{Error, Result};
use crate::quantity::{parse_bytes, parse_cpu};
use crate::types::{ApiObject, ObjectRef};

/// Kind of write recorded in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Update,
    Delete,
}

/// A single write against the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub seq: u64,
    pub op: WriteOp,
    pub object: ObjectRef,
}

struct Entry {
    /// The object as the caller applied it
    applied: ApiObject,
    /// The object with platform fields filled in
    live: ApiObject,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectRef, Entry>,
    counter: u64,
    writes: Vec<WriteRecord>,
    quotas: HashMap<String, usize>,
    failures: HashMap<String, String>,
    conflicts: HashMap<String, usize>,
    stalled: HashSet<String>,
}

impl Inner {
    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn record(&mut self, op: WriteOp, object: ObjectRef) {
        let seq = self.writes.len() as u64 + 1;
        self.writes.push(WriteRecord { seq, op, object });
    }

    fn live(&self, object: &ObjectRef) -> Option<&ApiObject> {
        self.objects.get(object).map(|e| &e.live)
    }

    fn count_in_namespace(&self, namespace: &str) -> usize {
        self.objects
            .keys()
            .filter(|r| r.namespace.as_deref() == Some(namespace))
            .count()
    }
}

/// An in-memory cluster.
///
/// Rejects what a real API server (or its admission controllers) would
/// reject for the kinds homestack declares:
/// - namespaced objects whose namespace does not exist
/// - malformed cpu, memory and storage quantities
/// - Deployments referencing a missing secret, secret key or claim
/// - creates beyond a per-namespace object quota
/// - objects whose name has an injected failure, on apply and delete
#[derive(Default)]
pub struct MemoryCluster {
    inner: Mutex<Inner>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Limit the number of objects a namespace may hold
    pub fn set_quota(&self, namespace: impl Into<String>, max_objects: usize) {
        self.lock().quotas.insert(namespace.into(), max_objects);
    }

    /// Make every apply or delete of objects with this name fail
    pub fn inject_failure(&self, name: impl Into<String>, message: impl Into<String>) {
        self.lock().failures.insert(name.into(), message.into());
    }

    pub fn clear_failure(&self, name: &str) {
        self.lock().failures.remove(name);
    }

    /// Make the next `times` applies of objects with this name hit an
    /// update conflict
    pub fn inject_conflicts(&self, name: impl Into<String>, times: usize) {
        self.lock().conflicts.insert(name.into(), times);
    }

    /// Keep objects with this name from ever reporting ready
    pub fn stall(&self, name: impl Into<String>) {
        self.lock().stalled.insert(name.into());
    }

    /// All writes so far, in order
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    /// Number of stored objects
    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// References of all stored objects
    pub fn object_refs(&self) -> Vec<ObjectRef> {
        self.lock().objects.keys().cloned().collect()
    }
}

impl Cluster for MemoryCluster {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, object: &ObjectRef) -> Result<Option<ApiObject>> {
        Ok(self.lock().live(object).cloned())
    }

    fn apply(&self, object: &ApiObject) -> Result<ApiObject> {
        let reference = object.object_ref();
        let mut inner = self.lock();

        if let Some(message) = inner.failures.get(&object.metadata.name) {
            return Err(Error::Invalid {
                object: reference.to_string(),
                message: message.clone(),
            });
        }
        if let Some(remaining) = inner.conflicts.get_mut(&object.metadata.name)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(Error::Conflict {
                object: reference.to_string(),
                message: "the object has been modified".to_string(),
            });
        }

        if let Some(existing) = inner.objects.get(&reference)
            && existing.applied == *object
        {
            log::debug!("{reference} unchanged");
            return Ok(existing.live.clone());
        }

        if let Some(namespace) = &reference.namespace
            && inner.live(&ObjectRef::namespace(namespace)).is_none()
        {
            return Err(Error::NamespaceMissing {
                namespace: namespace.clone(),
                object: reference.to_string(),
            });
        }

        validate_quantities(object, &reference)?;
        if object.kind == "Deployment" {
            check_references(&inner, object, &reference)?;
        }

        let existing = inner.objects.get(&reference).map(|e| e.live.clone());
        let live = match existing {
            Some(previous) => {
                let version = inner.next();
                let live = materialize(object, Some(&previous), version, &mut inner);
                inner.record(WriteOp::Update, reference.clone());
                log::debug!("updated {reference}");
                live
            }
            None => {
                if let Some(namespace) = &reference.namespace
                    && let Some(&max) = inner.quotas.get(namespace)
                    && inner.count_in_namespace(namespace) >= max
                {
                    return Err(Error::QuotaExceeded {
                        object: reference.to_string(),
                        message: format!("namespace {namespace} is limited to {max} objects"),
                    });
                }
                let version = inner.next();
                let live = materialize(object, None, version, &mut inner);
                inner.record(WriteOp::Create, reference.clone());
                log::debug!("created {reference}");
                live
            }
        };

        inner.objects.insert(
            reference,
            Entry {
                applied: object.clone(),
                live: live.clone(),
            },
        );
        Ok(live)
    }

    fn delete(&self, object: &ObjectRef) -> Result<bool> {
        let mut inner = self.lock();
        if let Some(message) = inner.failures.get(&object.name) {
            return Err(Error::Permission {
                message: format!("{object}: {message}"),
            });
        }
        if inner.objects.remove(object).is_none() {
            return Ok(false);
        }
        inner.record(WriteOp::Delete, object.clone());

        // Namespace deletion takes its contents with it
        if object.kind == "Namespace" {
            let contained: Vec<ObjectRef> = inner
                .objects
                .keys()
                .filter(|r| r.namespace.as_deref() == Some(object.name.as_str()))
                .cloned()
                .collect();
            for reference in contained {
                inner.objects.remove(&reference);
                inner.record(WriteOp::Delete, reference);
            }
        }
        log::debug!("deleted {object}");
        Ok(true)
    }

    fn is_ready(&self, object: &ObjectRef) -> Result<bool> {
        let inner = self.lock();
        if inner.stalled.contains(&object.name) {
            return Ok(false);
        }
        Ok(inner.live(object).is_some_and(object_is_ready))
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(10)
    }
}

/// Fill in the fields the platform owns.
///
/// Identity and assigned addresses survive updates.
fn materialize(
    object: &ApiObject,
    previous: Option<&ApiObject>,
    version: u64,
    inner: &mut Inner,
) -> ApiObject {
    let mut live = object.clone();
    live.metadata.resource_version = Some(version.to_string());
    live.metadata.uid = match previous.and_then(|p| p.metadata.uid.clone()) {
        Some(uid) => Some(uid),
        None => Some(format!("{:08x}-0000-4000-8000-{:012x}", version, inner.next())),
    };

    match object.kind.as_str() {
        "Namespace" => {
            live.body.insert("status".into(), json!({ "phase": "Active" }));
        }
        "PersistentVolumeClaim" => {
            live.body.insert("status".into(), json!({ "phase": "Bound" }));
        }
        "Deployment" => {
            let replicas = object
                .field(&["spec", "replicas"])
                .and_then(Value::as_u64)
                .unwrap_or(1);
            live.body.insert(
                "status".into(),
                json!({ "replicas": replicas, "readyReplicas": replicas, "availableReplicas": replicas }),
            );
        }
        "Service" => {
            let previous_ip = previous.and_then(|p| p.str_field(&["spec", "clusterIP"]));
            let cluster_ip = previous_ip.map_or_else(
                || format!("10.96.0.{}", inner.next() % 250 + 2),
                str::to_string,
            );
            if let Some(Value::Object(spec)) = live.body.get_mut("spec") {
                spec.insert("clusterIP".into(), Value::String(cluster_ip));
            }

            if object.str_field(&["spec", "type"]) == Some("LoadBalancer") {
                let previous_lb = previous
                    .and_then(|p| p.field(&["status", "loadBalancer", "ingress"]))
                    .and_then(|ingress| ingress.get(0))
                    .and_then(|first| first.get("ip"))
                    .and_then(Value::as_str);
                let lb_ip = previous_lb.map_or_else(
                    || format!("192.168.100.{}", inner.next() % 250 + 2),
                    str::to_string,
                );
                live.body.insert(
                    "status".into(),
                    json!({ "loadBalancer": { "ingress": [{ "ip": lb_ip }] } }),
                );
            }
        }
        _ => {}
    }
    live
}

/// Reject malformed cpu, memory and storage quantities
fn validate_quantities(object: &ApiObject, reference: &ObjectRef) -> Result<()> {
    let invalid = |field: &str, value: &str| Error::Invalid {
        object: reference.to_string(),
        message: format!("{field}: Invalid value: \"{value}\": quantities must match the regular expression"),
    };

    match object.kind.as_str() {
        "PersistentVolumeClaim" => {
            if let Some(size) = object.str_field(&["spec", "resources", "requests", "storage"])
                && parse_bytes(size).is_none()
            {
                return Err(invalid("spec.resources.requests[storage]", size));
            }
        }
        "Deployment" => {
            for container in containers(object) {
                for section in ["requests", "limits"] {
                    let Some(quantities) = container.get("resources").and_then(|r| r.get(section))
                    else {
                        continue;
                    };
                    if let Some(cpu) = quantities.get("cpu").and_then(Value::as_str)
                        && parse_cpu(cpu).is_none()
                    {
                        return Err(invalid(&format!("resources.{section}[cpu]"), cpu));
                    }
                    if let Some(memory) = quantities.get("memory").and_then(Value::as_str)
                        && parse_bytes(memory).is_none()
                    {
                        return Err(invalid(&format!("resources.{section}[memory]"), memory));
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn containers(object: &ApiObject) -> impl Iterator<Item = &Value> {
    object
        .field(&["spec", "template", "spec", "containers"])
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Reject Deployments whose secrets, secret keys or claims are missing
fn check_references(inner: &Inner, object: &ApiObject, reference: &ObjectRef) -> Result<()> {
    let namespace = reference.namespace.as_deref().unwrap_or_default();
    let missing = |what: String| Error::NotFound {
        object: format!("{what} (referenced by {reference})"),
    };

    for container in containers(object) {
        let env = container.get("env").and_then(Value::as_array);
        for var in env.into_iter().flatten() {
            let Some(selector) = var.get("valueFrom").and_then(|v| v.get("secretKeyRef")) else {
                continue;
            };
            let name = selector.get("name").and_then(Value::as_str).unwrap_or_default();
            let key = selector.get("key").and_then(Value::as_str).unwrap_or_default();
            let secret_ref = ObjectRef::secret(namespace, name);
            let Some(secret) = inner.live(&secret_ref) else {
                return Err(missing(secret_ref.to_string()));
            };
            let has_key = ["stringData", "data"]
                .into_iter()
                .any(|field| secret.field(&[field, key]).is_some());
            if !has_key {
                return Err(missing(format!("key {key} in {secret_ref}")));
            }
        }
    }

    let volumes = object
        .field(&["spec", "template", "spec", "volumes"])
        .and_then(Value::as_array);
    for volume in volumes.into_iter().flatten() {
        if let Some(claim) = volume
            .get("persistentVolumeClaim")
            .and_then(|c| c.get("claimName"))
            .and_then(Value::as_str)
        {
            let claim_ref = ObjectRef::volume_claim(namespace, claim);
            if inner.live(&claim_ref).is_none() {
                return Err(missing(claim_ref.to_string()));
            }
        }
        if let Some(secret) = volume
            .get("secret")
            .and_then(|s| s.get("secretName"))
            .and_then(Value::as_str)
        {
            let secret_ref = ObjectRef::secret(namespace, secret);
            if inner.live(&secret_ref).is_none() {
                return Err(missing(secret_ref.to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::types::{NamespaceSpec, SecretSpec, VolumeClaimSpec};
    use crate::workload::{AppSpec, PortSpec, ResourceLimits, ServiceType, VolumeSource};

    fn cluster_with_namespace() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        cluster.apply(&NamespaceSpec::new("db").to_object()).unwrap();
        cluster
    }

    fn app() -> AppSpec {
        AppSpec::new("mongodb", "db", "mongo:7.0")
            .with_port(PortSpec::new("mongodb", 27017, 27017))
            .with_secret_env("USER", "creds", "username")
            .with_volume("data", VolumeSource::Claim("data".to_string()))
            .with_mount("data", "/data/db")
            .with_resources(ResourceLimits::new("500m", "1Gi", "2", "2Gi"))
    }

    fn apply_all(cluster: &MemoryCluster, objects: &[ApiObject]) -> Result<Vec<ApiObject>> {
        objects.iter().map(|o| cluster.apply(o)).collect()
    }

    #[test]
    fn test_assigns_platform_fields() {
        let cluster = cluster_with_namespace();
        let live = cluster
            .get(&ObjectRef::namespace("db"))
            .unwrap()
            .unwrap();

        assert!(live.metadata.uid.is_some());
        assert!(live.metadata.resource_version.is_some());
        assert_eq!(live.str_field(&["status", "phase"]), Some("Active"));
        assert!(cluster.is_ready(&ObjectRef::namespace("db")).unwrap());
    }

    #[test]
    fn test_rejects_missing_namespace() {
        let cluster = MemoryCluster::new();
        let err = cluster
            .apply(&SecretSpec::new("creds", "db").to_object())
            .unwrap_err();
        assert!(matches!(err, Error::NamespaceMissing { ref namespace, .. } if namespace == "db"));
        assert!(cluster.writes().is_empty());
    }

    #[test]
    fn test_identical_apply_is_noop() {
        let cluster = cluster_with_namespace();
        let secret = SecretSpec::new("creds", "db").with_entry("username", "admin").to_object();

        let first = cluster.apply(&secret).unwrap();
        let second = cluster.apply(&secret).unwrap();

        assert_eq!(first.metadata.resource_version, second.metadata.resource_version);
        assert_eq!(cluster.writes().len(), 2);
        assert_eq!(cluster.object_count(), 2);
    }

    #[test]
    fn test_update_keeps_identity() {
        let cluster = cluster_with_namespace();
        let v1 = SecretSpec::new("creds", "db").with_entry("username", "admin");
        let v2 = v1.clone().with_entry("password", "hunter2");

        let first = cluster.apply(&v1.to_object()).unwrap();
        let second = cluster.apply(&v2.to_object()).unwrap();

        assert_eq!(first.metadata.uid, second.metadata.uid);
        assert_ne!(first.metadata.resource_version, second.metadata.resource_version);
        assert_eq!(cluster.writes().last().unwrap().op, WriteOp::Update);
    }

    #[test]
    fn test_rejects_invalid_quantities() {
        let cluster = cluster_with_namespace();
        let pvc = VolumeClaimSpec::new("data", "db", "twenty gigs").to_object();
        let err = cluster.apply(&pvc).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Invalid);

        cluster.apply(&SecretSpec::new("creds", "db").with_entry("username", "admin").to_object()).unwrap();
        cluster.apply(&VolumeClaimSpec::new("data", "db", "20Gi").to_object()).unwrap();
        let bad = app().with_resources(ResourceLimits::new("lots", "1Gi", "2", "2Gi"));
        let err = cluster.apply(&bad.to_objects().unwrap()[0]).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Invalid);
        assert!(err.to_string().contains("lots"));
    }

    #[test]
    fn test_rejects_missing_references() {
        let cluster = cluster_with_namespace();
        let objects = app().to_objects().unwrap();

        let err = cluster.apply(&objects[0]).unwrap_err();
        assert!(err.to_string().contains("Secret/db/creds"));

        cluster.apply(&SecretSpec::new("creds", "db").with_entry("password", "x").to_object()).unwrap();
        let err = cluster.apply(&objects[0]).unwrap_err();
        assert!(err.to_string().contains("key username"));

        cluster.apply(&SecretSpec::new("creds", "db").with_entry("username", "admin").to_object()).unwrap();
        let err = cluster.apply(&objects[0]).unwrap_err();
        assert!(err.to_string().contains("PersistentVolumeClaim/db/data"));

        cluster.apply(&VolumeClaimSpec::new("data", "db", "20Gi").to_object()).unwrap();
        apply_all(&cluster, &objects).unwrap();
        assert!(cluster.is_ready(&app().deployment_ref()).unwrap());
    }

    #[test]
    fn test_service_addresses() {
        let cluster = cluster_with_namespace();
        cluster.apply(&SecretSpec::new("creds", "db").with_entry("username", "admin").to_object()).unwrap();
        cluster.apply(&VolumeClaimSpec::new("data", "db", "20Gi").to_object()).unwrap();

        let spec = app().with_service_type(ServiceType::LoadBalancer);
        let live = apply_all(&cluster, &spec.to_objects().unwrap()).unwrap();
        let service = &live[1];
        let cluster_ip = service.str_field(&["spec", "clusterIP"]).unwrap().to_string();
        assert!(cluster_ip.starts_with("10.96.0."));
        assert!(service.field(&["status", "loadBalancer", "ingress"]).is_some());

        // An update keeps the assigned address
        let updated = spec.with_replicas(2);
        let live = apply_all(&cluster, &updated.to_objects().unwrap()).unwrap();
        assert_eq!(live[1].str_field(&["spec", "clusterIP"]), Some(cluster_ip.as_str()));
    }

    #[test]
    fn test_quota_exceeded() {
        let cluster = cluster_with_namespace();
        cluster.set_quota("db", 1);
        cluster.apply(&SecretSpec::new("a", "db").to_object()).unwrap();
        let err = cluster.apply(&SecretSpec::new("b", "db").to_object()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Quota);
    }

    #[test]
    fn test_injected_failure() {
        let cluster = cluster_with_namespace();
        cluster.inject_failure("creds", "admission webhook denied the request");
        let secret = SecretSpec::new("creds", "db").to_object();
        assert!(cluster.apply(&secret).is_err());

        cluster.clear_failure("creds");
        assert!(cluster.apply(&secret).is_ok());

        cluster.inject_failure("creds", "object is protected");
        let err = cluster.delete(&secret.object_ref()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Permission);
        assert!(cluster.get(&secret.object_ref()).unwrap().is_some());
    }

    #[test]
    fn test_injected_conflicts_run_out() {
        let cluster = cluster_with_namespace();
        cluster.inject_conflicts("creds", 2);
        let secret = SecretSpec::new("creds", "db").to_object();

        for _ in 0..2 {
            let err = cluster.apply(&secret).unwrap_err();
            assert_eq!(err.category(), ErrorCategory::Conflict);
            assert!(err.is_retryable());
        }
        assert!(cluster.apply(&secret).is_ok());
    }

    #[test]
    fn test_stalled_object_times_out() {
        let cluster = cluster_with_namespace();
        cluster.stall("db");
        let err = cluster
            .wait_ready(&ObjectRef::namespace("db"), Duration::from_millis(30))
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Timeout);
    }

    #[test]
    fn test_namespace_delete_cascades() {
        let cluster = cluster_with_namespace();
        cluster.apply(&SecretSpec::new("creds", "db").to_object()).unwrap();

        assert!(cluster.delete(&ObjectRef::namespace("db")).unwrap());
        assert_eq!(cluster.object_count(), 0);
        assert!(!cluster.delete(&ObjectRef::namespace("db")).unwrap());

        let deletes = cluster
            .writes()
            .iter()
            .filter(|w| w.op == WriteOp::Delete)
            .count();
        assert_eq!(deletes, 2);
    }
}
