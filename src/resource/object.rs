//! Object resource - cluster objects applied as one unit

use anyhow::{Context, Result};
use declarative::{ApplyContext, ApplyResult, FailureHint, Outputs, Resource, ResourceState};
use kubekit::{
    ApiObject, AppSpec, Cluster, NamespaceSpec, ObjectRef, SPEC_HASH_ANNOTATION, SecretSpec,
    VolumeClaimSpec,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Time to wait for an object to become ready
pub const READY_TIMEOUT: Duration = Duration::from_secs(300);

/// Kind of stack entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Namespace,
    Secret,
    VolumeClaim,
    App,
}

impl Kind {
    pub fn resource_type(self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Secret => "secret",
            Self::VolumeClaim => "volume_claim",
            Self::App => "app",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::Secret => "Secret",
            Self::VolumeClaim => "Volume claim",
            Self::App => "App",
        }
    }
}

/// Hash of the canonical JSON of a set of objects
pub fn spec_hash(objects: &[ApiObject]) -> Result<String> {
    let canonical = serde_json::to_vec(objects).context("Failed to serialize objects")?;
    Ok(blake3::hash(&canonical).to_hex().to_string())
}

/// One or more cluster objects applied as a unit
#[derive(Clone)]
pub struct ObjectResource {
    kind: Kind,
    name: String,
    namespace: Option<String>,
    /// Desired objects, annotated with the spec hash
    objects: Vec<ApiObject>,
    spec_hash: String,
    /// Object whose readiness gates dependents
    ready_on: Option<ObjectRef>,
    /// Service fronting an app
    service: Option<ObjectRef>,
    cluster: Arc<dyn Cluster>,
}

impl ObjectResource {
    fn new(
        kind: Kind,
        name: &str,
        namespace: Option<&str>,
        objects: Vec<ApiObject>,
        cluster: Arc<dyn Cluster>,
    ) -> Result<Self> {
        let hash = spec_hash(&objects)?;
        let objects = objects
            .into_iter()
            .map(|mut object| {
                object
                    .metadata
                    .annotations
                    .insert(SPEC_HASH_ANNOTATION.to_string(), hash.clone());
                object
            })
            .collect();

        Ok(Self {
            kind,
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            objects,
            spec_hash: hash,
            ready_on: None,
            service: None,
            cluster,
        })
    }

    pub fn namespace(spec: &NamespaceSpec, cluster: Arc<dyn Cluster>) -> Result<Self> {
        let mut resource = Self::new(
            Kind::Namespace,
            &spec.name,
            None,
            vec![spec.to_object()],
            cluster,
        )?;
        resource.ready_on = Some(ObjectRef::namespace(&spec.name));
        Ok(resource)
    }

    /// A secret is usable as soon as it exists
    pub fn secret(spec: &SecretSpec, cluster: Arc<dyn Cluster>) -> Result<Self> {
        Self::new(
            Kind::Secret,
            &spec.name,
            Some(&spec.namespace),
            vec![spec.to_object()],
            cluster,
        )
    }

    /// A claim is usable as soon as it exists; binding may wait for its
    /// first consumer
    pub fn volume_claim(spec: &VolumeClaimSpec, cluster: Arc<dyn Cluster>) -> Result<Self> {
        Self::new(
            Kind::VolumeClaim,
            &spec.name,
            Some(&spec.namespace),
            vec![spec.to_object()],
            cluster,
        )
    }

    /// An app is ready once its Deployment has every replica available
    pub fn app(spec: &AppSpec, cluster: Arc<dyn Cluster>) -> Result<Self> {
        let objects = spec
            .to_objects()
            .with_context(|| format!("Failed to compile app {}", spec.name))?;
        let mut resource = Self::new(
            Kind::App,
            &spec.name,
            Some(&spec.namespace),
            objects,
            cluster,
        )?;
        resource.ready_on = Some(spec.deployment_ref());
        resource.service = spec.service_ref();
        Ok(resource)
    }

    /// Desired objects, as they will be applied
    pub fn objects(&self) -> &[ApiObject] {
        &self.objects
    }

    /// Live counterparts of the desired objects
    pub fn live_objects(&self) -> Result<Vec<Option<ApiObject>>> {
        self.objects
            .iter()
            .map(|object| {
                let reference = object.object_ref();
                self.cluster
                    .get(&reference)
                    .with_context(|| format!("Failed to read {reference}"))
            })
            .collect()
    }

    fn short_hash(hash: &str) -> String {
        hash.chars().take(12).collect()
    }
}

impl fmt::Debug for ObjectResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectResource")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("spec_hash", &self.spec_hash)
            .field("cluster", &self.cluster.name())
            .finish_non_exhaustive()
    }
}

impl Resource for ObjectResource {
    fn id(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}/{}", self.kind.resource_type(), ns, self.name),
            None => format!("{}/{}", self.kind.resource_type(), self.name),
        }
    }

    fn description(&self) -> String {
        let target = match &self.namespace {
            Some(ns) => format!("{ns}/{}", self.name),
            None => self.name.clone(),
        };
        match self.kind {
            Kind::App if self.service.is_some() => format!("App {target} (Deployment + Service)"),
            kind => format!("{} {target}", kind.label()),
        }
    }

    fn resource_type(&self) -> &'static str {
        self.kind.resource_type()
    }

    fn current_state(&self) -> Result<ResourceState> {
        let live = self.live_objects()?;

        if live.iter().all(Option::is_none) {
            return Ok(ResourceState::Absent);
        }

        let stale = live.iter().find_map(|object| match object {
            None => Some("absent".to_string()),
            Some(object) => match object.spec_hash() {
                Some(hash) if hash == self.spec_hash => None,
                Some(hash) => Some(Self::short_hash(hash)),
                None => Some("unmanaged".to_string()),
            },
        });

        Ok(match stale {
            None => self.desired_state(),
            Some(from) => ResourceState::Modified {
                from,
                to: Self::short_hash(&self.spec_hash),
            },
        })
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present {
            details: Some(Self::short_hash(&self.spec_hash)),
        }
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        let existed = self.live_objects()?.iter().any(Option::is_some);

        for object in &self.objects {
            let reference = object.object_ref();
            let live = self
                .cluster
                .apply(object)
                .with_context(|| format!("Failed to apply {reference}"))?;
            log::info!(
                "Applied {reference} (resourceVersion {})",
                live.metadata.resource_version.as_deref().unwrap_or("-")
            );
        }

        Ok(if existed {
            ApplyResult::Modified
        } else {
            ApplyResult::Created
        })
    }

    fn wait_ready(&self, ctx: &ApplyContext) -> Result<()> {
        if ctx.dry_run {
            return Ok(());
        }
        if let Some(reference) = &self.ready_on {
            self.cluster
                .wait_ready(reference, READY_TIMEOUT)
                .with_context(|| format!("{reference} did not become ready"))?;
        }
        Ok(())
    }

    fn outputs(&self) -> Result<Outputs> {
        let mut outputs = Outputs::new();

        if let Some(primary) = self.objects.first() {
            let reference = primary.object_ref();
            if let Some(live) = self.cluster.get(&reference)? {
                outputs.insert("name".to_string(), live.metadata.name.clone());
                if let Some(uid) = live.metadata.uid {
                    outputs.insert("uid".to_string(), uid);
                }
            }
        }

        if let Some(reference) = &self.service
            && let Some(live) = self.cluster.get(reference)?
        {
            outputs.insert("service".to_string(), live.metadata.name.clone());
            if let Some(ip) = live.str_field(&["spec", "clusterIP"]) {
                outputs.insert("clusterIP".to_string(), ip.to_string());
            }
            let ingress = live
                .field(&["status", "loadBalancer", "ingress"])
                .and_then(|ingress| ingress.get(0));
            if let Some(address) = ingress
                .and_then(|i| i.get("ip").or_else(|| i.get("hostname")))
                .and_then(serde_json::Value::as_str)
            {
                outputs.insert("loadBalancerIP".to_string(), address.to_string());
            }
        }

        Ok(outputs)
    }

    fn failure_hint(&self, error: &anyhow::Error) -> FailureHint {
        match error.downcast_ref::<kubekit::Error>().map(kubekit::Error::category) {
            Some(category) => {
                let advice = format!("{}: {}", category.description(), category.advice());
                FailureHint {
                    retryable: category.is_retryable(),
                    advice: Some(advice),
                }
            }
            None => FailureHint::default(),
        }
    }

    fn remove(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        let mut removed = false;
        for object in self.objects.iter().rev() {
            let reference = object.object_ref();
            removed |= self
                .cluster
                .delete(&reference)
                .with_context(|| format!("Failed to delete {reference}"))?;
        }

        Ok(if removed {
            ApplyResult::Removed
        } else {
            ApplyResult::NoChange
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubekit::{MemoryCluster, PortSpec, ServiceType, WriteOp};

    fn cluster() -> (Arc<MemoryCluster>, Arc<dyn Cluster>) {
        let memory = Arc::new(MemoryCluster::new());
        let shared: Arc<dyn Cluster> = memory.clone();
        (memory, shared)
    }

    #[test]
    fn test_ids_and_types() {
        let (_, shared) = cluster();
        let ns = ObjectResource::namespace(&NamespaceSpec::new("mongodb"), shared.clone()).unwrap();
        let secret =
            ObjectResource::secret(&SecretSpec::new("creds", "mongodb"), shared.clone()).unwrap();
        let pvc = ObjectResource::volume_claim(
            &VolumeClaimSpec::new("data", "mongodb", "20Gi"),
            shared,
        )
        .unwrap();

        assert_eq!(ns.id(), "namespace/mongodb");
        assert_eq!(secret.id(), "secret/mongodb/creds");
        assert_eq!(pvc.id(), "volume_claim/mongodb/data");
        assert_eq!(pvc.resource_type(), "volume_claim");
        assert_eq!(secret.description(), "Secret mongodb/creds");
    }

    #[test]
    fn test_spec_hash_annotation() {
        let (_, shared) = cluster();
        let ns = ObjectResource::namespace(&NamespaceSpec::new("db"), shared.clone()).unwrap();
        let same = ObjectResource::namespace(&NamespaceSpec::new("db"), shared.clone()).unwrap();
        let other = ObjectResource::namespace(&NamespaceSpec::new("other"), shared).unwrap();

        assert_eq!(ns.spec_hash, same.spec_hash);
        assert_ne!(ns.spec_hash, other.spec_hash);
        assert_eq!(ns.objects()[0].spec_hash(), Some(ns.spec_hash.as_str()));
    }

    #[test]
    fn test_state_follows_spec_hash() {
        let (memory, shared) = cluster();
        let ns = ObjectResource::namespace(&NamespaceSpec::new("db"), shared.clone()).unwrap();
        ns.apply(&mut ApplyContext::default()).unwrap();

        let v1 = SecretSpec::new("creds", "db").with_entry("user", "admin");
        let secret = ObjectResource::secret(&v1, shared.clone()).unwrap();
        assert_eq!(secret.current_state().unwrap(), ResourceState::Absent);

        let mut ctx = ApplyContext::default();
        assert!(matches!(secret.apply(&mut ctx).unwrap(), ApplyResult::Created));
        assert!(!secret.needs_apply().unwrap());

        let v2 = ObjectResource::secret(&v1.with_entry("user", "root"), shared).unwrap();
        assert!(matches!(
            v2.current_state().unwrap(),
            ResourceState::Modified { .. }
        ));
        assert!(matches!(v2.apply(&mut ctx).unwrap(), ApplyResult::Modified));
        assert_eq!(memory.writes().last().unwrap().op, WriteOp::Update);
    }

    #[test]
    fn test_app_outputs() {
        let (memory, shared) = cluster();
        memory.apply(&NamespaceSpec::new("db").to_object()).unwrap();

        let spec = AppSpec::new("ui", "db", "mongo-express:1.0.2")
            .with_port(PortSpec::new("http", 8081, 8081))
            .with_service_type(ServiceType::LoadBalancer);
        let app = ObjectResource::app(&spec, shared).unwrap();
        let mut ctx = ApplyContext::default();
        app.apply(&mut ctx).unwrap();
        app.wait_ready(&ctx).unwrap();

        let outputs = app.outputs().unwrap();
        assert_eq!(outputs.get("name").map(String::as_str), Some("ui"));
        assert_eq!(outputs.get("service").map(String::as_str), Some("ui"));
        assert!(outputs.contains_key("uid"));
        assert!(outputs.contains_key("clusterIP"));
        assert!(outputs.contains_key("loadBalancerIP"));
    }

    #[test]
    fn test_remove() {
        let (memory, shared) = cluster();
        let ns = ObjectResource::namespace(&NamespaceSpec::new("db"), shared).unwrap();
        let mut ctx = ApplyContext::default();
        ns.apply(&mut ctx).unwrap();

        assert!(matches!(ns.remove(&mut ctx).unwrap(), ApplyResult::Removed));
        assert!(matches!(ns.remove(&mut ctx).unwrap(), ApplyResult::NoChange));
        assert_eq!(memory.object_count(), 0);
    }

    #[test]
    fn test_failure_hint_follows_error_category() {
        let (memory, shared) = cluster();
        let ns = ObjectResource::namespace(&NamespaceSpec::new("db"), shared.clone()).unwrap();
        ns.apply(&mut ApplyContext::default()).unwrap();

        let secret = ObjectResource::secret(&SecretSpec::new("creds", "db"), shared).unwrap();
        memory.inject_conflicts("creds", 1);
        let err = secret.apply(&mut ApplyContext::default()).unwrap_err();
        let hint = secret.failure_hint(&err);
        assert!(hint.retryable);
        assert!(hint.advice.unwrap().starts_with("Update conflict"));

        memory.inject_failure("creds", "denied by policy");
        let err = secret.apply(&mut ApplyContext::default()).unwrap_err();
        let hint = secret.failure_hint(&err);
        assert!(!hint.retryable);
        assert!(hint.advice.unwrap().starts_with("Invalid object"));

        let unrelated = anyhow::anyhow!("something else");
        assert_eq!(secret.failure_hint(&unrelated), FailureHint::default());
    }

    #[test]
    fn test_debug_hides_secret_values() {
        let (_, shared) = cluster();
        let secret = ObjectResource::secret(
            &SecretSpec::new("creds", "db").with_entry("password", "hunter2"),
            shared,
        )
        .unwrap();
        assert!(!format!("{secret:?}").contains("hunter2"));
    }
}
