//! Workload compilation.
//!
//! An [`AppSpec`] describes a long-running container workload. It compiles to
//! a Deployment plus, when it exposes ports, a Service named after the app.
//!
//! ```text
//! AppSpec (image, ports, env, volumes, resources)
//!     │
//!     ├── Deployment (apps/v1): selector, pod template, volume bindings
//!     └── Service (v1): selector, ports, type
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ApiObject, ObjectMeta, ObjectRef};

// =============================================================================
// App description
// =============================================================================

/// How a workload is exposed on the network
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    NodePort,
    LoadBalancer,
}

/// A named port, exposed on the container and on the service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortSpec {
    pub name: String,
    pub container_port: u16,
    pub service_port: u16,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, container_port: u16, service_port: u16) -> Self {
        Self {
            name: name.into(),
            container_port,
            service_port,
        }
    }
}

/// Where an environment variable's value comes from
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum EnvSource {
    /// A literal value
    Value(String),
    /// A key of a secret in the same namespace
    SecretKeyRef { name: String, key: String },
}

/// A named environment binding
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvBinding {
    pub name: String,
    pub source: EnvSource,
}

/// Backing source of a pod volume
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolumeSource {
    /// A PersistentVolumeClaim by claim name
    Claim(String),
    /// A secret by name
    Secret(String),
    EmptyDir,
}

/// A named pod volume
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeSpec {
    pub name: String,
    pub source: VolumeSource,
}

/// A mount of a named volume into the container
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountSpec {
    pub name: String,
    pub mount_path: String,
}

/// Requests and limits for cpu and memory
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpu_request: String,
    pub memory_request: String,
    pub cpu_limit: String,
    pub memory_limit: String,
}

impl ResourceLimits {
    pub fn new(
        cpu_request: impl Into<String>,
        memory_request: impl Into<String>,
        cpu_limit: impl Into<String>,
        memory_limit: impl Into<String>,
    ) -> Self {
        Self {
            cpu_request: cpu_request.into(),
            memory_request: memory_request.into(),
            cpu_limit: cpu_limit.into(),
            memory_limit: memory_limit.into(),
        }
    }
}

/// A long-running container workload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub replicas: u32,
    pub ports: Vec<PortSpec>,
    pub env: Vec<EnvBinding>,
    pub volumes: Vec<VolumeSpec>,
    pub volume_mounts: Vec<MountSpec>,
    pub resources: Option<ResourceLimits>,
    pub service_type: ServiceType,
}

impl AppSpec {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            image: image.into(),
            replicas: 1,
            ports: Vec::new(),
            env: Vec::new(),
            volumes: Vec::new(),
            volume_mounts: Vec::new(),
            resources: None,
            service_type: ServiceType::ClusterIP,
        }
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_port(mut self, port: PortSpec) -> Self {
        self.ports.push(port);
        self
    }

    /// Bind a literal environment value
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvBinding {
            name: name.into(),
            source: EnvSource::Value(value.into()),
        });
        self
    }

    /// Bind an environment variable to a secret key
    pub fn with_secret_env(
        mut self,
        name: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        self.env.push(EnvBinding {
            name: name.into(),
            source: EnvSource::SecretKeyRef {
                name: secret.into(),
                key: key.into(),
            },
        });
        self
    }

    pub fn with_volume(mut self, name: impl Into<String>, source: VolumeSource) -> Self {
        self.volumes.push(VolumeSpec {
            name: name.into(),
            source,
        });
        self
    }

    pub fn with_mount(mut self, name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        self.volume_mounts.push(MountSpec {
            name: name.into(),
            mount_path: mount_path.into(),
        });
        self
    }

    pub fn with_resources(mut self, resources: ResourceLimits) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_service_type(mut self, service_type: ServiceType) -> Self {
        self.service_type = service_type;
        self
    }

    /// Name of the service fronting this app, if it exposes ports
    pub fn service_name(&self) -> Option<&str> {
        (!self.ports.is_empty()).then_some(self.name.as_str())
    }

    pub fn deployment_ref(&self) -> ObjectRef {
        ObjectRef::new("apps/v1", "Deployment", Some(&self.namespace), &self.name)
    }

    pub fn service_ref(&self) -> Option<ObjectRef> {
        self.service_name()
            .map(|name| ObjectRef::new("v1", "Service", Some(&self.namespace), name))
    }

    fn selector_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("app.kubernetes.io/name".to_string(), self.name.clone());
        labels
    }

    /// Compile to a typed Deployment
    pub fn deployment(&self) -> Deployment {
        let container = Container {
            name: self.name.clone(),
            image: self.image.clone(),
            env: self.env.iter().map(EnvVar::from).collect(),
            ports: self
                .ports
                .iter()
                .map(|p| ContainerPort {
                    name: Some(p.name.clone()),
                    container_port: p.container_port,
                    protocol: Some("TCP".to_string()),
                })
                .collect(),
            resources: self.resources.as_ref().map(|r| ResourceRequirements {
                requests: Some(ResourceQuantity {
                    cpu: Some(r.cpu_request.clone()),
                    memory: Some(r.memory_request.clone()),
                }),
                limits: Some(ResourceQuantity {
                    cpu: Some(r.cpu_limit.clone()),
                    memory: Some(r.memory_limit.clone()),
                }),
            }),
            volume_mounts: self
                .volume_mounts
                .iter()
                .map(|m| VolumeMount {
                    name: m.name.clone(),
                    mount_path: m.mount_path.clone(),
                })
                .collect(),
        };

        Deployment {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            metadata: ObjectMeta::namespaced(&self.name, &self.namespace),
            spec: DeploymentSpec {
                replicas: self.replicas,
                selector: LabelSelector {
                    match_labels: self.selector_labels(),
                },
                template: PodTemplateSpec {
                    metadata: PodMeta {
                        labels: self.selector_labels(),
                    },
                    spec: PodSpec {
                        containers: vec![container],
                        volumes: self.volumes.iter().map(Volume::from).collect(),
                    },
                },
            },
        }
    }

    /// Compile to a typed Service, if the app exposes ports
    pub fn service(&self) -> Option<Service> {
        let name = self.service_name()?;
        Some(Service {
            api_version: "v1".to_string(),
            kind: "Service".to_string(),
            metadata: ObjectMeta::namespaced(name, &self.namespace),
            spec: ServiceSpec {
                selector: self.selector_labels(),
                ports: self
                    .ports
                    .iter()
                    .map(|p| ServicePort {
                        name: p.name.clone(),
                        port: p.service_port,
                        target_port: p.container_port,
                        protocol: "TCP".to_string(),
                    })
                    .collect(),
                type_: self.service_type,
            },
        })
    }

    /// Compile to wire objects: the Deployment, then the Service if any
    pub fn to_objects(&self) -> Result<Vec<ApiObject>> {
        let mut objects = vec![serde_json::from_value(serde_json::to_value(
            self.deployment(),
        )?)?];
        if let Some(service) = self.service() {
            objects.push(serde_json::from_value(serde_json::to_value(service)?)?);
        }
        Ok(objects)
    }
}

// =============================================================================
// Deployment
// =============================================================================

/// Kubernetes Deployment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: DeploymentSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    pub replicas: u32,
    pub selector: LabelSelector,
    pub template: PodTemplateSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateSpec {
    pub metadata: PodMeta,
    pub spec: PodSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodMeta {
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

/// Environment variable: a literal value or a reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    pub secret_key_ref: SecretKeySelector,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

impl From<&EnvBinding> for EnvVar {
    fn from(binding: &EnvBinding) -> Self {
        match &binding.source {
            EnvSource::Value(value) => Self {
                name: binding.name.clone(),
                value: Some(value.clone()),
                value_from: None,
            },
            EnvSource::SecretKeyRef { name, key } => Self {
                name: binding.name.clone(),
                value: None,
                value_from: Some(EnvVarSource {
                    secret_key_ref: SecretKeySelector {
                        name: name.clone(),
                        key: key.clone(),
                    },
                }),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub container_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceQuantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceQuantity>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuantity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Pod volume
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<ClaimVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirVolumeSource>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimVolumeSource {
    pub claim_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretVolumeSource {
    pub secret_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmptyDirVolumeSource {}

impl From<&VolumeSpec> for Volume {
    fn from(spec: &VolumeSpec) -> Self {
        let mut volume = Self {
            name: spec.name.clone(),
            persistent_volume_claim: None,
            secret: None,
            empty_dir: None,
        };
        match &spec.source {
            VolumeSource::Claim(claim_name) => {
                volume.persistent_volume_claim = Some(ClaimVolumeSource {
                    claim_name: claim_name.clone(),
                });
            }
            VolumeSource::Secret(secret_name) => {
                volume.secret = Some(SecretVolumeSource {
                    secret_name: secret_name.clone(),
                });
            }
            VolumeSource::EmptyDir => volume.empty_dir = Some(EmptyDirVolumeSource {}),
        }
        volume
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

// =============================================================================
// Service
// =============================================================================

/// Kubernetes Service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ServiceSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
    #[serde(rename = "type")]
    pub type_: ServiceType,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
    pub protocol: String,
}
