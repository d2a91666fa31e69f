//! Cluster object types.
//!
//! [`ApiObject`] is the wire shape every backend speaks: apiVersion, kind,
//! metadata, and whatever else the kind carries (spec, data, status). The
//! typed specs below build those objects for the kinds a stack declares.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Label value identifying objects managed by homestack
pub const MANAGED_BY: &str = "homestack";

/// Annotation carrying the hash of the desired spec an object was applied from
pub const SPEC_HASH_ANNOTATION: &str = "homestack.dev/spec-hash";

// =============================================================================
// Metadata and references
// =============================================================================

/// Standard Kubernetes ObjectMeta (the subset homestack reads and writes)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace; `None` for cluster-scoped kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Assigned by the platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Assigned by the platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ObjectMeta {
    /// Metadata for a cluster-scoped object, with standard labels
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut labels = BTreeMap::new();
        labels.insert("app.kubernetes.io/name".to_string(), name.clone());
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            MANAGED_BY.to_string(),
        );
        Self {
            name,
            labels,
            ..Default::default()
        }
    }

    /// Metadata for a namespaced object, with standard labels
    pub fn namespaced(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::new(name)
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// Identity of an object in the cluster
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    pub fn namespace(name: &str) -> Self {
        Self::new("v1", "Namespace", None, name)
    }

    pub fn secret(namespace: &str, name: &str) -> Self {
        Self::new("v1", "Secret", Some(namespace), name)
    }

    pub fn volume_claim(namespace: &str, name: &str) -> Self {
        Self::new("v1", "PersistentVolumeClaim", Some(namespace), name)
    }

    /// Lowercase plural resource name, as kubectl expects it
    pub fn resource_name(&self) -> String {
        match self.kind.as_str() {
            "PersistentVolumeClaim" => "persistentvolumeclaims".to_string(),
            kind => format!("{}s", kind.to_lowercase()),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

// =============================================================================
// ApiObject
// =============================================================================

/// A cluster object in its wire form
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiObject {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    /// Every other top-level field (spec, data, stringData, type, status)
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl ApiObject {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, metadata: ObjectMeta) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata,
            body: Map::new(),
        }
    }

    /// Set a top-level field
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.body.insert(key.into(), value);
        self
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(
            self.api_version.clone(),
            self.kind.clone(),
            self.metadata.namespace.as_deref(),
            self.metadata.name.clone(),
        )
    }

    /// Walk nested body fields, e.g. `["spec", "clusterIP"]`
    pub fn field(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.body.get(*first)?;
        for key in rest {
            current = current.get(*key)?;
        }
        Some(current)
    }

    /// Nested string field
    pub fn str_field(&self, path: &[&str]) -> Option<&str> {
        self.field(path).and_then(Value::as_str)
    }

    /// The spec hash this object was applied from, if any
    pub fn spec_hash(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(SPEC_HASH_ANNOTATION)
            .map(String::as_str)
    }

    /// Whether this is a namespaced object
    pub fn is_namespaced(&self) -> bool {
        self.metadata.namespace.is_some()
    }
}

// =============================================================================
// Namespace
// =============================================================================

/// A named isolation boundary
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamespaceSpec {
    pub name: String,
}

impl NamespaceSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn to_object(&self) -> ApiObject {
        ApiObject::new("v1", "Namespace", ObjectMeta::new(&self.name))
    }
}

// =============================================================================
// Secret
// =============================================================================

/// A named store of sensitive key/value pairs
///
/// Values are written through `stringData`, so they reach the cluster
/// exactly as given.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub name: String,
    pub namespace: String,
    /// Secret type tag, e.g. `Opaque`
    pub secret_type: String,
    pub string_data: BTreeMap<String, String>,
}

impl SecretSpec {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            secret_type: "Opaque".to_string(),
            string_data: BTreeMap::new(),
        }
    }

    pub fn with_type(mut self, secret_type: impl Into<String>) -> Self {
        self.secret_type = secret_type.into();
        self
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.string_data.insert(key.into(), value.into());
        self
    }

    pub fn to_object(&self) -> ApiObject {
        ApiObject::new(
            "v1",
            "Secret",
            ObjectMeta::namespaced(&self.name, &self.namespace),
        )
        .with_field("type", Value::String(self.secret_type.clone()))
        .with_field("stringData", json!(self.string_data))
    }
}

impl fmt::Debug for SecretSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretSpec")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("secret_type", &self.secret_type)
            .field("keys", &self.string_data.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// PersistentVolumeClaim
// =============================================================================

/// Volume access mode
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    ReadWriteOncePod,
}

/// A request for durable storage
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeClaimSpec {
    pub name: String,
    pub namespace: String,
    pub access_modes: Vec<AccessMode>,
    /// Storage class; cluster default when `None`
    pub storage_class: Option<String>,
    /// Requested size, e.g. `20Gi`
    pub size: String,
}

impl VolumeClaimSpec {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        size: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            access_modes: vec![AccessMode::ReadWriteOnce],
            storage_class: None,
            size: size.into(),
        }
    }

    pub fn with_storage_class(mut self, class: impl Into<String>) -> Self {
        self.storage_class = Some(class.into());
        self
    }

    pub fn with_access_modes(mut self, modes: Vec<AccessMode>) -> Self {
        self.access_modes = modes;
        self
    }

    pub fn to_object(&self) -> ApiObject {
        let mut spec = json!({
            "accessModes": self.access_modes,
            "resources": { "requests": { "storage": self.size } },
        });
        if let Some(class) = &self.storage_class {
            spec["storageClassName"] = Value::String(class.clone());
        }
        ApiObject::new(
            "v1",
            "PersistentVolumeClaim",
            ObjectMeta::namespaced(&self.name, &self.namespace),
        )
        .with_field("spec", spec)
    }
}
