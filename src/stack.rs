//! The MongoDB stack.
//!
//! Declares a namespace, the credentials secrets, a data volume claim, the
//! database and the Mongo Express admin UI, with the dependency edges
//! between them:
//!
//! ```text
//! namespace ─┬─ mongodb-secret ───────┐
//!            ├─ mongodb-data ─────────┼─ mongodb ─┐
//!            │                        │           ├─ mongo-express
//!            └─ mongo-express-secret ─┴───────────┘
//! ```

use anyhow::Result;
use declarative::{ExecuteSummary, ExecutionPlan, ResourceGraph, ResourceHandle};
use kubekit::{
    AppSpec, Cluster, NamespaceSpec, PortSpec, ResourceLimits, SecretSpec, ServiceType,
    VolumeClaimSpec, VolumeSource,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::resource::ObjectResource;
use crate::settings::Settings;

pub const MONGODB_SECRET: &str = "mongodb-secret";
pub const MONGODB_DATA: &str = "mongodb-data";
pub const MONGODB: &str = "mongodb";
pub const MONGO_EXPRESS_SECRET: &str = "mongo-express-secret";
pub const MONGO_EXPRESS: &str = "mongo-express";

/// Mongo Express requests and limits
const MONGO_EXPRESS_RESOURCES: (&str, &str, &str, &str) = ("100m", "128Mi", "500m", "256Mi");

/// Where a declared output's value comes from
#[derive(Debug, Clone)]
struct OutputSource {
    key: &'static str,
    resource_id: String,
    field: &'static str,
    /// Value known at declaration time
    declared: Option<String>,
}

/// Outputs the stack exports
#[derive(Debug, Clone, Default)]
pub struct StackOutputs {
    sources: Vec<OutputSource>,
}

impl StackOutputs {
    fn export(
        &mut self,
        key: &'static str,
        resource_id: String,
        field: &'static str,
        declared: Option<&str>,
    ) {
        self.sources.push(OutputSource {
            key,
            resource_id,
            field,
            declared: declared.map(str::to_string),
        });
    }

    /// Values known before anything is applied
    pub fn declared(&self) -> BTreeMap<String, String> {
        self.sources
            .iter()
            .filter_map(|s| s.declared.clone().map(|v| (s.key.to_string(), v)))
            .collect()
    }

    /// Values read back from an apply run; outputs of resources that did not
    /// become ready are absent
    pub fn resolve(&self, summary: &ExecuteSummary) -> BTreeMap<String, String> {
        self.sources
            .iter()
            .filter_map(|s| {
                summary
                    .outputs_of(&s.resource_id)
                    .and_then(|outputs| outputs.get(s.field))
                    .map(|v| (s.key.to_string(), v.clone()))
            })
            .collect()
    }
}

/// A declared stack: resources, their dependency graph, and outputs
pub struct Stack {
    graph: ResourceGraph,
    resources: Vec<ObjectResource>,
    outputs: StackOutputs,
}

impl Stack {
    fn empty() -> Self {
        Self {
            graph: ResourceGraph::new(),
            resources: Vec::new(),
            outputs: StackOutputs::default(),
        }
    }

    fn add(
        &mut self,
        resource: ObjectResource,
        depends_on: &[&ResourceHandle],
    ) -> Result<ResourceHandle> {
        let handle = self.graph.declare(resource.clone(), depends_on)?;
        self.resources.push(resource);
        Ok(handle)
    }

    /// Declare the MongoDB stack against a cluster
    pub fn declare(settings: &Settings, cluster: &Arc<dyn Cluster>) -> Result<Self> {
        let ns = settings.namespace.as_str();
        let mut stack = Self::empty();

        let namespace = stack.add(
            ObjectResource::namespace(&NamespaceSpec::new(ns), Arc::clone(cluster))?,
            &[],
        )?;

        let mongodb_secret = stack.add(
            ObjectResource::secret(
                &SecretSpec::new(MONGODB_SECRET, ns)
                    .with_entry("MONGO_INITDB_ROOT_USERNAME", &settings.mongodb_root_username)
                    .with_entry("MONGO_INITDB_ROOT_PASSWORD", &settings.mongodb_root_password),
                Arc::clone(cluster),
            )?,
            &[&namespace],
        )?;

        let mongodb_data = stack.add(
            ObjectResource::volume_claim(
                &VolumeClaimSpec::new(MONGODB_DATA, ns, &settings.data_size)
                    .with_storage_class(&settings.storage_class),
                Arc::clone(cluster),
            )?,
            &[&namespace],
        )?;

        let mongodb_app = AppSpec::new(MONGODB, ns, &settings.mongodb_image)
            .with_port(PortSpec::new("mongodb", 27017, 27017))
            .with_secret_env(
                "MONGO_INITDB_ROOT_USERNAME",
                MONGODB_SECRET,
                "MONGO_INITDB_ROOT_USERNAME",
            )
            .with_secret_env(
                "MONGO_INITDB_ROOT_PASSWORD",
                MONGODB_SECRET,
                "MONGO_INITDB_ROOT_PASSWORD",
            )
            .with_mount("data", "/data/db")
            .with_volume("data", VolumeSource::Claim(MONGODB_DATA.to_string()))
            .with_resources(ResourceLimits::new(
                &settings.cpu,
                &settings.memory,
                &settings.cpu_limit,
                &settings.memory_limit,
            ))
            .with_service_type(ServiceType::ClusterIP);
        let mongodb = stack.add(
            ObjectResource::app(&mongodb_app, Arc::clone(cluster))?,
            &[&namespace, &mongodb_secret, &mongodb_data],
        )?;

        let mongo_express_secret = stack.add(
            ObjectResource::secret(
                &SecretSpec::new(MONGO_EXPRESS_SECRET, ns)
                    .with_entry(
                        "ME_CONFIG_MONGODB_ADMINUSERNAME",
                        &settings.mongodb_root_username,
                    )
                    .with_entry(
                        "ME_CONFIG_MONGODB_ADMINPASSWORD",
                        &settings.mongodb_root_password,
                    )
                    .with_entry("ME_CONFIG_BASICAUTH_USERNAME", &settings.mongo_express_username)
                    .with_entry("ME_CONFIG_BASICAUTH_PASSWORD", &settings.mongo_express_password),
                Arc::clone(cluster),
            )?,
            &[&namespace],
        )?;

        let (cpu, memory, cpu_limit, memory_limit) = MONGO_EXPRESS_RESOURCES;
        let mut mongo_express_app = AppSpec::new(MONGO_EXPRESS, ns, &settings.mongo_express_image)
            .with_port(PortSpec::new("http", 8081, 8081))
            .with_env("ME_CONFIG_MONGODB_SERVER", MONGODB)
            .with_env("ME_CONFIG_MONGODB_PORT", "27017")
            .with_env("ME_CONFIG_MONGODB_ENABLE_ADMIN", "true")
            .with_env("ME_CONFIG_BASICAUTH", &settings.basic_auth_enabled);
        for key in [
            "ME_CONFIG_MONGODB_ADMINUSERNAME",
            "ME_CONFIG_MONGODB_ADMINPASSWORD",
            "ME_CONFIG_BASICAUTH_USERNAME",
            "ME_CONFIG_BASICAUTH_PASSWORD",
        ] {
            mongo_express_app = mongo_express_app.with_secret_env(key, MONGO_EXPRESS_SECRET, key);
        }
        let mongo_express_app = mongo_express_app
            .with_resources(ResourceLimits::new(cpu, memory, cpu_limit, memory_limit))
            .with_service_type(ServiceType::LoadBalancer);
        let mongo_express = stack.add(
            ObjectResource::app(&mongo_express_app, Arc::clone(cluster))?,
            &[&mongodb, &mongo_express_secret],
        )?;

        stack
            .outputs
            .export("namespace", namespace.id().to_string(), "name", Some(ns));
        stack.outputs.export(
            "services.mongodb",
            mongodb.id().to_string(),
            "service",
            mongodb_app.service_name(),
        );
        stack.outputs.export(
            "services.mongoExpress",
            mongo_express.id().to_string(),
            "service",
            mongo_express_app.service_name(),
        );

        log::debug!("Declared {} resources", stack.resources.len());
        Ok(stack)
    }

    /// Declared resources, in declaration order
    pub fn resources(&self) -> &[ObjectResource] {
        &self.resources
    }

    pub fn outputs(&self) -> &StackOutputs {
        &self.outputs
    }

    /// Compile the dependency graph into an execution plan
    pub fn into_plan(self) -> Result<(ExecutionPlan, Vec<ObjectResource>, StackOutputs)> {
        let plan = ExecutionPlan::compile(self.graph)?;
        Ok((plan, self.resources, self.outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::retry::{RetryCallback, RetryConfig, with_retry};
    use crate::settings::{SCOPE, Settings};
    use std::cell::Cell;
    use std::time::Duration;
    use declarative::{
        ApplyResult, ExecuteOptions, Resource, ResourceStatus, execute_simple,
    };
    use kubekit::{MemoryCluster, ObjectRef};
    use std::collections::HashMap;

    fn settings(config: &str, env: &[(&str, &str)]) -> Settings {
        let config = StackConfig::from_toml_str(config).unwrap();
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Settings::resolve(&config.scope(SCOPE), &env)
    }

    fn cluster() -> (Arc<MemoryCluster>, Arc<dyn Cluster>) {
        let memory = Arc::new(MemoryCluster::new());
        let shared: Arc<dyn Cluster> = memory.clone();
        (memory, shared)
    }

    fn object<'a>(stack: &'a Stack, kind: &str, name: &str) -> &'a kubekit::ApiObject {
        stack
            .resources()
            .iter()
            .flat_map(ObjectResource::objects)
            .find(|o| o.kind == kind && o.metadata.name == name)
            .unwrap()
    }

    struct Silent;

    impl RetryCallback for Silent {
        fn on_retry(&self, _: u32, _: u32, _: &str, _: Duration) {}
    }

    /// Apply with retries the way `apply --retries` does, counting passes
    fn apply_with_retries(plan: &ExecutionPlan, retries: u32) -> (ExecuteSummary, u32) {
        let passes = Cell::new(0);
        let config = RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::with_retries(retries)
        };
        let summary = with_retry(
            &config,
            &Silent,
            || {
                passes.set(passes.get() + 1);
                execute_simple(plan, &ExecuteOptions::default())
            },
            |summary: &ExecuteSummary| summary.retryable_failure().map(|e| e.to_string()),
        )
        .unwrap();
        (summary, passes.get())
    }

    fn first_seq(summary: &ExecuteSummary, id: &str, status: &ResourceStatus) -> usize {
        summary
            .transitions
            .iter()
            .find(|t| t.resource_id == id && &t.to == status)
            .map(|t| t.seq)
            .unwrap()
    }

    #[test]
    fn test_declaration_order_and_edges() {
        let (_, shared) = cluster();
        let stack = Stack::declare(&settings("", &[]), &shared).unwrap();
        let ids: Vec<String> = stack.resources().iter().map(Resource::id).collect();
        assert_eq!(
            ids,
            [
                "namespace/mongodb",
                "secret/mongodb/mongodb-secret",
                "volume_claim/mongodb/mongodb-data",
                "app/mongodb/mongodb",
                "secret/mongodb/mongo-express-secret",
                "app/mongodb/mongo-express",
            ]
        );

        let (plan, _, _) = stack.into_plan().unwrap();
        let deps = |pos: usize| -> Vec<String> {
            plan.entry(pos)
                .depends_on
                .iter()
                .map(|&d| plan.entry(d).resource.id())
                .collect()
        };
        assert_eq!(
            deps(3),
            [
                "namespace/mongodb",
                "secret/mongodb/mongodb-secret",
                "volume_claim/mongodb/mongodb-data"
            ]
        );
        assert_eq!(
            deps(5),
            ["app/mongodb/mongodb", "secret/mongodb/mongo-express-secret"]
        );
        assert_eq!(plan.waves().len(), 4);
    }

    #[test]
    fn test_defaults_without_env() {
        let (_, shared) = cluster();
        let stack = Stack::declare(&settings("", &[]), &shared).unwrap();

        let secret = object(&stack, "Secret", MONGODB_SECRET);
        assert_eq!(
            secret.str_field(&["stringData", "MONGO_INITDB_ROOT_USERNAME"]),
            Some("admin")
        );

        let deployment = object(&stack, "Deployment", MONGODB);
        let container = &deployment
            .field(&["spec", "template", "spec", "containers"])
            .unwrap()[0];
        assert_eq!(container["image"], "mongo:7.0");
        assert_eq!(container["resources"]["requests"]["cpu"], "500m");
        assert_eq!(container["resources"]["limits"]["memory"], "2Gi");

        let pvc = object(&stack, "PersistentVolumeClaim", MONGODB_DATA);
        assert_eq!(
            pvc.str_field(&["spec", "storageClassName"]),
            Some("truenas-hdd-mirror-nfs")
        );
        assert_eq!(
            pvc.str_field(&["spec", "resources", "requests", "storage"]),
            Some("20Gi")
        );
    }

    #[test]
    fn test_mongo_express_wiring() {
        let (_, shared) = cluster();
        let stack = Stack::declare(
            &settings("[mongodb]\nbasicAuthEnabled = false\n", &[]),
            &shared,
        )
        .unwrap();

        let deployment = object(&stack, "Deployment", MONGO_EXPRESS);
        let container = &deployment
            .field(&["spec", "template", "spec", "containers"])
            .unwrap()[0];
        let env = container["env"].as_array().unwrap();
        let value = |name: &str| {
            env.iter()
                .find(|e| e["name"] == name)
                .map(|e| e["value"].clone())
                .unwrap()
        };
        assert_eq!(value("ME_CONFIG_MONGODB_SERVER"), "mongodb");
        assert_eq!(value("ME_CONFIG_MONGODB_PORT"), "27017");
        assert_eq!(value("ME_CONFIG_BASICAUTH"), "false");
        assert_eq!(env.len(), 8);
        assert_eq!(container["resources"]["requests"]["memory"], "128Mi");
        assert_eq!(container["resources"]["limits"]["cpu"], "500m");

        let service = object(&stack, "Service", MONGO_EXPRESS);
        assert_eq!(service.str_field(&["spec", "type"]), Some("LoadBalancer"));
        let service = object(&stack, "Service", MONGODB);
        assert_eq!(service.str_field(&["spec", "type"]), Some("ClusterIP"));
    }

    #[test]
    fn test_namespace_override_applies_everywhere() {
        let (_, shared) = cluster();
        let stack = Stack::declare(&settings("[mongodb]\nnamespace = \"data\"\n", &[]), &shared)
            .unwrap();
        for resource in stack.resources() {
            for object in resource.objects() {
                if object.kind != "Namespace" {
                    assert_eq!(object.metadata.namespace.as_deref(), Some("data"));
                }
            }
        }
        assert_eq!(
            stack.outputs().declared().get("namespace").map(String::as_str),
            Some("data")
        );
    }

    #[test]
    fn test_apply_against_memory_cluster() {
        let (memory, shared) = cluster();
        let password = "p@ss: w0rd with spaces ";
        let stack = Stack::declare(
            &settings("", &[("MONGODB_ROOT_PASSWORD", password)]),
            &shared,
        )
        .unwrap();
        let (plan, _, outputs) = stack.into_plan().unwrap();

        let summary = execute_simple(&plan, &ExecuteOptions::default()).unwrap();
        assert!(summary.is_success(), "{:?}", summary.first_failure());
        assert_eq!(summary.created, 6);

        let secret = memory
            .get(&ObjectRef::secret("mongodb", MONGODB_SECRET))
            .unwrap()
            .unwrap();
        assert_eq!(
            secret.str_field(&["stringData", "MONGO_INITDB_ROOT_PASSWORD"]),
            Some(password)
        );

        let resolved = outputs.resolve(&summary);
        assert_eq!(resolved.get("namespace").map(String::as_str), Some("mongodb"));
        assert_eq!(
            resolved.get("services.mongodb").map(String::as_str),
            Some("mongodb")
        );
        assert_eq!(
            resolved.get("services.mongoExpress").map(String::as_str),
            Some("mongo-express")
        );
    }

    #[test]
    fn test_mongo_express_waits_for_prerequisites() {
        let (_, shared) = cluster();
        let stack = Stack::declare(&settings("", &[]), &shared).unwrap();
        let (plan, _, _) = stack.into_plan().unwrap();
        let summary = execute_simple(&plan, &ExecuteOptions::default()).unwrap();

        let applying = first_seq(&summary, "app/mongodb/mongo-express", &ResourceStatus::Applying);
        for dependency in ["app/mongodb/mongodb", "secret/mongodb/mongo-express-secret"] {
            assert!(first_seq(&summary, dependency, &ResourceStatus::Ready) < applying);
        }
    }

    #[test]
    fn test_reapply_is_idempotent() {
        let (memory, shared) = cluster();
        let opts = ExecuteOptions::default();

        let (plan, _, _) = Stack::declare(&settings("", &[]), &shared)
            .unwrap()
            .into_plan()
            .unwrap();
        execute_simple(&plan, &opts).unwrap();
        let writes = memory.writes().len();
        let objects = memory.object_count();

        let (plan, _, _) = Stack::declare(&settings("", &[]), &shared)
            .unwrap()
            .into_plan()
            .unwrap();
        let second = execute_simple(&plan, &opts).unwrap();

        assert_eq!(second.no_change, 6);
        assert!(
            second
                .transitions
                .iter()
                .all(|t| t.to != ResourceStatus::Applying)
        );
        assert_eq!(memory.writes().len(), writes);
        assert_eq!(memory.object_count(), objects);
    }

    #[test]
    fn test_changed_setting_updates_in_place() {
        let (memory, shared) = cluster();
        let opts = ExecuteOptions::default();
        let (plan, _, _) = Stack::declare(&settings("", &[]), &shared)
            .unwrap()
            .into_plan()
            .unwrap();
        execute_simple(&plan, &opts).unwrap();
        let objects = memory.object_count();

        let (plan, _, _) = Stack::declare(&settings("", &[("MONGODB_IMAGE", "mongo:8.0")]), &shared)
            .unwrap()
            .into_plan()
            .unwrap();
        let summary = execute_simple(&plan, &opts).unwrap();

        assert_eq!(summary.modified, 1);
        assert_eq!(summary.no_change, 5);
        assert_eq!(memory.object_count(), objects);
    }

    #[test]
    fn test_invalid_quantity_fails_only_its_branch() {
        let (memory, shared) = cluster();
        let stack = Stack::declare(&settings("[mongodb]\ncpu = \"lots\"\n", &[]), &shared).unwrap();
        let (plan, _, outputs) = stack.into_plan().unwrap();

        let summary = execute_simple(&plan, &ExecuteOptions::default()).unwrap();

        assert_eq!(summary.failed, 1);
        assert!(matches!(
            summary.outcome("app/mongodb/mongodb").unwrap().status,
            ResourceStatus::Failed { .. }
        ));
        assert_eq!(
            summary.outcome("app/mongodb/mongo-express").unwrap().status,
            ResourceStatus::Pending
        );
        assert!(matches!(
            summary.outcome("app/mongodb/mongo-express").unwrap().result,
            ApplyResult::Skipped { .. }
        ));
        for id in [
            "namespace/mongodb",
            "secret/mongodb/mongodb-secret",
            "volume_claim/mongodb/mongodb-data",
            "secret/mongodb/mongo-express-secret",
        ] {
            assert_eq!(summary.outcome(id).unwrap().status, ResourceStatus::Ready);
        }

        match summary.first_failure() {
            Some(declarative::Error::Provisioning {
                resource,
                message,
                retryable,
            }) => {
                assert_eq!(resource, "app/mongodb/mongodb");
                assert!(message.contains("lots"));
                assert!(!retryable);
            }
            other => panic!("unexpected: {other:?}"),
        }

        // Independent resources stay applied
        assert_eq!(memory.object_count(), 4);
        assert!(!outputs.resolve(&summary).contains_key("services.mongodb"));
    }

    #[test]
    fn test_cycle_applies_nothing() {
        let (memory, shared) = cluster();
        let mut graph = ResourceGraph::new();
        let forward = ResourceHandle::named("secret/db/b");
        let first = graph
            .declare(
                ObjectResource::secret(&SecretSpec::new("a", "db"), Arc::clone(&shared)).unwrap(),
                &[&forward],
            )
            .unwrap();
        let err = graph
            .declare(
                ObjectResource::secret(&SecretSpec::new("b", "db"), Arc::clone(&shared)).unwrap(),
                &[&first],
            )
            .unwrap_err();

        assert!(matches!(err, declarative::Error::CyclicDependency { .. }));
        assert!(memory.writes().is_empty());
    }

    #[test]
    fn test_destroy_removes_everything() {
        let (memory, shared) = cluster();
        let opts = ExecuteOptions::default();
        let (plan, _, _) = Stack::declare(&settings("", &[]), &shared)
            .unwrap()
            .into_plan()
            .unwrap();
        execute_simple(&plan, &opts).unwrap();

        let summary = declarative::destroy(
            &plan,
            &opts,
            &mut declarative::NoProgress,
            &mut declarative::AutoConfirm,
        )
        .unwrap();
        assert!(summary.is_success());
        assert_eq!(memory.object_count(), 0);
    }

    #[test]
    fn test_invalid_object_is_not_retried() {
        let (_, shared) = cluster();
        let stack = Stack::declare(&settings("[mongodb]\ncpu = \"lots\"\n", &[]), &shared).unwrap();
        let (plan, _, _) = stack.into_plan().unwrap();

        let (summary, passes) = apply_with_retries(&plan, 2);

        assert_eq!(passes, 1);
        assert_eq!(summary.failed, 1);
        let hint = summary
            .outcome("app/mongodb/mongodb")
            .and_then(|o| o.hint.clone())
            .unwrap();
        assert!(!hint.retryable);
        assert!(hint.advice.unwrap().contains("stack configuration"));
    }

    #[test]
    fn test_conflict_is_retried_until_applied() {
        let (memory, shared) = cluster();
        memory.inject_conflicts(MONGO_EXPRESS_SECRET, 1);
        let (plan, _, _) = Stack::declare(&settings("", &[]), &shared)
            .unwrap()
            .into_plan()
            .unwrap();

        let (summary, passes) = apply_with_retries(&plan, 2);

        assert_eq!(passes, 2);
        assert!(summary.is_success(), "{:?}", summary.first_failure());
        // Everything from the first pass is already converged
        assert_eq!(summary.created, 2);
        assert_eq!(summary.no_change, 4);
    }

    #[test]
    fn test_failed_removal_keeps_its_dependencies() {
        let (memory, shared) = cluster();
        let opts = ExecuteOptions::default();
        let (plan, _, _) = Stack::declare(&settings("", &[]), &shared)
            .unwrap()
            .into_plan()
            .unwrap();
        execute_simple(&plan, &opts).unwrap();
        memory.inject_failure(MONGO_EXPRESS, "object is protected");

        let summary = declarative::destroy(
            &plan,
            &opts,
            &mut declarative::NoProgress,
            &mut declarative::AutoConfirm,
        )
        .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.removed, 0);
        assert!(matches!(
            summary.outcome("app/mongodb/mongo-express").unwrap().status,
            ResourceStatus::Failed { .. }
        ));
        for id in [
            "app/mongodb/mongodb",
            "secret/mongodb/mongo-express-secret",
            "secret/mongodb/mongodb-secret",
            "volume_claim/mongodb/mongodb-data",
            "namespace/mongodb",
        ] {
            let outcome = summary.outcome(id).unwrap();
            assert_eq!(outcome.status, ResourceStatus::Ready, "{id}");
            assert!(
                matches!(
                    &outcome.result,
                    ApplyResult::Skipped { reason }
                        if reason.starts_with("dependent ") && reason.ends_with(" is still present")
                ),
                "{id}: {}",
                outcome.result
            );
        }
        assert!(
            memory
                .get(&ObjectRef::secret("mongodb", MONGO_EXPRESS_SECRET))
                .unwrap()
                .is_some()
        );
        assert!(memory.get(&ObjectRef::namespace("mongodb")).unwrap().is_some());
    }
}
