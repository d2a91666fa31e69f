//! Command implementations
//!
//! Every command resolves settings the same way, then declares the stack
//! against the selected backend:
//! - `render` - the resolved cluster objects
//! - `diff` - what apply would change
//! - `apply` / `destroy` - converge the cluster
//! - `status` / `outputs` - the last recorded run
//! - `config` - the resolved settings

pub mod apply;
pub mod config;
pub mod diff;
pub mod render;
pub mod status;

use anyhow::{Context as AnyhowContext, Result};
use declarative::{ExecutionPlan, Resource};
use kubekit::{BackendKind, Cluster, KubectlCluster, MemoryCluster};
use std::collections::HashSet;
use std::sync::Arc;

use crate::Context;
use crate::config::StackConfig;
use crate::resource::ObjectResource;
use crate::settings::{ProcessEnv, SCOPE, Settings};
use crate::stack::{Stack, StackOutputs};

/// Load the config file, layer `--set` overrides, and resolve settings
pub fn resolve_settings(ctx: &Context) -> Result<(StackConfig, Settings)> {
    let mut config = StackConfig::load(ctx.config.as_deref())?;
    config.apply_overrides(&ctx.overrides)?;
    let settings = Settings::resolve(&config.scope(SCOPE), &ProcessEnv);
    Ok((config, settings))
}

/// Construct the selected backend
pub fn connect(ctx: &Context) -> Result<Arc<dyn Cluster>> {
    let cluster: Arc<dyn Cluster> = match ctx.backend {
        BackendKind::Memory => {
            log::info!("Using the in-memory backend; nothing persists after this run");
            Arc::new(MemoryCluster::new())
        }
        BackendKind::Kubectl => Arc::new(
            KubectlCluster::new()
                .context("Failed to set up the kubectl backend")?
                .with_context(ctx.kube_context.clone())
                .with_kubeconfig(ctx.kubeconfig.clone()),
        ),
    };
    log::debug!("Connected to {} backend", cluster.name());
    Ok(cluster)
}

/// A compiled stack ready to run
pub struct Planned {
    pub plan: ExecutionPlan,
    pub resources: Vec<ObjectResource>,
    pub outputs: StackOutputs,
    pub backend: String,
}

impl Planned {
    /// Resources the plan will act on, in declaration order
    pub fn selected(&self) -> Vec<&ObjectResource> {
        let ids: HashSet<String> = self.plan.selected_resources().map(|r| r.id()).collect();
        self.resources
            .iter()
            .filter(|r| ids.contains(&r.id()))
            .collect()
    }
}

/// Resolve, declare and compile the stack, narrowed to `target`
pub fn plan(ctx: &Context, target: Option<&str>) -> Result<Planned> {
    let (_, settings) = resolve_settings(ctx)?;
    let cluster = connect(ctx)?;
    let backend = cluster.name().to_string();

    let (plan, resources, outputs) = Stack::declare(&settings, &cluster)?.into_plan()?;
    let plan = plan.filter_by_target(target);
    if plan.is_empty() {
        anyhow::bail!(
            "No resources match target '{}'",
            target.unwrap_or_default()
        );
    }

    Ok(Planned {
        plan,
        resources,
        outputs,
        backend,
    })
}
