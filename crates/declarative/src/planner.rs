//! Execution planner - compiles a resource graph into ordered waves

use crate::error::Result;
use crate::graph::ResourceGraph;
use crate::resource::{BoxedResource, Resource};

/// One resource in a compiled plan
pub struct PlanEntry {
    pub resource: BoxedResource,
    /// Positions of the entries this one depends on
    pub depends_on: Vec<usize>,
    /// Wave the entry belongs to
    pub wave: usize,
    /// Whether the entry is applied by this plan, or only checked as a prerequisite
    pub selected: bool,
}

/// An execution plan with resources grouped into dependency waves
///
/// Every dependency of a resource in wave N sits in a wave before N, so a
/// whole wave can be applied concurrently once the previous ones are ready.
pub struct ExecutionPlan {
    entries: Vec<PlanEntry>,
    waves: Vec<Vec<usize>>,
}

impl ExecutionPlan {
    /// Create a new empty plan
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            waves: Vec::new(),
        }
    }

    /// Validate the graph and order its resources
    pub fn compile(graph: ResourceGraph) -> Result<Self> {
        let waves = graph.compile()?;
        let edges = graph.resolved_edges()?;

        let mut wave_of = vec![0; graph.len()];
        for (w, members) in waves.iter().enumerate() {
            for &i in members {
                wave_of[i] = w;
            }
        }

        let entries = graph
            .into_nodes()
            .into_iter()
            .zip(edges)
            .enumerate()
            .map(|(i, (node, depends_on))| PlanEntry {
                resource: node.resource,
                depends_on,
                wave: wave_of[i],
                selected: true,
            })
            .collect();

        Ok(Self { entries, waves })
    }

    /// Narrow the plan to resources matching a predicate
    ///
    /// Filtered-out entries stay in the plan as prerequisites: they are not
    /// applied, but dependents still wait on them being in place.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn Resource) -> bool,
    {
        for entry in &mut self.entries {
            entry.selected = entry.selected && predicate(entry.resource.as_ref());
        }
        self
    }

    /// Filter plan to only include resources matching a target pattern
    ///
    /// Target format: "type" or "type.name"
    pub fn filter_by_target(self, target: Option<&str>) -> Self {
        match target {
            None => self,
            Some(t) => {
                let (resource_type, name) = parse_target(t);
                self.filter(|r| matches_filter(r, resource_type.as_deref(), name.as_deref()))
            }
        }
    }

    /// Waves of entry positions, in apply order
    pub fn waves(&self) -> &[Vec<usize>] {
        &self.waves
    }

    /// All entries in declaration order
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn entry(&self, position: usize) -> &PlanEntry {
        &self.entries[position]
    }

    /// Resources this plan will apply, in wave order
    pub fn selected_resources(&self) -> impl Iterator<Item = &dyn Resource> {
        self.waves
            .iter()
            .flatten()
            .map(|&i| &self.entries[i])
            .filter(|e| e.selected)
            .map(|e| e.resource.as_ref())
    }

    /// Positions of entries that depend directly on `position`
    pub fn dependents(&self, position: usize) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.depends_on.contains(&position))
            .map(|(i, _)| i)
            .collect()
    }

    /// Total number of resources the plan applies
    pub fn total_resources(&self) -> usize {
        self.entries.iter().filter(|e| e.selected).count()
    }

    /// Check if plan is empty
    pub fn is_empty(&self) -> bool {
        self.total_resources() == 0
    }
}

impl Default for ExecutionPlan {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a target string like "type.name" into (type, name)
///
/// Only the first dot separates; the name may contain more.
fn parse_target(target: &str) -> (Option<String>, Option<String>) {
    match target.split_once('.') {
        Some((resource_type, name)) => (Some(resource_type.to_string()), Some(name.to_string())),
        None => (Some(target.to_string()), None),
    }
}

/// Check if a resource matches the filter criteria
fn matches_filter(
    resource: &dyn Resource,
    resource_type: Option<&str>,
    name: Option<&str>,
) -> bool {
    if let Some(rt) = resource_type {
        // Allow common aliases
        let matches_type = match rt {
            "apps" | "workloads" => resource.resource_type() == "app",
            "secrets" => resource.resource_type() == "secret",
            "volumes" | "pvc" => resource.resource_type() == "volume_claim",
            "namespaces" | "ns" => resource.resource_type() == "namespace",
            _ => resource.resource_type() == rt,
        };
        if !matches_type {
            return false;
        }
    }

    if let Some(n) = name {
        let id = resource.id();
        if id != n && id.rsplit('/').next() != Some(n) {
            return false;
        }
    }

    true
}
