//! Dependency graph of declared resources
//!
//! Resources are registered with the handles of the resources they depend on.
//! Edges are checked as they are declared: a declaration that would close a
//! cycle is rejected and left out of the graph. Dependencies may name
//! resources that are declared later; those references are resolved when the
//! graph is compiled into waves.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::resource::{BoxedResource, Resource};

/// Opaque reference to a declared (or forward-declared) resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(String);

impl ResourceHandle {
    /// Reference a resource by id, whether or not it is declared yet
    pub fn named(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A declared resource together with its prerequisites
pub(crate) struct Node {
    pub(crate) resource: BoxedResource,
    pub(crate) depends_on: Vec<ResourceHandle>,
}

/// Graph of declared resources and their dependency edges
#[derive(Default)]
pub struct ResourceGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource that must not materialize before `depends_on`
    pub fn declare<R: Resource + 'static>(
        &mut self,
        resource: R,
        depends_on: &[&ResourceHandle],
    ) -> Result<ResourceHandle> {
        self.declare_boxed(Box::new(resource), depends_on)
    }

    /// Register an already boxed resource
    pub fn declare_boxed(
        &mut self,
        resource: BoxedResource,
        depends_on: &[&ResourceHandle],
    ) -> Result<ResourceHandle> {
        let id = resource.id();
        if self.index.contains_key(&id) {
            return Err(Error::DuplicateResource(id));
        }

        let mut deps: Vec<ResourceHandle> = Vec::with_capacity(depends_on.len());
        for handle in depends_on {
            if handle.id() == id {
                return Err(Error::CyclicDependency {
                    cycle: vec![id.clone(), id],
                });
            }
            if !deps.contains(*handle) {
                deps.push((*handle).clone());
            }
        }

        let position = self.nodes.len();
        self.nodes.push(Node {
            resource,
            depends_on: deps,
        });
        self.index.insert(id.clone(), position);

        // The graph was acyclic before, so any new cycle runs through this node
        if let Some(cycle) = self.cycle_through(position) {
            self.nodes.pop();
            self.index.remove(&id);
            log::debug!("Rejected {id}: cycle {}", cycle.join(" -> "));
            return Err(Error::CyclicDependency { cycle });
        }

        log::debug!(
            "Declared {id} (depends on: {})",
            self.nodes[position]
                .depends_on
                .iter()
                .map(ResourceHandle::id)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(ResourceHandle(id))
    }

    /// Number of declared resources
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a handle refers to a declared resource
    pub fn contains(&self, handle: &ResourceHandle) -> bool {
        self.index.contains_key(handle.id())
    }

    /// Look up a declared resource
    pub fn get(&self, handle: &ResourceHandle) -> Option<&dyn Resource> {
        self.index
            .get(handle.id())
            .map(|&i| self.nodes[i].resource.as_ref())
    }

    /// Direct dependencies of a declared resource
    pub fn dependencies(&self, handle: &ResourceHandle) -> Option<&[ResourceHandle]> {
        self.index
            .get(handle.id())
            .map(|&i| self.nodes[i].depends_on.as_slice())
    }

    /// Declared ids in declaration order
    pub fn ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.resource.id()).collect()
    }

    /// Check every edge resolves, then group resources into waves
    ///
    /// Uses Kahn's algorithm, one layer at a time:
    /// 1. Collect every unplaced node whose dependencies are all placed
    /// 2. Emit them as the next wave, in declaration order
    /// 3. Repeat until everything is placed
    ///
    /// Returns node positions per wave.
    pub fn compile(&self) -> Result<Vec<Vec<usize>>> {
        let edges = self.resolved_edges()?;

        let total = self.nodes.len();
        let mut placed = vec![false; total];
        let mut placed_count = 0;
        let mut waves: Vec<Vec<usize>> = Vec::new();

        while placed_count < total {
            let wave: Vec<usize> = (0..total)
                .filter(|&i| !placed[i] && edges[i].iter().all(|&d| placed[d]))
                .collect();

            if wave.is_empty() {
                let stuck: Vec<String> = (0..total)
                    .filter(|&i| !placed[i])
                    .map(|i| self.nodes[i].resource.id())
                    .collect();
                return Err(Error::CyclicDependency { cycle: stuck });
            }

            for &i in &wave {
                placed[i] = true;
            }
            placed_count += wave.len();
            log::debug!("Wave {}: {} resources", waves.len(), wave.len());
            waves.push(wave);
        }

        Ok(waves)
    }

    /// Dependency positions per node, failing on references never declared
    pub(crate) fn resolved_edges(&self) -> Result<Vec<Vec<usize>>> {
        self.nodes
            .iter()
            .map(|node| {
                node.depends_on
                    .iter()
                    .map(|dep| {
                        self.index
                            .get(dep.id())
                            .copied()
                            .ok_or_else(|| Error::DanglingReference {
                                resource: node.resource.id(),
                                missing: dep.id().to_string(),
                            })
                    })
                    .collect()
            })
            .collect()
    }

    pub(crate) fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }

    /// Depth-first search along dependency edges looking for a path back to `start`
    fn cycle_through(&self, start: usize) -> Option<Vec<String>> {
        let mut path = vec![start];
        let mut visited = HashSet::new();
        if self.dfs_back_to(start, start, &mut path, &mut visited) {
            let mut cycle: Vec<String> = path
                .iter()
                .map(|&i| self.nodes[i].resource.id())
                .collect();
            cycle.push(self.nodes[start].resource.id());
            return Some(cycle);
        }
        None
    }

    fn dfs_back_to(
        &self,
        current: usize,
        target: usize,
        path: &mut Vec<usize>,
        visited: &mut HashSet<usize>,
    ) -> bool {
        for dep in &self.nodes[current].depends_on {
            // Forward references are not edges yet
            let Some(&next) = self.index.get(dep.id()) else {
                continue;
            };
            if next == target {
                return true;
            }
            if !visited.insert(next) {
                continue;
            }
            path.push(next);
            if self.dfs_back_to(next, target, path, visited) {
                return true;
            }
            path.pop();
        }
        false
    }
}

impl fmt::Debug for ResourceGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGraph")
            .field("resources", &self.ids())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::ApplyContext;
    use crate::types::{ApplyResult, ResourceState};

    #[derive(Debug)]
    pub(crate) struct Stub(pub &'static str);

    impl Resource for Stub {
        fn id(&self) -> String {
            self.0.to_string()
        }

        fn description(&self) -> String {
            format!("stub {}", self.0)
        }

        fn resource_type(&self) -> &'static str {
            "stub"
        }

        fn current_state(&self) -> anyhow::Result<ResourceState> {
            Ok(ResourceState::Absent)
        }

        fn desired_state(&self) -> ResourceState {
            ResourceState::Present { details: None }
        }

        fn apply(&self, _ctx: &mut ApplyContext) -> anyhow::Result<ApplyResult> {
            Ok(ApplyResult::Created)
        }
    }

    #[test]
    fn test_declare_and_compile_waves() {
        let mut graph = ResourceGraph::new();
        let ns = graph.declare(Stub("ns"), &[]).unwrap();
        let secret = graph.declare(Stub("secret"), &[&ns]).unwrap();
        let pvc = graph.declare(Stub("pvc"), &[&ns]).unwrap();
        let db = graph.declare(Stub("db"), &[&ns, &secret, &pvc]).unwrap();
        let ui_secret = graph.declare(Stub("ui-secret"), &[&ns]).unwrap();
        graph.declare(Stub("ui"), &[&db, &ui_secret]).unwrap();

        let waves = graph.compile().unwrap();
        let named: Vec<Vec<String>> = waves
            .iter()
            .map(|w| w.iter().map(|&i| graph.ids()[i].clone()).collect())
            .collect();

        assert_eq!(
            named,
            vec![
                vec!["ns".to_string()],
                vec!["secret".into(), "pvc".into(), "ui-secret".into()],
                vec!["db".into()],
                vec!["ui".into()],
            ]
        );
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let mut graph = ResourceGraph::new();
        graph.declare(Stub("a"), &[]).unwrap();
        let err = graph.declare(Stub("a"), &[]).unwrap_err();
        assert_eq!(err, Error::DuplicateResource("a".into()));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_cycle_rejected_at_declare() {
        let mut graph = ResourceGraph::new();
        let b = ResourceHandle::named("b");
        let a = graph.declare(Stub("a"), &[&b]).unwrap();

        let err = graph.declare(Stub("b"), &[&a]).unwrap_err();
        assert_eq!(
            err,
            Error::CyclicDependency {
                cycle: vec!["b".into(), "a".into(), "b".into()]
            }
        );
        assert!(!graph.contains(&b));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let mut graph = ResourceGraph::new();
        let a = ResourceHandle::named("a");
        let err = graph.declare(Stub("a"), &[&a]).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { .. }));
    }

    #[test]
    fn test_longer_cycle_reports_path() {
        let mut graph = ResourceGraph::new();
        let c = ResourceHandle::named("c");
        let a = graph.declare(Stub("a"), &[&c]).unwrap();
        let b = graph.declare(Stub("b"), &[&a]).unwrap();

        match graph.declare(Stub("c"), &[&b]).unwrap_err() {
            Error::CyclicDependency { cycle } => {
                assert_eq!(cycle, vec!["c", "b", "a", "c"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_dangling_reference_at_compile() {
        let mut graph = ResourceGraph::new();
        let ghost = ResourceHandle::named("ghost");
        graph.declare(Stub("a"), &[&ghost]).unwrap();

        let err = graph.compile().unwrap_err();
        assert_eq!(
            err,
            Error::DanglingReference {
                resource: "a".into(),
                missing: "ghost".into()
            }
        );
    }

    #[test]
    fn test_forward_reference_resolves() {
        let mut graph = ResourceGraph::new();
        let later = ResourceHandle::named("later");
        graph.declare(Stub("early"), &[&later]).unwrap();
        graph.declare(Stub("later"), &[]).unwrap();

        let waves = graph.compile().unwrap();
        assert_eq!(waves, vec![vec![1], vec![0]]);
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut graph = ResourceGraph::new();
        let a = graph.declare(Stub("a"), &[]).unwrap();
        let b = graph.declare(Stub("b"), &[&a, &a]).unwrap();
        assert_eq!(graph.dependencies(&b).unwrap().len(), 1);
    }
}
