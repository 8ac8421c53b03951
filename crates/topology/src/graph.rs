//! Directed dependency graph over service definitions.

use std::collections::HashMap;

use crate::error::{Result, TopologyError};
use crate::service::DependencyKind;

/// Directed graph over the services of one topology.
///
/// Edges point from a dependent to its dependency. Only wait-for edges
/// carry an ordering constraint; reference edges may legally cycle but must
/// still target existing services.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    /// Service names in declaration order.
    names: Vec<String>,
    index: HashMap<String, usize>,
    /// `edges[dependent]` lists `(dependency, kind)` pairs.
    edges: Vec<Vec<(usize, DependencyKind)>>,
}

impl DependencyGraph {
    /// Creates a graph over the given service names, preserving declaration
    /// order for tie-breaking.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let edges = vec![Vec::new(); names.len()];

        Self { names, index, edges }
    }

    /// Number of services in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the graph is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Adds an edge from `dependent` to `dependency`.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::UnknownService`] if either name is absent
    /// from the topology.
    pub fn add_edge(
        &mut self,
        dependent: &str,
        dependency: &str,
        kind: DependencyKind,
    ) -> Result<()> {
        let from = *self
            .index
            .get(dependent)
            .ok_or_else(|| TopologyError::UnknownService {
                dependent: dependent.to_string(),
                dependency: dependency.to_string(),
            })?;
        let to = *self
            .index
            .get(dependency)
            .ok_or_else(|| TopologyError::UnknownService {
                dependent: dependent.to_string(),
                dependency: dependency.to_string(),
            })?;

        self.edges[from].push((to, kind));
        Ok(())
    }

    /// Names of the wait-for dependencies of `service`, in declaration order.
    #[must_use]
    pub fn wait_for_dependencies(&self, service: &str) -> Vec<&str> {
        self.index.get(service).map_or_else(Vec::new, |&i| {
            self.edges[i]
                .iter()
                .filter(|(_, kind)| *kind == DependencyKind::WaitFor)
                .map(|&(to, _)| self.names[to].as_str())
                .collect()
        })
    }

    /// Validates the wait-for subgraph.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::Cycle`] naming the cycle's services in edge
    /// order, rotated to start at the earliest-declared member, if the
    /// wait-for subgraph is not acyclic.
    pub fn validate(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let n = self.names.len();
        let mut marks = vec![Mark::Unvisited; n];

        for start in 0..n {
            if marks[start] != Mark::Unvisited {
                continue;
            }

            // Iterative DFS over wait-for edges; `path` mirrors the stack.
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            let mut path: Vec<usize> = vec![start];
            marks[start] = Mark::InProgress;

            while let Some(&mut (node, ref mut edge_idx)) = stack.last_mut() {
                let next = self.edges[node]
                    .iter()
                    .skip(*edge_idx)
                    .position(|(_, kind)| *kind == DependencyKind::WaitFor)
                    .map(|offset| {
                        *edge_idx += offset + 1;
                        self.edges[node][*edge_idx - 1].0
                    });

                match next {
                    Some(next) => match marks[next] {
                        Mark::Unvisited => {
                            marks[next] = Mark::InProgress;
                            stack.push((next, 0));
                            path.push(next);
                        }
                        Mark::InProgress => {
                            let pos = path
                                .iter()
                                .position(|&p| p == next)
                                .expect("in-progress node must be on the path");
                            let mut cycle: Vec<usize> = path[pos..].to_vec();
                            let min_pos = cycle
                                .iter()
                                .enumerate()
                                .min_by_key(|&(_, &ix)| ix)
                                .map(|(p, _)| p)
                                .unwrap_or(0);
                            cycle.rotate_left(min_pos);

                            return Err(TopologyError::Cycle {
                                path: cycle.iter().map(|&ix| self.names[ix].clone()).collect(),
                            });
                        }
                        Mark::Done => {}
                    },
                    None => {
                        marks[node] = Mark::Done;
                        stack.pop();
                        path.pop();
                    }
                }
            }
        }

        Ok(())
    }

    /// Produces a lazy, finite, non-restartable ordering in which every
    /// wait-for dependency precedes its dependents.
    ///
    /// Ties among services with no ordering constraint between them are
    /// broken by declaration order, so the sequence is reproducible. The
    /// iterator ends early if the graph contains a wait-for cycle; call
    /// [`DependencyGraph::validate`] first to surface that as an error.
    #[must_use]
    pub fn topological_order(&self) -> TopologicalOrder<'_> {
        let n = self.names.len();
        let mut indegree = vec![0usize; n];
        let mut dependents = vec![Vec::new(); n];

        for (from, edges) in self.edges.iter().enumerate() {
            for &(to, kind) in edges {
                if kind == DependencyKind::WaitFor {
                    indegree[from] += 1;
                    dependents[to].push(from);
                }
            }
        }

        let ready = (0..n).filter(|&i| indegree[i] == 0).collect();

        TopologicalOrder {
            graph: self,
            indegree,
            dependents,
            ready,
        }
    }
}

/// Lazy topological ordering over a [`DependencyGraph`].
pub struct TopologicalOrder<'a> {
    graph: &'a DependencyGraph,
    indegree: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    /// Declaration indices of services whose wait-for dependencies have all
    /// been emitted.
    ready: Vec<usize>,
}

impl<'a> Iterator for TopologicalOrder<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        // Smallest declaration index first, for stable ordering.
        let pos = self
            .ready
            .iter()
            .enumerate()
            .min_by_key(|&(_, &ix)| ix)
            .map(|(p, _)| p)?;
        let node = self.ready.swap_remove(pos);

        for &dependent in &self.dependents[node] {
            self.indegree[dependent] -= 1;
            if self.indegree[dependent] == 0 {
                self.ready.push(dependent);
            }
        }

        Some(self.graph.names[node].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(names: &[&str]) -> DependencyGraph {
        DependencyGraph::new(names.iter().copied())
    }

    #[test]
    fn topological_order_puts_dependencies_first() {
        let mut g = graph(&["web", "api", "db"]);
        g.add_edge("web", "api", DependencyKind::WaitFor).unwrap();
        g.add_edge("api", "db", DependencyKind::WaitFor).unwrap();
        g.validate().unwrap();

        let order: Vec<&str> = g.topological_order().collect();
        assert_eq!(order, vec!["db", "api", "web"]);
    }

    #[test]
    fn unconstrained_ties_follow_declaration_order() {
        let mut g = graph(&["c", "a", "b"]);
        g.add_edge("b", "c", DependencyKind::WaitFor).unwrap();

        let order: Vec<&str> = g.topological_order().collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn every_wait_for_dependency_precedes_its_dependent() {
        let mut g = graph(&["e", "d", "c", "b", "a"]);
        g.add_edge("a", "b", DependencyKind::WaitFor).unwrap();
        g.add_edge("b", "d", DependencyKind::WaitFor).unwrap();
        g.add_edge("c", "d", DependencyKind::WaitFor).unwrap();
        g.add_edge("e", "a", DependencyKind::WaitFor).unwrap();
        g.validate().unwrap();

        let order: Vec<&str> = g.topological_order().collect();
        assert_eq!(order.len(), 5);

        let position = |name: &str| order.iter().position(|&n| n == name).unwrap();
        assert!(position("b") < position("a"));
        assert!(position("d") < position("b"));
        assert!(position("d") < position("c"));
        assert!(position("a") < position("e"));
    }

    #[test]
    fn wait_for_cycle_is_a_build_error_naming_its_members() {
        let mut g = graph(&["a", "b"]);
        g.add_edge("a", "b", DependencyKind::WaitFor).unwrap();
        g.add_edge("b", "a", DependencyKind::WaitFor).unwrap();

        match g.validate() {
            Err(TopologyError::Cycle { path }) => {
                assert_eq!(path, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn reference_edges_may_cycle() {
        let mut g = graph(&["a", "b"]);
        g.add_edge("a", "b", DependencyKind::Reference).unwrap();
        g.add_edge("b", "a", DependencyKind::Reference).unwrap();

        g.validate().unwrap();
        assert_eq!(g.topological_order().count(), 2);
    }

    #[test]
    fn edges_to_unknown_services_are_rejected() {
        let mut g = graph(&["a"]);
        let err = g
            .add_edge("a", "ghost", DependencyKind::WaitFor)
            .unwrap_err();
        assert_eq!(
            err,
            TopologyError::UnknownService {
                dependent: "a".to_string(),
                dependency: "ghost".to_string(),
            }
        );
    }
}
