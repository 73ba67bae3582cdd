//! Dependency graph management using `petgraph`.
//!
//! Nodes are instance identities in declaration order; an edge points from
//! a producer to each consumer that references its outputs, so that a
//! topological walk yields producers first.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use cairn_common::error::{CairnError, Result};
use cairn_common::types::InstanceId;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};

/// A dependency graph of component instances.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Internal petgraph representation.
    graph: DiGraph<InstanceId, ()>,
    /// Identity to node lookup.
    index: HashMap<InstanceId, NodeIndex>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an instance node; adding the same identity twice is a no-op.
    pub fn add_instance(&mut self, id: &InstanceId) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.clone());
        let _ = self.index.insert(id.clone(), idx);
        idx
    }

    /// Adds an edge stating that `consumer` depends on `producer`.
    ///
    /// Repeated edges collapse into one. A self-edge is kept so that
    /// [`Self::check_acyclic`] reports it.
    ///
    /// # Errors
    ///
    /// Returns an error if either identity has not been added.
    pub fn add_dependency(&mut self, consumer: &InstanceId, producer: &InstanceId) -> Result<()> {
        let consumer_idx = self.node(consumer)?;
        let producer_idx = self.node(producer)?;
        let _ = self.graph.update_edge(producer_idx, consumer_idx, ());
        Ok(())
    }

    fn node(&self, id: &InstanceId) -> Result<NodeIndex> {
        self.index.get(id).copied().ok_or_else(|| CairnError::NotFound {
            kind: "instance",
            id: id.to_string(),
        })
    }

    /// Returns whether `id` is a node of this graph.
    #[must_use]
    pub fn contains(&self, id: &InstanceId) -> bool {
        self.index.contains_key(id)
    }

    /// Number of instances in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns whether the graph has no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Iterates over instances in declaration order.
    pub fn instances(&self) -> impl Iterator<Item = &InstanceId> {
        self.graph.node_weights()
    }

    /// Fails if the graph contains a cycle, including a self reference.
    ///
    /// # Errors
    ///
    /// Returns [`CairnError::CyclicDependency`] naming the members of the
    /// first cycle found, in declaration order.
    pub fn check_acyclic(&self) -> Result<()> {
        let mut cycles: Vec<Vec<NodeIndex>> = petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
            .collect();
        for scc in &mut cycles {
            scc.sort_unstable();
        }
        cycles.sort_unstable();

        match cycles.into_iter().next() {
            None => Ok(()),
            Some(members) => Err(CairnError::CyclicDependency {
                members: members
                    .into_iter()
                    .map(|idx| self.graph[idx].to_string())
                    .collect(),
            }),
        }
    }

    /// Returns a topological ordering for deployment.
    ///
    /// Producers appear before the consumers that depend on them. Ties
    /// between independent instances are broken by declaration order, so
    /// the result is stable across runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains cycles.
    pub fn deploy_order(&self) -> Result<Vec<InstanceId>> {
        self.check_acyclic()?;

        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
            })
            .collect();
        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(self.graph[idx].clone());
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        Ok(order)
    }

    /// Returns the teardown ordering: the exact reverse of [`Self::deploy_order`].
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains cycles.
    pub fn teardown_order(&self) -> Result<Vec<InstanceId>> {
        let mut order = self.deploy_order()?;
        order.reverse();
        Ok(order)
    }

    /// Instances whose outputs `id` consumes, in declaration order.
    #[must_use]
    pub fn producers(&self, id: &InstanceId) -> Vec<InstanceId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Instances that consume `id`'s outputs, in declaration order.
    #[must_use]
    pub fn consumers(&self, id: &InstanceId) -> Vec<InstanceId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &InstanceId, direction: Direction) -> Vec<InstanceId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        found.sort_unstable();
        found.dedup();
        found.into_iter().map(|n| self.graph[n].clone()).collect()
    }

    /// Every instance reachable through consumer edges, excluding `id`.
    #[must_use]
    pub fn descendants(&self, id: &InstanceId) -> Vec<InstanceId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut found = Vec::new();
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != start {
                found.push(idx);
            }
        }
        self.sorted_ids(found)
    }

    /// Every instance reachable through producer edges, excluding `id`.
    #[must_use]
    pub fn ancestors(&self, id: &InstanceId) -> Vec<InstanceId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut found = Vec::new();
        while let Some(idx) = dfs.next(reversed) {
            if idx != start {
                found.push(idx);
            }
        }
        self.sorted_ids(found)
    }

    fn sorted_ids(&self, mut nodes: Vec<NodeIndex>) -> Vec<InstanceId> {
        nodes.sort_unstable();
        nodes.into_iter().map(|n| self.graph[n].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> InstanceId {
        InstanceId::from_persisted(s)
    }

    fn graph_of(nodes: &[&str], edges: &[(&str, &str)]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for n in nodes {
            let _ = graph.add_instance(&id(n));
        }
        for (consumer, producer) in edges {
            graph
                .add_dependency(&id(consumer), &id(producer))
                .expect("known nodes");
        }
        graph
    }

    fn names(order: &[InstanceId]) -> Vec<&str> {
        order.iter().map(InstanceId::as_str).collect()
    }

    #[test]
    fn empty_graph_resolves_to_empty() {
        let graph = DependencyGraph::new();
        let order = graph.deploy_order().expect("should resolve");
        assert!(order.is_empty());
        assert!(graph.is_empty());
    }

    #[test]
    fn single_node_resolves() {
        let graph = graph_of(&["api"], &[]);
        let order = graph.deploy_order().expect("should resolve");
        assert_eq!(names(&order), vec!["api"]);
    }

    #[test]
    fn linear_dependency_chain() {
        let graph = graph_of(&["api", "db"], &[("api", "db")]);
        let order = graph.deploy_order().expect("should resolve");
        assert_eq!(names(&order), vec!["db", "api"]);
    }

    #[test]
    fn diamond_dependency() {
        let graph = graph_of(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        let order = graph.deploy_order().expect("should resolve");
        assert_eq!(names(&order), vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn teardown_is_exact_reverse() {
        let graph = graph_of(
            &["a", "b", "c", "d", "e"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        let mut deploy = graph.deploy_order().expect("deploy");
        let teardown = graph.teardown_order().expect("teardown");
        deploy.reverse();
        assert_eq!(deploy, teardown);
    }

    #[test]
    fn ties_follow_declaration_order() {
        let graph = graph_of(&["z", "y", "x"], &[]);
        let order = graph.deploy_order().expect("should resolve");
        assert_eq!(names(&order), vec!["z", "y", "x"]);
    }

    #[test]
    fn cycle_detection() {
        let graph = graph_of(&["a", "b"], &[("a", "b"), ("b", "a")]);
        let err = graph.deploy_order().unwrap_err();
        match err {
            CairnError::CyclicDependency { members } => assert_eq!(members, vec!["a", "b"]),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn three_node_cycle_detection() {
        let graph = graph_of(
            &["ok", "a", "b", "c"],
            &[("a", "b"), ("b", "c"), ("c", "a")],
        );
        let err = graph.check_acyclic().unwrap_err();
        assert!(err.to_string().contains("a -> b -> c"), "got: {err}");
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let graph = graph_of(&["a", "c"], &[("c", "c")]);
        let err = graph.deploy_order().unwrap_err();
        assert!(matches!(err, CairnError::CyclicDependency { ref members } if members == &["c"]));
    }

    #[test]
    fn duplicate_edges_collapse() {
        let graph = graph_of(&["a", "b"], &[("b", "a"), ("b", "a")]);
        assert_eq!(graph.producers(&id("b")), vec![id("a")]);
        assert_eq!(graph.consumers(&id("a")), vec![id("b")]);
    }

    #[test]
    fn unknown_node_is_rejected() {
        let mut graph = graph_of(&["a"], &[]);
        assert!(graph.add_dependency(&id("a"), &id("ghost")).is_err());
    }

    #[test]
    fn descendants_and_ancestors_are_transitive() {
        let graph = graph_of(
            &["a", "b", "c", "x"],
            &[("b", "a"), ("c", "b")],
        );
        assert_eq!(graph.descendants(&id("a")), vec![id("b"), id("c")]);
        assert_eq!(graph.ancestors(&id("c")), vec![id("a"), id("b")]);
        assert!(graph.descendants(&id("x")).is_empty());
    }

    #[test]
    fn independent_nodes_all_present() {
        let graph = graph_of(&["x", "y", "z"], &[]);
        let order = graph.deploy_order().expect("should resolve");
        assert_eq!(order.len(), 3);
        assert!(order.contains(&id("x")));
        assert!(order.contains(&id("y")));
        assert!(order.contains(&id("z")));
    }
}
