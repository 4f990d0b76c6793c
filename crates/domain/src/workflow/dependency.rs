//! Dependency analysis of workflow graphs.
//!
//! Builds the node dependency DAG from input links and assigns every node a
//! depth (longest chain of dependencies above it). Depths are computed with
//! Kahn's algorithm so arbitrarily deep graphs never recurse.
//!
//! Nodes on a cycle never reach in-degree zero; they are never dequeued and
//! keep depth 0. Progress analysis accepts that approximation instead of
//! failing.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::Serialize;

use crate::ids::NodeId;
use crate::workflow::WorkflowGraph;

/// Dependency information for a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDependencyInfo {
    pub id: NodeId,
    /// Nodes this node reads from, in input order, without duplicates
    pub dependencies: Vec<NodeId>,
    /// Nodes that read from this node
    pub dependents: Vec<NodeId>,
    pub depth: u32,
}

/// Result of [`analyze`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyAnalysis {
    pub nodes: BTreeMap<NodeId, NodeDependencyInfo>,
    pub max_depth: u32,
}

impl DependencyAnalysis {
    pub fn depth_of(&self, id: &str) -> Option<u32> {
        self.nodes.get(id).map(|info| info.depth)
    }

    /// Mean depth over all nodes; 0.0 for an empty graph.
    pub fn average_depth(&self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        let total: u64 = self.nodes.values().map(|info| u64::from(info.depth)).sum();
        total as f64 / self.nodes.len() as f64
    }

    /// Whether any node reads from another node of the graph.
    pub fn has_dependencies(&self) -> bool {
        self.nodes.values().any(|info| !info.dependencies.is_empty())
    }
}

/// Analyze the dependency structure of `graph`.
///
/// Only links whose source is a node of the graph count as edges; dangling
/// references are ignored here (see [`WorkflowGraph::validate`]).
pub fn analyze(graph: &WorkflowGraph) -> DependencyAnalysis {
    let mut nodes: BTreeMap<NodeId, NodeDependencyInfo> = BTreeMap::new();

    for (id, node) in graph.nodes() {
        let mut dependencies: Vec<NodeId> = Vec::new();
        for link in graph.resolved_links(node) {
            if !dependencies.iter().any(|d| d.as_str() == link.source) {
                dependencies.push(NodeId::from(link.source));
            }
        }
        nodes.insert(
            id.clone(),
            NodeDependencyInfo {
                id: id.clone(),
                dependencies,
                dependents: Vec::new(),
                depth: 0,
            },
        );
    }

    // Reverse edges
    let edges: Vec<(NodeId, NodeId)> = nodes
        .values()
        .flat_map(|info| {
            info.dependencies
                .iter()
                .map(move |dep| (dep.clone(), info.id.clone()))
        })
        .collect();
    for (source, dependent) in edges {
        if let Some(info) = nodes.get_mut(&source) {
            info.dependents.push(dependent);
        }
    }

    let mut in_degree: HashMap<NodeId, usize> = nodes
        .values()
        .map(|info| (info.id.clone(), info.dependencies.len()))
        .collect();

    let mut queue: VecDeque<NodeId> = nodes
        .values()
        .filter(|info| info.dependencies.is_empty())
        .map(|info| info.id.clone())
        .collect();

    let mut max_depth = 0;

    while let Some(current) = queue.pop_front() {
        let (depth, dependents) = match nodes.get(&current) {
            Some(info) => (info.depth, info.dependents.clone()),
            None => continue,
        };
        max_depth = max_depth.max(depth);

        for dependent in dependents {
            if let Some(info) = nodes.get_mut(&dependent) {
                info.depth = info.depth.max(depth + 1);
            }
            if let Some(remaining) = in_degree.get_mut(&dependent) {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    DependencyAnalysis { nodes, max_depth }
}
