//! Precedence graph construction over tasks or plans.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::config::ReferencePolicy;
use crate::models::{Plan, Task, Time};

/// Node identity within one graph (task id inside a plan, or plan id).
pub type NodeId = u32;

/// Errors raised while building or ordering a precedence graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Precedence cycle detected at node {node}")]
    Cycle { node: NodeId },
    #[error("Node {from} references unknown successor {to}")]
    UnknownReference { from: NodeId, to: NodeId },
    #[error("Node {0} appears more than once")]
    DuplicateNode(NodeId),
}

/// Anything with an identity, a successor list and an execution cost.
pub trait GraphNode {
    fn node_id(&self) -> NodeId;
    fn successor_ids(&self) -> &[NodeId];
    fn cost(&self) -> Time;
}

impl GraphNode for Task {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn successor_ids(&self) -> &[NodeId] {
        &self.successors
    }

    fn cost(&self) -> Time {
        self.processing_time
    }
}

impl GraphNode for Plan {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn successor_ids(&self) -> &[NodeId] {
        &self.successors
    }

    fn cost(&self) -> Time {
        self.total_processing_time()
    }
}

/// A weighted edge to a successor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub to: NodeId,
    /// Sum of both endpoints' costs; heavier chains sort first.
    pub weight: Time,
}

/// Successor/predecessor adjacency over a node set.
///
/// Nodes are stored in input order. Successor lists are sorted by descending
/// edge weight (stable, so equal weights keep declaration order).
#[derive(Clone, Debug, Default)]
pub struct PrecedenceGraph {
    nodes: Vec<NodeId>,
    index: FxHashMap<NodeId, usize>,
    successors: Vec<Vec<Edge>>,
    predecessors: Vec<Vec<NodeId>>,
    skipped: Vec<(NodeId, NodeId)>,
}

impl PrecedenceGraph {
    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True if `id` is a node of the graph.
    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    /// Node ids in input order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.nodes
    }

    pub(crate) fn position(&self, id: NodeId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Outgoing edges of `id`, heaviest first.
    pub fn successors(&self, id: NodeId) -> &[Edge] {
        self.position(id)
            .map(|idx| self.successors[idx].as_slice())
            .unwrap_or(&[])
    }

    /// Direct predecessors of `id`.
    pub fn predecessors(&self, id: NodeId) -> &[NodeId] {
        self.position(id)
            .map(|idx| self.predecessors[idx].as_slice())
            .unwrap_or(&[])
    }

    /// Nodes without incoming edges, in input order.
    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .zip(&self.predecessors)
            .filter(|(_, preds)| preds.is_empty())
            .map(|(&id, _)| id)
            .collect()
    }

    /// Number of kept edges.
    pub fn edge_count(&self) -> usize {
        self.successors.iter().map(Vec::len).sum()
    }

    /// Dangling (from, to) references dropped under `ReferencePolicy::Warn`.
    pub fn skipped(&self) -> &[(NodeId, NodeId)] {
        &self.skipped
    }
}

/// Build the adjacency view of `nodes`.
///
/// Edge weight is the sum of both endpoints' costs. A successor id that does
/// not resolve fails under `ReferencePolicy::Strict`; under `Warn` the edge is
/// dropped and recorded in [`PrecedenceGraph::skipped`].
pub fn build_adjacency<N: GraphNode>(
    nodes: &[N],
    policy: ReferencePolicy,
) -> Result<PrecedenceGraph, GraphError> {
    let mut graph = PrecedenceGraph {
        nodes: Vec::with_capacity(nodes.len()),
        index: FxHashMap::with_capacity_and_hasher(nodes.len(), Default::default()),
        successors: vec![Vec::new(); nodes.len()],
        predecessors: vec![Vec::new(); nodes.len()],
        skipped: Vec::new(),
    };

    for (idx, node) in nodes.iter().enumerate() {
        let id = node.node_id();
        if graph.index.insert(id, idx).is_some() {
            return Err(GraphError::DuplicateNode(id));
        }
        graph.nodes.push(id);
    }

    for (idx, node) in nodes.iter().enumerate() {
        let from = node.node_id();
        for &to in node.successor_ids() {
            let Some(&to_idx) = graph.index.get(&to) else {
                match policy {
                    ReferencePolicy::Strict => {
                        return Err(GraphError::UnknownReference { from, to })
                    }
                    ReferencePolicy::Warn => {
                        graph.skipped.push((from, to));
                        continue;
                    }
                }
            };
            if graph.successors[idx].iter().any(|e| e.to == to) {
                continue;
            }
            graph.successors[idx].push(Edge {
                to,
                weight: node.cost().saturating_add(nodes[to_idx].cost()),
            });
            graph.predecessors[to_idx].push(from);
        }
        graph.successors[idx].sort_by(|a, b| b.weight.cmp(&a.weight));
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task(id: u32, duration: Time, succs: Vec<u32>) -> Task {
        Task::new(id, 1, 0, 0, duration).with_successors(succs)
    }

    #[test]
    fn test_adjacency_and_weights() {
        let tasks = vec![
            make_task(1, 2, vec![2, 3]),
            make_task(2, 5, vec![]),
            make_task(3, 1, vec![]),
        ];
        let graph = build_adjacency(&tasks, ReferencePolicy::Strict).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(
            graph.successors(1),
            &[Edge { to: 2, weight: 7 }, Edge { to: 3, weight: 3 }]
        );
        assert_eq!(graph.predecessors(2), &[1]);
        assert_eq!(graph.roots(), vec![1]);
    }

    #[test]
    fn test_edge_weight_saturates() {
        let tasks = vec![
            make_task(1, Time::MAX, vec![2]),
            make_task(2, Time::MAX, vec![]),
        ];
        let graph = build_adjacency(&tasks, ReferencePolicy::Strict).unwrap();
        assert_eq!(graph.successors(1), &[Edge { to: 2, weight: Time::MAX }]);
    }

    #[test]
    fn test_heavier_edge_sorts_first() {
        let tasks = vec![
            make_task(1, 1, vec![2, 3]),
            make_task(2, 1, vec![]),
            make_task(3, 9, vec![]),
        ];
        let graph = build_adjacency(&tasks, ReferencePolicy::Strict).unwrap();
        let order: Vec<u32> = graph.successors(1).iter().map(|e| e.to).collect();
        assert_eq!(order, vec![3, 2]);
    }

    #[test]
    fn test_unknown_reference_strict() {
        let tasks = vec![make_task(1, 2, vec![42])];
        let err = build_adjacency(&tasks, ReferencePolicy::Strict).unwrap_err();
        assert_eq!(err, GraphError::UnknownReference { from: 1, to: 42 });
    }

    #[test]
    fn test_unknown_reference_warn_skips() {
        let tasks = vec![make_task(1, 2, vec![42]), make_task(2, 1, vec![])];
        let graph = build_adjacency(&tasks, ReferencePolicy::Warn).unwrap();
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.skipped(), &[(1, 42)]);
        assert_eq!(graph.roots(), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_node() {
        let tasks = vec![make_task(1, 2, vec![]), make_task(1, 3, vec![])];
        let err = build_adjacency(&tasks, ReferencePolicy::Warn).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode(1));
    }

    #[test]
    fn test_plan_level_weights() {
        let a = Plan::new(1, 0)
            .with_successors([2])
            .with_tasks([Task::new(1, 1, 0, 0, 3), Task::new(2, 1, 0, 0, 4)])
            .unwrap();
        let b = Plan::new(2, 0)
            .with_tasks([Task::new(1, 2, 0, 0, 5)])
            .unwrap();
        let graph = build_adjacency(&[a, b], ReferencePolicy::Strict).unwrap();
        assert_eq!(graph.successors(1), &[Edge { to: 2, weight: 12 }]);
    }
}
