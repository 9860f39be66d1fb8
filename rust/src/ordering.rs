//! Topological ordering with frontier labels.
//!
//! `sort` runs an iterative depth-first traversal from every root and emits
//! nodes in post-order: a node appears only after all of its successors, so
//! the sequence read front-to-back is leaves-first. Reading it back-to-front
//! gives a dependency-satisfying (roots-first) visiting order.
//!
//! Frontier labels come in two flavors (see [`FrontierMode`]). The default
//! DFS depth is a heuristic: a node reachable over several branches keeps the
//! depth of its last visit, which is not its longest distance from a root.

use rustc_hash::FxHashMap;

use crate::config::FrontierMode;
use crate::graph::{GraphError, NodeId, PrecedenceGraph};

/// A node and its frontier label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderedNode {
    pub id: NodeId,
    pub frontier: u32,
}

/// Post-order (leaves-first) sequence produced by [`sort`].
#[derive(Clone, Debug, Default)]
pub struct TopologicalOrder {
    nodes: Vec<OrderedNode>,
    index: FxHashMap<NodeId, usize>,
}

impl TopologicalOrder {
    fn new(nodes: Vec<OrderedNode>) -> Self {
        let index = nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
        Self { nodes, index }
    }

    /// Leaves-first.
    pub fn nodes(&self) -> &[OrderedNode] {
        &self.nodes
    }

    /// Roots-first: every node comes after all of its predecessors.
    pub fn roots_first(&self) -> impl Iterator<Item = &OrderedNode> {
        self.nodes.iter().rev()
    }

    /// Frontier label of `id`, if it is part of the graph.
    pub fn frontier(&self, id: NodeId) -> Option<u32> {
        self.index.get(&id).map(|&i| self.nodes[i].frontier)
    }

    /// Number of ordered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Active,
    Done,
}

/// Order `graph` leaves-first and label every node with its frontier.
///
/// Roots are processed in reverse input order and successors lightest-edge
/// first, so the roots-first reading lists roots in input order and follows
/// the heaviest chain first. Fails with [`GraphError::Cycle`] if a traversal
/// reaches a node that is still on the active branch; nodes only reachable
/// from a cycle are traversed too, so every cycle is reported.
pub fn sort(graph: &PrecedenceGraph, mode: FrontierMode) -> Result<TopologicalOrder, GraphError> {
    let n = graph.len();
    let ids = graph.node_ids();
    let mut marks = vec![Mark::Unvisited; n];
    let mut frontier = vec![0u32; n];
    let mut post_order: Vec<usize> = Vec::with_capacity(n);

    let roots: Vec<usize> = graph
        .roots()
        .into_iter()
        .rev()
        .filter_map(|id| graph.position(id))
        .collect();
    let starts = roots.into_iter().chain(0..n);

    // (node, next successor to try, depth)
    let mut stack: Vec<(usize, usize, u32)> = Vec::new();

    for start in starts {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        marks[start] = Mark::Active;
        frontier[start] = 0;
        stack.push((start, 0, 0));

        while let Some(top) = stack.last_mut() {
            let (node, next, depth) = *top;
            let edges = graph.successors(ids[node]);
            if next < edges.len() {
                top.1 += 1;
                // Lightest first: iterate the weight-sorted list backwards.
                let edge = edges[edges.len() - 1 - next];
                let Some(child) = graph.position(edge.to) else {
                    continue;
                };
                match marks[child] {
                    Mark::Unvisited => {
                        marks[child] = Mark::Active;
                        frontier[child] = depth + 1;
                        stack.push((child, 0, depth + 1));
                    }
                    Mark::Active => return Err(GraphError::Cycle { node: ids[child] }),
                    Mark::Done => {
                        if mode == FrontierMode::DfsDepth {
                            frontier[child] = depth + 1;
                        }
                    }
                }
            } else {
                stack.pop();
                marks[node] = Mark::Done;
                post_order.push(node);
            }
        }
    }

    if mode == FrontierMode::LongestPath {
        for &node in post_order.iter().rev() {
            frontier[node] = graph
                .predecessors(ids[node])
                .iter()
                .filter_map(|&p| graph.position(p))
                .map(|p| frontier[p] + 1)
                .max()
                .unwrap_or(0);
        }
    }

    Ok(TopologicalOrder::new(
        post_order
            .into_iter()
            .map(|idx| OrderedNode {
                id: ids[idx],
                frontier: frontier[idx],
            })
            .collect(),
    ))
}
