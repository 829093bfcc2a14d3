//! The node-level dependency graph.
//!
//! Edges form a multiset: the multiplicity of an edge counts how many
//! primitive links currently connect the node pair.

use crate::errors::TangleError;
use crate::NodeId;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy)]
struct Edge {
    target: NodeId,
    multiplicity: u32,
}

#[derive(Debug, Default)]
pub struct NodeGraph {
    // BTreeMap keeps root collection deterministic (ids are assigned in
    // creation order).
    outgoing: BTreeMap<NodeId, Vec<Edge>>,
}

impl NodeGraph {
    pub fn add_node(&mut self, node: NodeId) {
        debug_assert!(!self.outgoing.contains_key(&node));
        self.outgoing.insert(node, vec![]);
    }

    pub fn remove_node(&mut self, node: NodeId) {
        for (other, edges) in self.outgoing.iter_mut() {
            if *other != node {
                edges.retain(|e| e.target != node);
            }
        }
        self.outgoing.remove(&node);
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.outgoing.contains_key(&node)
    }

    pub fn node_count(&self) -> usize {
        self.outgoing.len()
    }

    /// Adds one unit of multiplicity to `source -> target`; reports whether
    /// this is the first edge between the pair.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId) -> bool {
        let edges = self
            .outgoing
            .get_mut(&source)
            .expect("source node must be in the graph");
        match edges.iter_mut().find(|e| e.target == target) {
            Some(edge) => {
                edge.multiplicity += 1;
                false
            }
            None => {
                edges.push(Edge {
                    target,
                    multiplicity: 1,
                });
                true
            }
        }
    }

    /// Removes one unit of multiplicity; the edge disappears at zero.
    pub fn remove_edge(&mut self, source: NodeId, target: NodeId) {
        let edges = self
            .outgoing
            .get_mut(&source)
            .expect("source node must be in the graph");
        if let Some(index) = edges.iter().position(|e| e.target == target) {
            edges[index].multiplicity -= 1;
            if edges[index].multiplicity == 0 {
                edges.remove(index);
            }
        } else {
            debug_assert!(false, "edge to remove must exist");
        }
    }

    /// Sum of multiplicities of edges terminating at `node`.
    pub fn in_degree(&self, node: NodeId) -> usize {
        self.outgoing
            .values()
            .flat_map(|edges| edges.iter())
            .filter(|e| e.target == node)
            .map(|e| e.multiplicity as usize)
            .sum()
    }

    /// Sum of multiplicities of edges originating from `node`.
    pub fn out_degree(&self, node: NodeId) -> usize {
        self.outgoing
            .get(&node)
            .map(|edges| edges.iter().map(|e| e.multiplicity as usize).sum())
            .unwrap_or(0)
    }

    fn collect_root_nodes(&self) -> Vec<NodeId> {
        let mut has_incoming = std::collections::BTreeSet::new();
        for edges in self.outgoing.values() {
            for edge in edges {
                has_incoming.insert(edge.target);
            }
        }
        self.outgoing
            .keys()
            .copied()
            .filter(|n| !has_incoming.contains(n))
            .collect()
    }

    /// Produces an order in which every node precedes all nodes it has
    /// edges to, or reports a cycle.
    ///
    /// The queue is sparse: whenever an edge reaches a node that is already
    /// queued, the node is moved to the tail and its old slot is emptied.
    /// A node therefore ends up after the last of its predecessors. The
    /// queue growing past N^2 slots can only happen when nodes keep being
    /// re-queued, which is a sufficient cycle condition.
    pub fn topologically_sorted(&self) -> Result<Vec<NodeId>, TangleError> {
        let total = self.outgoing.len();

        let mut queue: Vec<Option<NodeId>> =
            self.collect_root_nodes().into_iter().map(Some).collect();
        if queue.is_empty() && total != 0 {
            // Every node has an incoming edge, so some of them form a loop.
            return Err(TangleError::CycleDetected);
        }

        let mut position: HashMap<NodeId, usize> = HashMap::with_capacity(total);
        let mut i = 0;
        while i < queue.len() {
            if i > total * total {
                return Err(TangleError::CycleDetected);
            }
            if let Some(node) = queue[i] {
                for edge in &self.outgoing[&node] {
                    queue.push(Some(edge.target));
                    let tail = queue.len() - 1;
                    if let Some(previous) = position.insert(edge.target, tail) {
                        queue[previous] = None;
                    }
                }
            }
            i += 1;
        }

        let sorted: Vec<NodeId> = queue.into_iter().flatten().collect();
        if sorted.len() != total {
            // Unreached nodes sit on a loop that no root leads into.
            return Err(TangleError::CycleDetected);
        }
        Ok(sorted)
    }
}
