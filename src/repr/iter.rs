//! Depth-first node iteration that is safe over shared sub-graphs.

use std::collections::HashSet;

use super::node::Node;
use super::view::GraphView;
use super::NodeId;

/// Which node kinds an iteration yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeFilter {
    pub leaves: bool,
    pub decisions: bool,
    pub graph_nodes: bool,
}

impl NodeFilter {
    pub const ALL: Self = Self {
        leaves: true,
        decisions: true,
        graph_nodes: true,
    };
    pub const LEAVES: Self = Self {
        leaves: true,
        decisions: false,
        graph_nodes: false,
    };
    pub const DECISIONS: Self = Self {
        leaves: false,
        decisions: true,
        graph_nodes: false,
    };
    pub const GRAPH_NODES: Self = Self {
        leaves: false,
        decisions: false,
        graph_nodes: true,
    };

    #[inline]
    pub fn accepts(&self, node: &Node) -> bool {
        (self.leaves && node.is_leaf())
            || (self.decisions && node.is_decision())
            || (self.graph_nodes && node.is_graph_node())
    }
}

impl Default for NodeFilter {
    fn default() -> Self {
        Self::ALL
    }
}

/// Pre-order iterator over the nodes reachable from a start node.
///
/// Children are visited in slot order; a graph node is followed by its leaf
/// and then its decision sub-graph. Every node is yielded at most once, so
/// shared sub-graphs are not repeated and cycles terminate. Only child edges
/// are followed, which keeps the walk inside the sub-graph below the start
/// node. The iterator is single-pass.
pub struct NodeIter<'a, G: GraphView + ?Sized> {
    graph: &'a G,
    stack: Vec<NodeId>,
    visited: HashSet<NodeId>,
    filter: NodeFilter,
}

impl<'a, G: GraphView + ?Sized> NodeIter<'a, G> {
    pub fn new(graph: &'a G, start: Option<NodeId>, filter: NodeFilter) -> Self {
        Self {
            graph,
            stack: start.into_iter().collect(),
            visited: HashSet::new(),
            filter,
        }
    }
}

impl<G: GraphView + ?Sized> Iterator for NodeIter<'_, G> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(id) = self.stack.pop() {
            if !self.visited.insert(id) {
                continue;
            }
            let node = self.graph.node(id);
            // Push in reverse so the first child is popped first.
            for child in super::view::children_of(node).into_iter().rev().flatten() {
                if !self.visited.contains(&child) {
                    self.stack.push(child);
                }
            }
            if self.filter.accepts(node) {
                return Some(id);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::repr::{DecisionNode, GraphBuilder, GraphNode, LeafPayload};
    use crate::schema::{FeatureMeta, FeatureSchema};

    fn schema() -> Arc<FeatureSchema> {
        Arc::new(FeatureSchema::new(vec![FeatureMeta::byte("b", ["x", "y"])]).unwrap())
    }

    #[test]
    fn preorder_with_children_in_slot_order() {
        let mut b = GraphBuilder::new(schema());
        let root = b.add_decision(DecisionNode::byte_equals(0, 0));
        let inner = b.add_decision(DecisionNode::byte_equals(0, 1));
        let l1 = b.add_leaf(LeafPayload::Indices(vec![1]));
        let l2 = b.add_leaf(LeafPayload::Indices(vec![2]));
        let l3 = b.add_leaf(LeafPayload::Indices(vec![3]));
        b.set_root(root);
        b.set_child(root, 0, Some(inner)).unwrap();
        b.set_child(root, 1, Some(l3)).unwrap();
        b.set_child(inner, 0, Some(l1)).unwrap();
        b.set_child(inner, 1, Some(l2)).unwrap();
        let graph = b.finish().unwrap();

        let all: Vec<_> = graph.iter().collect();
        assert_eq!(all, vec![root, inner, l1, l2, l3]);

        let leaves: Vec<_> = graph.iter_filtered(NodeFilter::LEAVES).collect();
        assert_eq!(leaves, vec![l1, l2, l3]);

        let below_inner: Vec<_> = graph.iter_from(inner, NodeFilter::ALL).collect();
        assert_eq!(below_inner, vec![inner, l1, l2]);
    }

    #[test]
    fn shared_graph_node_visited_once() {
        let mut b = GraphBuilder::new(schema());
        let root = b.add_decision(DecisionNode::byte_equals(0, 0));
        let default_leaf = b.add_leaf(LeafPayload::Indices(vec![9]));
        let shared = b.add_graph_node(GraphNode::new(Some(default_leaf), None));
        b.set_root(root);
        b.set_child(root, 0, Some(shared)).unwrap();
        b.set_child(root, 1, Some(shared)).unwrap();
        let graph = b.finish().unwrap();

        let all: Vec<_> = graph.iter().collect();
        assert_eq!(all, vec![root, shared, default_leaf]);
        let graph_nodes: Vec<_> = graph.iter_filtered(NodeFilter::GRAPH_NODES).collect();
        assert_eq!(graph_nodes, vec![shared]);
    }

    #[test]
    fn graph_node_leaf_precedes_decision() {
        let mut b = GraphBuilder::new(schema());
        let leaf = b.add_leaf(LeafPayload::Indices(vec![0]));
        let dec = b.add_decision(DecisionNode::byte_equals(0, 0));
        let a = b.add_leaf(LeafPayload::Indices(vec![1]));
        let c = b.add_leaf(LeafPayload::Indices(vec![2]));
        let g = b.add_graph_node(GraphNode::default());
        b.set_root(g);
        b.set_graph_leaf(g, Some(leaf)).unwrap();
        b.set_graph_decision(g, Some(dec)).unwrap();
        b.set_child(dec, 0, Some(a)).unwrap();
        b.set_child(dec, 1, Some(c)).unwrap();
        let graph = b.finish().unwrap();

        let all: Vec<_> = graph.iter().collect();
        assert_eq!(all, vec![g, leaf, dec, a, c]);
    }
}
