//! Single-parent decision trees.

use std::sync::Arc;

use tracing::debug;

use crate::schema::{FeatureSchema, FeatureVector};

use super::graph::{DirectedGraph, GraphBuilder, GraphError, Properties};
use super::node::{Node, NodeKind};
use super::view::GraphView;
use super::NodeId;

/// Errors raised by [`Cart::graft_subtree`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraftError {
    #[error("node {0} is not a leaf")]
    NotALeaf(NodeId),
    #[error("node {0} is the root and cannot be replaced")]
    AtRoot(NodeId),
    #[error("cannot graft an empty tree")]
    EmptySubtree,
    #[error("grafted tree uses a different feature schema")]
    SchemaMismatch,
    #[error(transparent)]
    Structure(#[from] GraphError),
}

/// Classification and regression tree.
///
/// A [`DirectedGraph`] without graph nodes in which every node has at most
/// one parent. Adds count-thresholded descent and subtree grafting.
#[derive(Debug, Clone)]
pub struct Cart {
    graph: DirectedGraph,
}

impl Cart {
    /// Wrap a frozen graph, checking that it is tree-shaped.
    pub fn new(graph: DirectedGraph) -> Result<Self, GraphError> {
        graph.check_tree_shape()?;
        Ok(Self { graph })
    }

    /// Freeze a builder straight into a tree.
    pub fn from_builder(builder: GraphBuilder) -> Result<Self, GraphError> {
        Self::new(builder.finish()?)
    }

    /// Tree without nodes. Every interpretation yields nothing.
    pub fn empty(schema: Arc<FeatureSchema>) -> Self {
        Self {
            graph: DirectedGraph::empty(schema),
        }
    }

    pub fn graph(&self) -> &DirectedGraph {
        &self.graph
    }

    pub fn into_graph(self) -> DirectedGraph {
        self.graph
    }

    pub fn schema_arc(&self) -> &Arc<FeatureSchema> {
        self.graph.schema_arc()
    }

    pub fn properties(&self) -> &Properties {
        self.graph.properties()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.root().is_none()
    }

    /// Descend from the root and stop early where data gets sparse.
    ///
    /// With `min_count == 0` the walk continues to a leaf. Otherwise it
    /// stops at the deepest node whose cached count still exceeds
    /// `min_count`, never stepping onto a node at or below the threshold.
    /// An empty child slot ends the walk at its parent.
    pub fn interpret_to_node(&self, vector: &FeatureVector, min_count: u32) -> Option<NodeId> {
        let mut current = self.graph.root()?;
        loop {
            let node = self.graph.node(current);
            let NodeKind::Decision(decision) = &node.kind else {
                break;
            };
            if min_count > 0 && node.data_count <= min_count {
                break;
            }
            let Some(child) = decision.next_child(vector) else {
                break;
            };
            if min_count > 0 && self.graph.data_count(child) <= min_count {
                break;
            }
            current = child;
        }
        Some(current)
    }

    /// Replace the leaf `at_leaf` with the root of `other`.
    ///
    /// The grafted root loses its root flag and takes the leaf's place
    /// among its parent's children. Counts are recomputed afterwards.
    pub fn graft_subtree(&mut self, other: Cart, at_leaf: NodeId) -> Result<(), GraftError> {
        if at_leaf as usize >= self.graph.n_slots() {
            return Err(GraphError::NodeOutOfBounds {
                node: at_leaf,
                n_nodes: self.graph.n_slots(),
            }
            .into());
        }
        let target = self.graph.node(at_leaf);
        if !target.is_leaf() {
            return Err(GraftError::NotALeaf(at_leaf));
        }
        if target.mother.is_none() || target.is_root {
            return Err(GraftError::AtRoot(at_leaf));
        }
        if other.is_empty() {
            return Err(GraftError::EmptySubtree);
        }
        if !Arc::ptr_eq(self.schema_arc(), other.schema_arc())
            && **self.schema_arc() != **other.schema_arc()
        {
            return Err(GraftError::SchemaMismatch);
        }

        let grafted = other.graph.n_slots();
        let mut builder = self.graph.clone().into_builder();
        builder.splice(at_leaf, other.graph)?;
        *self = Cart::from_builder(builder)?;
        debug!(at_leaf, grafted, "grafted subtree");
        Ok(())
    }
}

impl From<Cart> for DirectedGraph {
    fn from(cart: Cart) -> Self {
        cart.graph
    }
}

impl TryFrom<DirectedGraph> for Cart {
    type Error = GraphError;

    fn try_from(graph: DirectedGraph) -> Result<Self, Self::Error> {
        Self::new(graph)
    }
}

impl GraphView for Cart {
    fn schema(&self) -> &FeatureSchema {
        self.graph.schema()
    }

    fn root(&self) -> Option<NodeId> {
        self.graph.root()
    }

    fn node(&self, id: NodeId) -> &Node {
        self.graph.node(id)
    }

    fn n_slots(&self) -> usize {
        self.graph.n_slots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::{DecisionNode, GraphNode, LeafPayload};
    use crate::schema::FeatureMeta;

    fn schema() -> Arc<FeatureSchema> {
        Arc::new(
            FeatureSchema::new(vec![
                FeatureMeta::byte("a", ["0", "1"]),
                FeatureMeta::byte("b", ["0", "1"]),
            ])
            .unwrap(),
        )
    }

    /// a is 0 ? (b is 0 ? [1] : [2, 3]) : [4, 5, 6, 7]
    fn tree() -> (Cart, [NodeId; 5]) {
        let mut b = GraphBuilder::new(schema());
        let root = b.add_decision(DecisionNode::byte_equals(0, 0));
        let inner = b.add_decision(DecisionNode::byte_equals(1, 0));
        let l1 = b.add_leaf(LeafPayload::Indices(vec![1]));
        let l2 = b.add_leaf(LeafPayload::Indices(vec![2, 3]));
        let l3 = b.add_leaf(LeafPayload::Indices(vec![4, 5, 6, 7]));
        b.set_root(root);
        b.push_child(root, Some(inner)).unwrap();
        b.push_child(root, Some(l3)).unwrap();
        b.push_child(inner, Some(l1)).unwrap();
        b.push_child(inner, Some(l2)).unwrap();
        (Cart::from_builder(b).unwrap(), [root, inner, l1, l2, l3])
    }

    fn vector(cart: &Cart, a: &str, b: &str) -> FeatureVector {
        cart.schema().encode(0, &[a, b]).unwrap()
    }

    #[test]
    fn zero_threshold_descends_to_leaf() {
        let (cart, [_, _, l1, l2, l3]) = tree();
        assert_eq!(cart.interpret_to_node(&vector(&cart, "0", "0"), 0), Some(l1));
        assert_eq!(cart.interpret_to_node(&vector(&cart, "0", "1"), 0), Some(l2));
        assert_eq!(cart.interpret_to_node(&vector(&cart, "1", "1"), 0), Some(l3));
    }

    #[test]
    fn threshold_stops_above_sparse_nodes() {
        let (cart, [root, inner, _, l2, _]) = tree();
        let v = vector(&cart, "0", "1");
        // inner holds 3, l2 holds 2
        assert_eq!(cart.interpret_to_node(&v, 1), Some(l2));
        assert_eq!(cart.interpret_to_node(&v, 2), Some(inner));
        assert_eq!(cart.interpret_to_node(&v, 3), Some(root));
        assert_eq!(cart.interpret_to_node(&v, 100), Some(root));
    }

    #[test]
    fn empty_slot_stops_at_parent() {
        let mut b = GraphBuilder::new(schema());
        let root = b.add_decision(DecisionNode::byte_equals(0, 0));
        let leaf = b.add_leaf(LeafPayload::Indices(vec![1]));
        b.set_root(root);
        b.set_child(root, 0, Some(leaf)).unwrap();
        let cart = Cart::from_builder(b).unwrap();
        assert_eq!(cart.interpret_to_node(&vector(&cart, "1", "0"), 0), Some(root));
        assert_eq!(cart.interpret(&vector(&cart, "1", "0")), None);
    }

    #[test]
    fn rejects_graph_nodes() {
        let mut b = GraphBuilder::new(schema());
        let leaf = b.add_leaf(LeafPayload::Indices(vec![1]));
        let g = b.add_graph_node(GraphNode::new(Some(leaf), None));
        b.set_root(g);
        assert!(matches!(
            Cart::from_builder(b),
            Err(GraphError::GraphNodeInTree { .. })
        ));
    }

    #[test]
    fn graft_replaces_leaf() {
        let (mut cart, [root, _, _, _, l3]) = tree();
        let (other, _) = tree();
        cart.graft_subtree(other, l3).unwrap();

        assert_eq!(cart.node_count(), 9);
        assert_eq!(cart.data_count(root), 3 + 7);
        assert!(!cart.node(l3).is_root());
        assert!(cart.node(l3).is_decision());
        assert_eq!(cart.node(l3).mother(), Some(root));
        assert_eq!(
            cart.interpret(&vector(&cart, "1", "1")),
            Some(&LeafPayload::Indices(vec![4, 5, 6, 7]))
        );
        assert_eq!(
            cart.interpret(&vector(&cart, "1", "0")),
            Some(&LeafPayload::Indices(vec![4, 5, 6, 7]))
        );
        let leaf = cart.interpret_to_node(&vector(&cart, "1", "0"), 0).unwrap();
        assert_eq!(cart.decision_path(leaf), "a!=0 - a!=0");
    }

    #[test]
    fn graft_errors() {
        let (mut cart, [root, inner, l1, _, _]) = tree();
        let (other, _) = tree();
        assert_eq!(cart.graft_subtree(other.clone(), inner), Err(GraftError::NotALeaf(inner)));
        assert_eq!(cart.graft_subtree(other, root), Err(GraftError::NotALeaf(root)));
        assert_eq!(
            cart.graft_subtree(Cart::empty(schema()), l1),
            Err(GraftError::EmptySubtree)
        );

        let foreign = Arc::new(FeatureSchema::new(vec![FeatureMeta::byte("z", ["0"])]).unwrap());
        let mut b = GraphBuilder::new(foreign);
        let leaf = b.add_leaf(LeafPayload::Indices(vec![]));
        b.set_root(leaf);
        let foreign_tree = Cart::from_builder(b).unwrap();
        assert_eq!(
            cart.graft_subtree(foreign_tree, l1),
            Err(GraftError::SchemaMismatch)
        );

        let mut b = GraphBuilder::new(schema());
        let leaf = b.add_leaf(LeafPayload::Indices(vec![1]));
        b.set_root(leaf);
        let mut single = Cart::from_builder(b).unwrap();
        let (other, _) = tree();
        assert_eq!(single.graft_subtree(other, leaf), Err(GraftError::AtRoot(leaf)));
    }
}
