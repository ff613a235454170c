//! Feature-vector indexing: the one phase in which leaves are mutable.
//!
//! A top-level tree is built with empty feature-vector leaves; every unit
//! of a corpus is routed to its leaf and appended there. Once all vectors
//! are placed, [`FeatureVectorIndexer::freeze`] recounts the tree and hands
//! it out as an ordinary immutable [`Cart`].

use tracing::debug;

use crate::schema::FeatureVector;

use super::cart::Cart;
use super::graph::{GraphBuilder, GraphError};
use super::leaf::LeafPayload;
use super::node::NodeKind;
use super::view::GraphView;
use super::NodeId;

/// Accumulates feature vectors in the leaves of a tree.
#[derive(Debug)]
pub struct FeatureVectorIndexer {
    builder: GraphBuilder,
    placed: usize,
    dropped: usize,
}

impl FeatureVectorIndexer {
    /// Start indexing into `tree`, whose leaves must all hold feature vectors.
    pub fn new(tree: Cart) -> Result<Self, GraphError> {
        if let Some(leaf) = tree
            .iter_filtered(super::NodeFilter::LEAVES)
            .find(|&id| !matches!(tree.node(id).as_leaf(), Some(LeafPayload::FeatureVectors(_))))
        {
            return Err(GraphError::WrongNodeKind {
                node: leaf,
                expected: "feature-vector leaf",
            });
        }
        Ok(Self {
            builder: tree.into_graph().into_builder(),
            placed: 0,
            dropped: 0,
        })
    }

    /// Leaf that `vector` is routed to, or `None` when it ends in an empty slot.
    pub fn route(&self, vector: &FeatureVector) -> Option<NodeId> {
        let mut current = self.builder.root()?;
        loop {
            match &self.builder.node(current).kind {
                NodeKind::Decision(d) => current = d.next_child(vector)?,
                NodeKind::Leaf(_) => return Some(current),
                NodeKind::Graph(_) => return None,
            }
        }
    }

    /// Append `vector` to the leaf it is routed to.
    pub fn add(&mut self, vector: FeatureVector) -> Option<NodeId> {
        let Some(leaf) = self.route(&vector) else {
            self.dropped += 1;
            return None;
        };
        if let Some(node) = self.builder.node_mut(leaf) {
            if let NodeKind::Leaf(LeafPayload::FeatureVectors(vectors)) = &mut node.kind {
                vectors.push(vector);
                self.placed += 1;
            }
        }
        Some(leaf)
    }

    /// Route every vector of `vectors`; returns how many found a leaf.
    pub fn fill_leaves<I>(&mut self, vectors: I) -> usize
    where
        I: IntoIterator<Item = FeatureVector>,
    {
        vectors
            .into_iter()
            .filter_map(|v| self.add(v))
            .count()
    }

    pub fn n_placed(&self) -> usize {
        self.placed
    }

    pub fn n_dropped(&self) -> usize {
        self.dropped
    }

    /// Finish indexing: recount and freeze.
    pub fn freeze(self) -> Result<Cart, GraphError> {
        debug!(placed = self.placed, dropped = self.dropped, "freezing indexed tree");
        Cart::from_builder(self.builder)
    }
}
