//! Read-only graph interface and the traversals built on it.

use crate::schema::{FeatureSchema, FeatureVector};

use super::iter::{NodeFilter, NodeIter};
use super::leaf::{CollectedPayload, LeafPayload};
use super::node::{Node, NodeKind};
use super::NodeId;

/// Child slots of a node in traversal order.
///
/// Decision nodes list their slots; graph nodes list the leaf, then the
/// decision sub-graph.
pub(crate) fn children_of(node: &Node) -> Vec<Option<NodeId>> {
    match &node.kind {
        NodeKind::Decision(d) => d.children().to_vec(),
        NodeKind::Graph(g) => vec![g.leaf, g.decision],
        NodeKind::Leaf(_) => Vec::new(),
    }
}

/// Read-only view of an arena-backed graph.
///
/// Implemented by [`super::GraphBuilder`] (during construction),
/// [`super::DirectedGraph`] and [`super::Cart`], so traversal code is shared
/// between them.
pub trait GraphView {
    /// Schema the decision nodes are interpreted against.
    fn schema(&self) -> &FeatureSchema;

    /// Root node, or `None` for an empty graph.
    fn root(&self) -> Option<NodeId>;

    /// Node in the arena.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a valid node id.
    fn node(&self, id: NodeId) -> &Node;

    /// Number of arena slots.
    fn n_slots(&self) -> usize;

    /// Interpret `vector` from the root and return the payload it reaches.
    fn interpret(&self, vector: &FeatureVector) -> Option<&LeafPayload> {
        self.root().and_then(|root| self.interpret_from(root, vector))
    }

    /// Interpret `vector` starting at `start`.
    ///
    /// Decision nodes forward to the selected child; an empty slot ends the
    /// walk with `None`. A graph node first interprets its decision
    /// sub-graph and returns that payload if it is non-empty, otherwise it
    /// backs off to its own leaf.
    fn interpret_from(&self, start: NodeId, vector: &FeatureVector) -> Option<&LeafPayload> {
        let mut current = start;
        loop {
            match &self.node(current).kind {
                NodeKind::Leaf(payload) => return Some(payload),
                NodeKind::Decision(d) => current = d.next_child(vector)?,
                NodeKind::Graph(g) => {
                    let specific = g
                        .decision
                        .and_then(|d| self.interpret_from(d, vector))
                        .filter(|p| !p.is_empty());
                    return specific.or_else(|| {
                        g.leaf.and_then(|leaf| self.interpret_from(leaf, vector))
                    });
                }
            }
        }
    }

    /// Cached payload count at `id`.
    fn data_count(&self, id: NodeId) -> u32 {
        self.node(id).data_count
    }

    /// Number of nodes reachable from the root.
    fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Pre-order iterator over all reachable nodes.
    fn iter(&self) -> NodeIter<'_, Self> {
        NodeIter::new(self, self.root(), NodeFilter::ALL)
    }

    /// Pre-order iterator over reachable nodes accepted by `filter`.
    fn iter_filtered(&self, filter: NodeFilter) -> NodeIter<'_, Self> {
        NodeIter::new(self, self.root(), filter)
    }

    /// Pre-order iterator over the sub-graph below `start`.
    fn iter_from(&self, start: NodeId, filter: NodeFilter) -> NodeIter<'_, Self> {
        NodeIter::new(self, Some(start), filter)
    }

    /// Payload of every leaf below `id`, concatenated in traversal order.
    ///
    /// Returns `None` when there is no leaf or the first leaf holds a kind
    /// that cannot be concatenated (regression or pdf leaves).
    ///
    /// # Panics
    ///
    /// Panics when leaves of incompatible kinds are reachable from `id`.
    fn all_payload(&self, id: NodeId) -> Option<CollectedPayload> {
        let mut leaves = self
            .iter_from(id, NodeFilter::LEAVES)
            .filter_map(|leaf| self.node(leaf).as_leaf());
        let first = leaves.next()?;
        let mut collected = CollectedPayload::start(first)?;
        collected.extend(first);
        for payload in leaves {
            collected.extend(payload);
        }
        Some(collected)
    }

    /// Branch conditions from the root down to `id`, joined with ` - `.
    ///
    /// Follows the static parent link, which for a shared node is the parent
    /// it was first attached to.
    fn decision_path(&self, id: NodeId) -> String {
        let schema = self.schema();
        let mut steps = Vec::new();
        let mut current = id;
        while let Some(mother) = self.node(current).mother {
            if let NodeKind::Decision(d) = &self.node(mother).kind {
                steps.push(d.branch_label(schema, self.node(current).index as usize));
            }
            current = mother;
            if steps.len() > self.n_slots() {
                break;
            }
        }
        steps.reverse();
        steps.join(" - ")
    }

    /// Number of parent links between `id` and the root.
    fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(mother) = self.node(current).mother {
            depth += 1;
            current = mother;
            if depth > self.n_slots() {
                break;
            }
        }
        depth
    }
}
