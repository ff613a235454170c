//! Arena-backed graph storage.
//!
//! This module provides:
//! - [`GraphBuilder`]: mutable arena used by codecs and indexers
//! - [`DirectedGraph`]: frozen graph with cached payload counts
//! - [`GraphError`]: structural validation errors

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::schema::{FeatureKind, FeatureSchema};

use super::leaf::LeafPayload;
use super::node::{DecisionNode, DecisionTest, GraphNode, Node, NodeKind};
use super::view::{children_of, GraphView};
use super::NodeId;

/// Free-form key/value properties stored alongside a graph.
pub type Properties = BTreeMap<String, String>;

// ============================================================================
// GraphError
// ============================================================================

/// Structural errors detected when a graph is frozen.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("node {node} out of bounds ({n_nodes} nodes)")]
    NodeOutOfBounds { node: NodeId, n_nodes: usize },
    #[error("node {node} has no child slot {slot}")]
    SlotOutOfRange { node: NodeId, slot: usize },
    #[error("node {node} has no free child slot")]
    NoFreeSlot { node: NodeId },
    #[error("node {node} is not a {expected}")]
    WrongNodeKind { node: NodeId, expected: &'static str },
    #[error("cycle detected at node {node}")]
    CycleDetected { node: NodeId },
    #[error("node {node} has more than one parent")]
    SharedNode { node: NodeId },
    #[error("node {node} is unreachable from the root")]
    UnreachableNode { node: NodeId },
    #[error("feature index {feature} of node {node} is not in the schema")]
    UnknownFeature { node: NodeId, feature: u32 },
    #[error("node {node} tests feature '{feature}' which is not {expected}")]
    FeatureKindMismatch {
        node: NodeId,
        feature: String,
        expected: FeatureKind,
    },
    #[error("node {node}: feature '{feature}' has {expected} values, node has {actual} children")]
    ChildCountMismatch {
        node: NodeId,
        feature: String,
        expected: usize,
        actual: usize,
    },
    #[error("graph nodes are not allowed in a tree (node {node})")]
    GraphNodeInTree { node: NodeId },
}

// ============================================================================
// GraphBuilder
// ============================================================================

/// Mutable arena for building a graph.
///
/// Nodes are added first and linked afterwards, which supports both
/// link-by-index deserialization and incremental parsing. [`finish`] runs
/// validation and the single counting pass.
///
/// [`finish`]: GraphBuilder::finish
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    schema: Arc<FeatureSchema>,
    nodes: Vec<Node>,
    root: Option<NodeId>,
    properties: Properties,
    cursors: Vec<u32>,
}

impl GraphBuilder {
    pub fn new(schema: Arc<FeatureSchema>) -> Self {
        Self {
            schema,
            nodes: Vec::new(),
            root: None,
            properties: Properties::new(),
            cursors: Vec::new(),
        }
    }

    pub fn with_capacity(schema: Arc<FeatureSchema>, capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            cursors: Vec::with_capacity(capacity),
            ..Self::new(schema)
        }
    }

    pub fn schema_arc(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    pub fn set_properties(&mut self, properties: Properties) {
        self.properties = properties;
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node::new(kind));
        self.cursors.push(0);
        id
    }

    pub fn add_decision(&mut self, node: DecisionNode) -> NodeId {
        self.push(NodeKind::Decision(node))
    }

    pub fn add_leaf(&mut self, payload: LeafPayload) -> NodeId {
        self.push(NodeKind::Leaf(payload))
    }

    /// Add a graph node; its existing children get it as parent if they
    /// have none yet.
    pub fn add_graph_node(&mut self, node: GraphNode) -> NodeId {
        let id = self.push(NodeKind::Graph(node));
        if let Some(leaf) = node.leaf {
            self.link(id, 0, leaf);
        }
        if let Some(decision) = node.decision {
            self.link(id, 1, decision);
        }
        id
    }

    /// Make `id` the root.
    pub fn set_root(&mut self, id: NodeId) {
        if let Some(old) = self.root.and_then(|r| self.nodes.get_mut(r as usize)) {
            old.is_root = false;
        }
        if let Some(node) = self.nodes.get_mut(id as usize) {
            node.is_root = true;
            node.mother = None;
        }
        self.root = Some(id);
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id as usize)
    }

    fn check(&self, id: NodeId) -> Result<(), GraphError> {
        if (id as usize) < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::NodeOutOfBounds {
                node: id,
                n_nodes: self.nodes.len(),
            })
        }
    }

    /// Record `parent` as the mother of `child` unless it already has one.
    fn link(&mut self, parent: NodeId, slot: u32, child: NodeId) {
        if let Some(node) = self.nodes.get_mut(child as usize) {
            if node.mother.is_none() && !node.is_root {
                node.mother = Some(parent);
                node.index = slot;
            }
        }
    }

    /// Put `child` into `slot` of decision node `parent`.
    pub fn set_child(
        &mut self,
        parent: NodeId,
        slot: usize,
        child: Option<NodeId>,
    ) -> Result<(), GraphError> {
        self.check(parent)?;
        if let Some(c) = child {
            self.check(c)?;
        }
        let NodeKind::Decision(d) = &mut self.nodes[parent as usize].kind else {
            return Err(GraphError::WrongNodeKind {
                node: parent,
                expected: "decision node",
            });
        };
        let entry = d
            .children_mut()
            .get_mut(slot)
            .ok_or(GraphError::SlotOutOfRange { node: parent, slot })?;
        *entry = child;
        if let Some(c) = child {
            self.link(parent, slot as u32, c);
        }
        Ok(())
    }

    /// Put `child` into the next unused slot of `parent`, returning the slot.
    ///
    /// Slots are filled in order; an empty slot is consumed by `None`.
    pub fn push_child(&mut self, parent: NodeId, child: Option<NodeId>) -> Result<usize, GraphError> {
        self.check(parent)?;
        let slot = self.cursors[parent as usize] as usize;
        let capacity = match &self.nodes[parent as usize].kind {
            NodeKind::Decision(d) => d.n_children(),
            _ => {
                return Err(GraphError::WrongNodeKind {
                    node: parent,
                    expected: "decision node",
                })
            }
        };
        if slot >= capacity {
            return Err(GraphError::NoFreeSlot { node: parent });
        }
        self.set_child(parent, slot, child)?;
        self.cursors[parent as usize] += 1;
        Ok(slot)
    }

    /// Number of slots of `parent` already filled by [`push_child`](Self::push_child).
    pub fn filled_slots(&self, parent: NodeId) -> usize {
        self.cursors.get(parent as usize).copied().unwrap_or(0) as usize
    }

    pub fn set_graph_leaf(&mut self, parent: NodeId, leaf: Option<NodeId>) -> Result<(), GraphError> {
        self.set_graph_child(parent, 0, leaf)
    }

    pub fn set_graph_decision(
        &mut self,
        parent: NodeId,
        decision: Option<NodeId>,
    ) -> Result<(), GraphError> {
        self.set_graph_child(parent, 1, decision)
    }

    fn set_graph_child(
        &mut self,
        parent: NodeId,
        slot: u32,
        child: Option<NodeId>,
    ) -> Result<(), GraphError> {
        self.check(parent)?;
        if let Some(c) = child {
            self.check(c)?;
        }
        let NodeKind::Graph(g) = &mut self.nodes[parent as usize].kind else {
            return Err(GraphError::WrongNodeKind {
                node: parent,
                expected: "graph node",
            });
        };
        if slot == 0 {
            g.leaf = child;
        } else {
            g.decision = child;
        }
        if let Some(c) = child {
            self.link(parent, slot, c);
        }
        Ok(())
    }

    /// Replace the leaf `target` with the whole of `other`.
    ///
    /// The other root takes over the arena slot and parent link of
    /// `target`; its remaining nodes are appended.
    pub(crate) fn splice(&mut self, target: NodeId, other: DirectedGraph) -> Result<(), GraphError> {
        self.check(target)?;
        let Some(other_root) = other.root else {
            return Err(GraphError::WrongNodeKind {
                node: target,
                expected: "non-empty subtree",
            });
        };
        let base = self.nodes.len() as NodeId;
        let remap = |id: NodeId| -> NodeId {
            match id.cmp(&other_root) {
                std::cmp::Ordering::Equal => target,
                std::cmp::Ordering::Less => base + id,
                std::cmp::Ordering::Greater => base + id - 1,
            }
        };

        let (mother, index, is_root) = {
            let t = &self.nodes[target as usize];
            (t.mother, t.index, t.is_root)
        };

        for (old_id, mut node) in other.nodes.into_iter().enumerate() {
            let old_id = old_id as NodeId;
            match &mut node.kind {
                NodeKind::Decision(d) => {
                    for child in d.children_mut().iter_mut().flatten() {
                        *child = remap(*child);
                    }
                }
                NodeKind::Graph(g) => {
                    g.leaf = g.leaf.map(remap);
                    g.decision = g.decision.map(remap);
                }
                NodeKind::Leaf(_) => {}
            }
            if old_id == other_root {
                node.mother = mother;
                node.index = index;
                node.is_root = is_root;
                self.nodes[target as usize] = node;
            } else {
                node.mother = node.mother.map(remap);
                self.nodes.push(node);
                self.cursors.push(0);
            }
        }
        Ok(())
    }

    /// Validate the structure, run the counting pass and freeze the graph.
    pub fn finish(self) -> Result<DirectedGraph, GraphError> {
        let mut graph = DirectedGraph {
            schema: self.schema,
            nodes: self.nodes,
            root: self.root,
            properties: self.properties,
        };
        graph.validate_and_count(true)?;
        Ok(graph)
    }
}

impl GraphView for GraphBuilder {
    fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    fn root(&self) -> Option<NodeId> {
        self.root
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    fn n_slots(&self) -> usize {
        self.nodes.len()
    }
}

// ============================================================================
// DirectedGraph
// ============================================================================

/// Frozen directed graph.
///
/// Owns its nodes, a shared schema and optional properties. Graph nodes may
/// be reached from several parents; every other node has exactly one.
/// Payload counts are cached at every node, so the graph is safe to share
/// between threads for concurrent reads.
#[derive(Debug, Clone)]
pub struct DirectedGraph {
    schema: Arc<FeatureSchema>,
    nodes: Vec<Node>,
    root: Option<NodeId>,
    properties: Properties,
}

impl DirectedGraph {
    /// Graph without nodes.
    pub fn empty(schema: Arc<FeatureSchema>) -> Self {
        Self {
            schema,
            nodes: Vec::new(),
            root: None,
            properties: Properties::new(),
        }
    }

    pub fn schema_arc(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Reopen the graph for structural edits.
    pub fn into_builder(self) -> GraphBuilder {
        let n = self.nodes.len();
        GraphBuilder {
            schema: self.schema,
            nodes: self.nodes,
            root: self.root,
            properties: self.properties,
            cursors: vec![0; n],
        }
    }

    /// Iterative DFS with color marking; fills in payload counts post-order.
    ///
    /// Shared nodes are accepted only when they are graph nodes.
    fn validate_and_count(&mut self, allow_shared_graph_nodes: bool) -> Result<(), GraphError> {
        let n_nodes = self.nodes.len();
        let Some(root) = self.root else {
            return match n_nodes {
                0 => Ok(()),
                _ => Err(GraphError::UnreachableNode { node: 0 }),
            };
        };
        if root as usize >= n_nodes {
            return Err(GraphError::NodeOutOfBounds {
                node: root,
                n_nodes,
            });
        }

        // 0 = unvisited, 1 = visiting, 2 = done
        let mut color = vec![0u8; n_nodes];
        let mut stack: Vec<(NodeId, u8)> = vec![(root, 0)];

        while let Some((node, phase)) = stack.pop() {
            let idx = node as usize;
            match phase {
                0 => {
                    match color[idx] {
                        0 => {}
                        1 => return Err(GraphError::CycleDetected { node }),
                        _ => {
                            if allow_shared_graph_nodes && self.nodes[idx].is_graph_node() {
                                continue;
                            }
                            return Err(GraphError::SharedNode { node });
                        }
                    }
                    self.check_node(node)?;
                    color[idx] = 1;
                    stack.push((node, 1));
                    for child in children_of(&self.nodes[idx]).into_iter().rev().flatten() {
                        if child as usize >= n_nodes {
                            return Err(GraphError::NodeOutOfBounds {
                                node: child,
                                n_nodes,
                            });
                        }
                        stack.push((child, 0));
                    }
                }
                _ => {
                    color[idx] = 2;
                    let count = match &self.nodes[idx].kind {
                        NodeKind::Leaf(payload) => payload.data_count(),
                        other => children_of_kind(other)
                            .map(|c| self.nodes[c as usize].data_count)
                            .sum(),
                    };
                    self.nodes[idx].data_count = count;
                }
            }
        }

        if let Some(i) = color.iter().position(|&c| c == 0) {
            return Err(GraphError::UnreachableNode { node: i as NodeId });
        }
        Ok(())
    }

    /// Per-node checks against the schema and child kinds.
    fn check_node(&self, id: NodeId) -> Result<(), GraphError> {
        match &self.nodes[id as usize].kind {
            NodeKind::Leaf(_) => Ok(()),
            NodeKind::Graph(g) => {
                if let Some(leaf) = g.leaf {
                    if !self.nodes.get(leaf as usize).is_some_and(Node::is_leaf) {
                        return Err(GraphError::WrongNodeKind {
                            node: leaf,
                            expected: "leaf",
                        });
                    }
                }
                if let Some(decision) = g.decision {
                    if !self
                        .nodes
                        .get(decision as usize)
                        .is_some_and(|n| n.is_decision() || n.is_graph_node())
                    {
                        return Err(GraphError::WrongNodeKind {
                            node: decision,
                            expected: "decision node",
                        });
                    }
                }
                Ok(())
            }
            NodeKind::Decision(d) => check_decision(&self.schema, id, d),
        }
    }

    /// Verify that no node other than the root has more than one parent
    /// and that no graph nodes are present.
    pub(crate) fn check_tree_shape(&self) -> Result<(), GraphError> {
        if let Some(id) = self.nodes.iter().position(Node::is_graph_node) {
            return Err(GraphError::GraphNodeInTree { node: id as NodeId });
        }
        let mut parents = vec![0u32; self.nodes.len()];
        for node in &self.nodes {
            for child in children_of(node).into_iter().flatten() {
                parents[child as usize] += 1;
                if parents[child as usize] > 1 {
                    return Err(GraphError::SharedNode { node: child });
                }
            }
        }
        Ok(())
    }
}

fn children_of_kind(kind: &NodeKind) -> impl Iterator<Item = NodeId> + '_ {
    let (slots, graph): (&[Option<NodeId>], Option<&GraphNode>) = match kind {
        NodeKind::Decision(d) => (d.children(), None),
        NodeKind::Graph(g) => (&[], Some(g)),
        NodeKind::Leaf(_) => (&[], None),
    };
    slots
        .iter()
        .copied()
        .flatten()
        .chain(graph.into_iter().flat_map(|g| [g.leaf, g.decision].into_iter().flatten()))
}

fn check_decision(schema: &FeatureSchema, id: NodeId, d: &DecisionNode) -> Result<(), GraphError> {
    let feature = d.feature();
    let meta = schema
        .get(feature as usize)
        .ok_or(GraphError::UnknownFeature { node: id, feature })?;
    let expected_kind = match d.test() {
        DecisionTest::ByteEquals(_) | DecisionTest::ByteOf => Some(FeatureKind::Byte),
        DecisionTest::ShortEquals(_) | DecisionTest::ShortOf => Some(FeatureKind::Short),
        DecisionTest::Below(_) => None,
    };
    if let Some(expected) = expected_kind {
        if meta.kind != expected {
            return Err(GraphError::FeatureKindMismatch {
                node: id,
                feature: meta.name.clone(),
                expected,
            });
        }
    }
    let expected_children = if d.test().is_binary() {
        2
    } else {
        meta.values.len()
    };
    if d.n_children() != expected_children {
        return Err(GraphError::ChildCountMismatch {
            node: id,
            feature: meta.name.clone(),
            expected: expected_children,
            actual: d.n_children(),
        });
    }
    Ok(())
}

impl GraphView for DirectedGraph {
    fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    fn root(&self) -> Option<NodeId> {
        self.root
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    fn n_slots(&self) -> usize {
        self.nodes.len()
    }
}
