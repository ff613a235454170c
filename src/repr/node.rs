//! Node types: decision nodes, graph nodes and the arena slot wrapping them.

use serde::{Deserialize, Serialize};

use crate::schema::{FeatureSchema, FeatureVector};

use super::leaf::LeafPayload;
use super::NodeId;

// ============================================================================
// DecisionTest
// ============================================================================

/// The feature test performed by a decision node.
///
/// Binary tests have exactly two children: child 0 is taken when the test
/// holds, child 1 otherwise. N-ary tests have one child per declared value
/// of the tested feature and select the child by ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DecisionTest {
    /// Byte-valued feature equals the stored ordinal.
    ByteEquals(u8),
    /// Short-valued feature equals the stored ordinal.
    ShortEquals(i16),
    /// Feature value, read as a float, is below the threshold.
    Below(f32),
    /// Byte-valued ordinal selects the child directly.
    ByteOf,
    /// Short-valued ordinal selects the child directly.
    ShortOf,
}

impl DecisionTest {
    /// Numeric tag used by the binary format.
    pub fn tag(&self) -> i32 {
        match self {
            DecisionTest::ByteEquals(_) => 0,
            DecisionTest::ShortEquals(_) => 1,
            DecisionTest::Below(_) => 2,
            DecisionTest::ByteOf => 3,
            DecisionTest::ShortOf => 4,
        }
    }

    /// Returns true for the two-way tests.
    #[inline]
    pub fn is_binary(&self) -> bool {
        !matches!(self, DecisionTest::ByteOf | DecisionTest::ShortOf)
    }
}

// ============================================================================
// DecisionNode
// ============================================================================

/// Routing node: tests one feature and forwards to one child slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionNode {
    feature: u32,
    test: DecisionTest,
    children: Vec<Option<NodeId>>,
}

impl DecisionNode {
    /// Equality test on a byte-valued feature.
    pub fn byte_equals(feature: u32, value: u8) -> Self {
        Self::with_slots(feature, DecisionTest::ByteEquals(value), 2)
    }

    /// Equality test on a short-valued feature.
    pub fn short_equals(feature: u32, value: i16) -> Self {
        Self::with_slots(feature, DecisionTest::ShortEquals(value), 2)
    }

    /// Threshold test: child 0 when the value is below `threshold`.
    pub fn below(feature: u32, threshold: f32) -> Self {
        Self::with_slots(feature, DecisionTest::Below(threshold), 2)
    }

    /// N-ary node over a byte-valued feature with `n_children` slots.
    pub fn byte_of(feature: u32, n_children: usize) -> Self {
        Self::with_slots(feature, DecisionTest::ByteOf, n_children)
    }

    /// N-ary node over a short-valued feature with `n_children` slots.
    pub fn short_of(feature: u32, n_children: usize) -> Self {
        Self::with_slots(feature, DecisionTest::ShortOf, n_children)
    }

    fn with_slots(feature: u32, test: DecisionTest, n_children: usize) -> Self {
        Self {
            feature,
            test,
            children: vec![None; n_children],
        }
    }

    /// Index of the tested feature.
    #[inline]
    pub fn feature(&self) -> u32 {
        self.feature
    }

    #[inline]
    pub fn test(&self) -> &DecisionTest {
        &self.test
    }

    /// Child slots in order. `None` marks an empty slot.
    #[inline]
    pub fn children(&self) -> &[Option<NodeId>] {
        &self.children
    }

    #[inline]
    pub fn n_children(&self) -> usize {
        self.children.len()
    }

    /// Child in `slot`, or `None` if the slot is empty or out of range.
    #[inline]
    pub fn child(&self, slot: usize) -> Option<NodeId> {
        self.children.get(slot).copied().flatten()
    }

    pub(crate) fn children_mut(&mut self) -> &mut [Option<NodeId>] {
        &mut self.children
    }

    /// Slot index selected by `vector`.
    #[inline]
    pub fn slot_for(&self, vector: &FeatureVector) -> usize {
        let f = self.feature as usize;
        match self.test {
            DecisionTest::ByteEquals(value) => usize::from(vector.byte_feature(f) != value),
            DecisionTest::ShortEquals(value) => usize::from(vector.short_feature(f) != value),
            DecisionTest::Below(threshold) => {
                let value = if vector.is_byte_feature(f) {
                    f32::from(vector.byte_feature(f))
                } else if vector.is_short_feature(f) {
                    f32::from(vector.short_feature(f))
                } else {
                    vector.continuous_feature(f)
                };
                usize::from(!(value < threshold))
            }
            DecisionTest::ByteOf => usize::from(vector.byte_feature(f)),
            DecisionTest::ShortOf => {
                // Negative ordinals select no child.
                usize::try_from(vector.short_feature(f)).unwrap_or(usize::MAX)
            }
        }
    }

    /// Child selected by `vector`; `None` when that slot is empty.
    #[inline]
    pub fn next_child(&self, vector: &FeatureVector) -> Option<NodeId> {
        self.child(self.slot_for(vector))
    }

    /// Human-readable test, e.g. `color is red` or `dur < 0.5`.
    pub fn definition(&self, schema: &FeatureSchema) -> String {
        let name = feature_label(schema, self.feature);
        match self.test {
            DecisionTest::ByteEquals(v) => {
                format!("{name} is {}", value_label(schema, self.feature, i32::from(v)))
            }
            DecisionTest::ShortEquals(v) => {
                format!("{name} is {}", value_label(schema, self.feature, i32::from(v)))
            }
            DecisionTest::Below(t) => format!("{name} < {t}"),
            DecisionTest::ByteOf => format!("{name} isByteOf {}", self.children.len()),
            DecisionTest::ShortOf => format!("{name} isShortOf {}", self.children.len()),
        }
    }

    /// Description of the branch taken into `slot`, e.g. `color!=red`.
    pub fn branch_label(&self, schema: &FeatureSchema, slot: usize) -> String {
        let name = feature_label(schema, self.feature);
        let (op, value) = match self.test {
            DecisionTest::ByteEquals(v) => (
                if slot == 0 { "==" } else { "!=" },
                value_label(schema, self.feature, i32::from(v)),
            ),
            DecisionTest::ShortEquals(v) => (
                if slot == 0 { "==" } else { "!=" },
                value_label(schema, self.feature, i32::from(v)),
            ),
            DecisionTest::Below(t) => (if slot == 0 { "<" } else { ">=" }, t.to_string()),
            DecisionTest::ByteOf | DecisionTest::ShortOf => {
                ("==", value_label(schema, self.feature, slot as i32))
            }
        };
        format!("{name}{op}{value}")
    }
}

fn feature_label(schema: &FeatureSchema, feature: u32) -> String {
    schema
        .feature_name(feature as usize)
        .map(str::to_string)
        .unwrap_or_else(|_| format!("#{feature}"))
}

fn value_label(schema: &FeatureSchema, feature: u32, ordinal: i32) -> String {
    schema
        .value_name(feature as usize, ordinal)
        .map(str::to_string)
        .unwrap_or_else(|_| ordinal.to_string())
}

// ============================================================================
// GraphNode
// ============================================================================

/// Back-off node: a specific decision sub-graph plus a default leaf.
///
/// The only node kind allowed to have more than one parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Default leaf returned when the decision sub-graph yields nothing.
    pub leaf: Option<NodeId>,
    /// More specific decision sub-graph.
    pub decision: Option<NodeId>,
}

impl GraphNode {
    pub fn new(leaf: Option<NodeId>, decision: Option<NodeId>) -> Self {
        Self { leaf, decision }
    }
}

// ============================================================================
// Node
// ============================================================================

/// Payload of an arena slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Decision(DecisionNode),
    Leaf(LeafPayload),
    Graph(GraphNode),
}

/// One arena slot: a node plus its link to the parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) mother: Option<NodeId>,
    pub(crate) index: u32,
    pub(crate) is_root: bool,
    pub(crate) data_count: u32,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            mother: None,
            index: 0,
            is_root: false,
            data_count: 0,
        }
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Parent through which this node was first attached.
    #[inline]
    pub fn mother(&self) -> Option<NodeId> {
        self.mother
    }

    /// Position among the parent's children.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Payload count cached by the counting pass. Zero before it ran.
    #[inline]
    pub fn data_count(&self) -> u32 {
        self.data_count
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    #[inline]
    pub fn is_decision(&self) -> bool {
        matches!(self.kind, NodeKind::Decision(_))
    }

    #[inline]
    pub fn is_graph_node(&self) -> bool {
        matches!(self.kind, NodeKind::Graph(_))
    }

    pub fn as_decision(&self) -> Option<&DecisionNode> {
        match &self.kind {
            NodeKind::Decision(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafPayload> {
        match &self.kind {
            NodeKind::Leaf(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_graph_node(&self) -> Option<&GraphNode> {
        match &self.kind {
            NodeKind::Graph(g) => Some(g),
            _ => None,
        }
    }
}
