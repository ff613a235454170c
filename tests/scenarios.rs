//! End-to-end behaviour on small hand-built trees.

mod common;

use std::sync::Arc;

use cart_engine::io::{BinaryReader, BinaryWriter, WagonReadOptions, WagonReader, WagonTreeType};
use cart_engine::repr::WeightedIndices;
use cart_engine::{
    Cart, CollectedPayload, DecisionNode, FeatureMeta, FeatureSchema, FormatError, GraphBuilder,
    GraphNode, GraphView, LeafPayload, StringPredictionTree,
};
use common::{assert_gaussian, balanced_tree, color_schema, init_tracing};

// =============================================================================
// Interpretation
// =============================================================================

#[test]
fn binary_equality_routes_by_value() {
    init_tracing();
    let schema = color_schema();
    let mut b = GraphBuilder::new(schema.clone());
    let root = b.add_decision(DecisionNode::byte_equals(0, schema.byte_value(0, "red").unwrap()));
    let red = b.add_leaf(LeafPayload::Indices(vec![0]));
    let blue = b.add_leaf(LeafPayload::Indices(vec![1]));
    b.set_root(root);
    b.push_child(root, Some(red)).unwrap();
    b.push_child(root, Some(blue)).unwrap();
    let tree = Cart::from_builder(b).unwrap();

    let v_red = schema.encode(0, &["red"]).unwrap();
    let v_blue = schema.encode(1, &["blue"]).unwrap();
    assert_eq!(tree.interpret(&v_red), Some(&LeafPayload::Indices(vec![0])));
    assert_eq!(tree.interpret(&v_blue), Some(&LeafPayload::Indices(vec![1])));
    // same answer on repeated calls
    assert_eq!(tree.interpret(&v_red), tree.interpret(&v_red));
}

#[test]
fn string_tree_picks_heaviest_symbol() {
    let schema = Arc::new(FeatureSchema::new(vec![FeatureMeta::byte("letter", ["x"])]).unwrap());
    let mut b = GraphBuilder::new(schema.clone());
    let leaf = b.add_leaf(LeafPayload::WeightedIndices(WeightedIndices::new(
        vec![0, 1, 2],
        vec![0.2, 0.7, 0.1],
    )));
    b.set_root(leaf);
    let tree = StringPredictionTree::new(
        Cart::from_builder(b).unwrap(),
        vec!["a".into(), "b".into(), "c".into()],
    );
    let v = schema.encode(0, &["x"]).unwrap();
    assert_eq!(tree.most_probable_symbol(&v), Some("b"));
}

#[test]
fn binary_roundtrip_keeps_payload_order() {
    init_tracing();
    let tree = balanced_tree();
    assert_eq!(tree.node_count(), 7);

    let mut bytes = Vec::new();
    BinaryWriter::new().write(&tree, &mut bytes).unwrap();
    let loaded = BinaryReader::default().read(bytes.as_slice()).unwrap();

    assert_eq!(loaded.node_count(), 7);
    assert_eq!(
        loaded.all_payload(loaded.root().unwrap()),
        Some(CollectedPayload::Indices(vec![1, 2, 3, 4, 5, 6, 7]))
    );
    assert_eq!(
        loaded.all_payload(loaded.root().unwrap()),
        tree.all_payload(tree.root().unwrap())
    );
}

#[test]
fn weighted_pair_leaf_needs_both_closing_brackets() {
    let schema = color_schema();
    let reader = WagonReader::new(
        WagonReadOptions::builder()
            .tree_type(WagonTreeType::ExtendedClassification)
            .build(),
    );

    let tree = reader.parse_str("((0 1.0)(1 2.0) 0))\n", schema.clone()).unwrap();
    let payload = tree.node(tree.root().unwrap()).as_leaf().unwrap();
    let weighted = payload.weighted().unwrap();
    assert_eq!(weighted.indices(), &[0, 1]);
    assert_eq!(weighted.weights(), &[1.0, 2.0]);

    let err = reader.parse_str("((0 1.0)(1 2.0) 0)\n", schema).unwrap_err();
    assert!(matches!(err, FormatError::BracketMismatch { .. }), "{err}");
}

#[test]
fn regression_leaf_holds_exactly_one_pair() {
    let schema = color_schema();
    let reader = WagonReader::new(
        WagonReadOptions::builder()
            .tree_type(WagonTreeType::Regression)
            .build(),
    );

    let tree = reader.parse_str("((0.5 1.0))\n", schema.clone()).unwrap();
    assert_gaussian(tree.node(tree.root().unwrap()).as_leaf(), 0.5, 1.0);

    // pair lists belong to the weighted leaf kinds
    assert!(reader.parse_str("((0 1.0)(1 2.0) 0))\n", schema.clone()).is_err());

    let err = reader.parse_str("((0.5 1.0) 0))\n", schema).unwrap_err();
    assert!(matches!(err, FormatError::BracketMismatch { line: 1, .. }), "{err}");
}

#[test]
fn graph_node_backs_off_to_default_leaf() {
    let schema = color_schema();
    let mut b = GraphBuilder::new(schema.clone());
    let fallback = b.add_leaf(LeafPayload::Indices(vec![9]));
    let specific = b.add_decision(DecisionNode::byte_equals(0, 0));
    let red = b.add_leaf(LeafPayload::Indices(vec![0]));
    let nothing = b.add_leaf(LeafPayload::Indices(vec![]));
    b.push_child(specific, Some(red)).unwrap();
    b.push_child(specific, Some(nothing)).unwrap();
    let root = b.add_graph_node(GraphNode::new(Some(fallback), Some(specific)));
    b.set_root(root);
    let graph = b.finish().unwrap();

    let v_red = schema.encode(0, &["red"]).unwrap();
    let v_blue = schema.encode(1, &["blue"]).unwrap();
    assert_eq!(graph.interpret(&v_red), Some(&LeafPayload::Indices(vec![0])));
    assert_eq!(graph.interpret(&v_blue), Some(&LeafPayload::Indices(vec![9])));
}

// =============================================================================
// Thresholded descent
// =============================================================================

#[test]
fn interpret_to_node_stops_where_data_gets_sparse() {
    let tree = balanced_tree();
    let schema = tree.schema_arc().clone();
    // phone=e, dur=1.5 -> [5 6 7]
    let v = schema.encode(0, &["e", "0", "1.5"]).unwrap();

    let leaf = tree.interpret_to_node(&v, 0).unwrap();
    assert!(tree.node(leaf).is_leaf());
    assert_eq!(tree.data_count(leaf), 3);

    // right subtree holds 4, the leaf 3
    let mid = tree.interpret_to_node(&v, 3).unwrap();
    assert!(tree.node(mid).is_decision());
    assert_eq!(tree.data_count(mid), 4);
    assert_eq!(tree.depth(mid), 1);

    let root = tree.interpret_to_node(&v, 4).unwrap();
    assert_eq!(Some(root), tree.root());
}

#[test]
fn decision_path_describes_branches() {
    let tree = balanced_tree();
    let schema = tree.schema_arc().clone();
    let v = schema.encode(0, &["a", "v", "0"]).unwrap();
    let leaf = tree.interpret_to_node(&v, 0).unwrap();
    assert_eq!(tree.decision_path(leaf), "phone==a - pos!=n");
}
