//! Wagon text format and its binary packing, through files.

mod common;

use cart_engine::io::{
    WagonReadOptions, WagonReader, WagonTreeType, WagonWriteOptions, WagonWriter,
};
use cart_engine::repr::{Gaussian, LeafKind, WeightedIndices};
use cart_engine::{
    Cart, CollectedPayload, DecisionNode, FeatureVectorIndexer, FormatError, GraphBuilder,
    GraphView, LeafPayload, NodeFilter, StringPredictionTree,
};
use common::{
    assert_gaussian, balanced_tree, init_tracing, sample_regression_tree, sample_schema,
    sample_tree, sample_vectors, write_file,
};
use rstest::rstest;
use tempfile::TempDir;

fn reader(tree_type: WagonTreeType) -> WagonReader {
    WagonReader::new(WagonReadOptions::builder().tree_type(tree_type).build())
}

fn assert_same_routing(expected: &Cart, actual: &Cart) {
    for v in sample_vectors() {
        let want = expected.interpret(&v).filter(|p| !p.is_empty());
        let got = actual.interpret(&v).filter(|p| !p.is_empty());
        assert_eq!(got, want, "vector {v:?}");
    }
}

#[rstest]
#[case::classification(sample_tree(), WagonTreeType::Classification)]
#[case::balanced(balanced_tree(), WagonTreeType::Classification)]
#[case::regression(sample_regression_tree(), WagonTreeType::Regression)]
fn text_file_roundtrip(#[case] tree: Cart, #[case] tree_type: WagonTreeType) {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tree.wagon");
    WagonWriter::default().save_text(&tree, &path).unwrap();
    let loaded = reader(tree_type).load_text(&path, sample_schema()).unwrap();
    assert_same_routing(&tree, &loaded);
}

#[rstest]
#[case::classification(sample_tree(), WagonTreeType::Classification)]
#[case::regression(sample_regression_tree(), WagonTreeType::Regression)]
fn binary_file_roundtrip(#[case] tree: Cart, #[case] tree_type: WagonTreeType) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tree.bin");
    let writer = WagonWriter::new(
        WagonWriteOptions::builder()
            .tree_type(tree_type)
            .name("sample")
            .build(),
    );
    writer.save_binary(&tree, &path).unwrap();
    let loaded = reader(tree_type).load_binary(&path, sample_schema()).unwrap();
    assert_same_routing(&tree, &loaded);
    assert_eq!(writer.to_text(&loaded).unwrap(), writer.to_text(&tree).unwrap());
}

#[test]
fn empty_slot_is_written_as_empty_leaf() {
    let tree = sample_tree();
    let text = WagonWriter::default().to_text(&tree).unwrap();
    let expected = "\
((phone is a)
((((1 0) (2 0) (3 0)) 0))
((pos isShortOf 4)
((((4 0)) 0))
((dur < 0.1)
((((5 0)) 0))
((((6 0) (7 0)) 0)))
((() 0))
((() 0))))
";
    assert_eq!(text, expected);
    let loaded = WagonReader::default().parse_str(&text, sample_schema()).unwrap();
    // the empty slot comes back as an empty leaf
    assert_eq!(loaded.node_count(), tree.node_count() + 1);
}

#[test]
fn regression_leaves_read_from_text() {
    let text = "((dur < 0.1)\n((0.5 1))\n((0.25 2)))\n";
    let tree = reader(WagonTreeType::Regression)
        .parse_str(text, sample_schema())
        .unwrap();
    let schema = sample_schema();
    let long = schema.encode(0, &["0", "0", "0.3"]).unwrap();
    assert_gaussian(tree.interpret(&long), 0.25, 2.0);
    assert_eq!(WagonWriter::default().to_text(&tree).unwrap(), text);
}

// =============================================================================
// Bracket balance
// =============================================================================

#[rstest]
#[case::leaf_only("((() 0))\n")]
#[case::one_decision("((phone is a)\n((((1 0)) 0))\n((() 0)))\n")]
#[case::nested_last("((phone is a)\n((() 0))\n((pos is n)\n((() 0))\n((((2 0)) 0))))\n")]
#[case::nested_first("((phone is a)\n((pos is n)\n((() 0))\n((((2 0)) 0)))\n((() 0)))\n")]
#[case::comments_and_blanks(";; header\n\n((phone is e)\n((() 0))\n\n((() 0)))\n")]
fn well_formed_trees_parse(#[case] text: &str) {
    let tree = WagonReader::default().parse_str(text, sample_schema()).unwrap();
    assert!(!tree.is_empty());
    let expected: String = text
        .lines()
        .filter(|l| !l.is_empty() && !l.starts_with(";;"))
        .map(|l| format!("{l}\n"))
        .collect();
    assert_eq!(WagonWriter::default().to_text(&tree).unwrap(), expected);
}

#[rstest]
#[case::unclosed("((phone is a)\n((() 0))\n((() 0))\n")]
#[case::unclosed_nested("((phone is a)\n((() 0))\n((pos is n)\n((() 0))\n((() 0)))\n")]
#[case::short_leaf("((phone is a)\n((() 0)\n((() 0))))\n")]
#[case::too_many("((phone is a)\n((() 0))\n((() 0))))\n")]
#[case::after_root_leaf("((() 0))\n((() 0))\n")]
fn malformed_brackets_are_rejected(#[case] text: &str) {
    let err = WagonReader::default().parse_str(text, sample_schema()).unwrap_err();
    assert!(matches!(err, FormatError::BracketMismatch { .. }), "{err}");
}

#[test]
fn empty_input_gives_empty_tree() {
    let tree = WagonReader::default().parse_str("", sample_schema()).unwrap();
    assert!(tree.is_empty());
    assert_eq!(WagonWriter::default().to_text(&tree).unwrap(), "");
}

// =============================================================================
// Tree types
// =============================================================================

#[test]
fn top_level_tree_indexes_feature_vectors() {
    init_tracing();
    let text = "((phone is a)\n((() 0))\n((dur < 0.1)\n((() 0))\n((() 0))))\n";
    let tree = reader(WagonTreeType::TopLevel)
        .parse_str(text, sample_schema())
        .unwrap();
    assert!(tree
        .iter_filtered(NodeFilter::LEAVES)
        .all(|id| tree.node(id).as_leaf().map(LeafPayload::kind) == Some(LeafKind::FeatureVectors)));

    let mut indexer = FeatureVectorIndexer::new(tree).unwrap();
    let vectors = sample_vectors();
    let n = vectors.len();
    assert_eq!(indexer.fill_leaves(vectors), n);
    let indexed = indexer.freeze().unwrap();
    let root = indexed.root().unwrap();
    assert_eq!(indexed.data_count(root) as usize, n);
    let Some(CollectedPayload::FeatureVectors(all)) = indexed.all_payload(root) else {
        panic!("expected feature vectors");
    };
    assert_eq!(all.len(), n);

    let rejected = reader(WagonTreeType::TopLevel).parse_str("((((1 0)) 0))\n", sample_schema());
    assert!(matches!(rejected, Err(FormatError::InvalidLine { line: 1, .. })));
}

#[test]
fn indexed_top_level_tree_reloads_for_reindexing() {
    let text = "((phone is a)\n((() 0))\n((dur < 0.1)\n((() 0))\n((() 0))))\n";
    let top_level = reader(WagonTreeType::TopLevel);
    let mut indexer = FeatureVectorIndexer::new(top_level.parse_str(text, sample_schema()).unwrap()).unwrap();
    indexer.fill_leaves(sample_vectors());
    let indexed = indexer.freeze().unwrap();

    let writer = WagonWriter::new(
        WagonWriteOptions::builder()
            .tree_type(WagonTreeType::TopLevel)
            .build(),
    );
    let written = writer.to_text(&indexed).unwrap();
    assert_eq!(written, text);

    let reloaded = top_level.parse_str(&written, sample_schema()).unwrap();
    assert_eq!(reloaded.node_count(), indexed.node_count());
    let mut indexer = FeatureVectorIndexer::new(reloaded).unwrap();
    indexer.fill_leaves(sample_vectors());
    let reindexed = indexer.freeze().unwrap();
    let counts = |tree: &Cart| tree.iter().map(|id| tree.data_count(id)).collect::<Vec<_>>();
    assert_eq!(counts(&reindexed), counts(&indexed));
}

#[test]
fn regression_empty_slot_survives_text_roundtrip() {
    let schema = sample_schema();
    let mut b = GraphBuilder::new(schema.clone());
    let root = b.add_decision(DecisionNode::short_of(1, 4));
    b.set_root(root);
    for slot in [Some((0.5, 1.0)), None, Some((0.25, 2.0)), Some((1.0, 3.0))] {
        let child = slot.map(|(stddev, mean)| b.add_leaf(LeafPayload::Gaussian(Gaussian { stddev, mean })));
        b.push_child(root, child).unwrap();
    }
    let tree = Cart::from_builder(b).unwrap();

    let text = WagonWriter::default().to_text(&tree).unwrap();
    let loaded = reader(WagonTreeType::Regression).parse_str(&text, schema.clone()).unwrap();
    assert_eq!(loaded.node_count(), tree.node_count());
    for v in sample_vectors() {
        assert_eq!(loaded.interpret(&v), tree.interpret(&v), "vector {v:?}");
    }
    let noun = schema.encode(0, &["0", "n", "0"]).unwrap();
    assert_eq!(loaded.interpret(&noun), None);
    assert_eq!(WagonWriter::default().to_text(&loaded).unwrap(), text);
}

#[test]
fn string_tree_file_roundtrip() {
    let schema = sample_schema();
    let mut b = GraphBuilder::new(schema.clone());
    let root = b.add_decision(DecisionNode::byte_equals(0, 2));
    let yes = b.add_leaf(LeafPayload::WeightedIndices(WeightedIndices::new(
        vec![0, 2],
        vec![0.25, 0.75],
    )));
    let no = b.add_leaf(LeafPayload::WeightedIndices(WeightedIndices::new(vec![1], vec![1.0])));
    b.set_root(root);
    b.push_child(root, Some(yes)).unwrap();
    b.push_child(root, Some(no)).unwrap();
    let spt = StringPredictionTree::new(
        Cart::from_builder(b).unwrap(),
        vec!["ax".into(), "b b".into(), "\"".into()],
    );

    let dir = TempDir::new().unwrap();
    let mut bytes = Vec::new();
    WagonWriter::default().write_string_tree(&spt, &mut bytes).unwrap();
    let path = write_file(dir.path(), "letters.lts", &bytes);

    let file = std::io::BufReader::new(std::fs::File::open(path).unwrap());
    let loaded = WagonReader::default().read_string_tree(file, schema.clone()).unwrap();
    assert_eq!(loaded.symbols(), spt.symbols());
    let e = schema.encode(0, &["e", "0", "0"]).unwrap();
    let a = schema.encode(0, &["a", "0", "0"]).unwrap();
    assert_eq!(loaded.most_probable_symbol(&e), Some("\""));
    assert_eq!(loaded.most_probable_symbol(&a), Some("b b"));
}

#[test]
fn symbol_leaves_decode_through_feature() {
    let options = WagonReadOptions::builder()
        .tree_type(WagonTreeType::StringCart)
        .symbol_feature("phone")
        .build();
    let tree = WagonReader::new(options)
        .parse_str("((((1 0.5) (3 0.5)) 0))\n", sample_schema())
        .unwrap();
    let Some(LeafPayload::WeightedSymbols(s)) = tree.node(tree.root().unwrap()).as_leaf() else {
        panic!("expected weighted symbols");
    };
    assert_eq!(s.feature, Some(0));
    assert_eq!(s.entries.indices(), &[1, 3]);
}
