//! Shared setup for integration tests.
//!
//! For assertion helpers and fixture trees, use `cart_engine::testing`.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Once};

use cart_engine::{Cart, DecisionNode, FeatureMeta, FeatureSchema, GraphBuilder, LeafPayload};
use tracing_subscriber::EnvFilter;

// Re-export testing utilities for convenience
#[allow(unused_imports)]
pub use cart_engine::testing::{
    assert_gaussian, assert_slice_approx_eq, sample_regression_tree, sample_schema, sample_tree,
    DEFAULT_TOLERANCE,
};
#[allow(unused_imports)]
pub use cart_engine::{assert_approx_eq, assert_approx_eq_f64};

static INIT: Once = Once::new();

/// Install a fmt subscriber filtered by `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Write `bytes` to `name` inside `dir` and return the full path.
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap_or_else(|e| panic!("Failed to write {}: {e}", path.display()));
    path
}

// =============================================================================
// Fixtures
// =============================================================================

/// Single byte feature `color` with values `red`, `blue`.
pub fn color_schema() -> Arc<FeatureSchema> {
    Arc::new(FeatureSchema::new(vec![FeatureMeta::byte("color", ["red", "blue"])]).unwrap())
}

/// Balanced tree of three binary decisions and four index leaves.
///
/// ```text
/// phone is a
///   yes: pos is n    ? [1] : [2 3]
///   no:  dur < 0.5   ? [4] : [5 6 7]
/// ```
pub fn balanced_tree() -> Cart {
    let schema = sample_schema();
    let mut b = GraphBuilder::new(schema);
    let root = b.add_decision(DecisionNode::byte_equals(0, 1));
    let left = b.add_decision(DecisionNode::short_equals(1, 1));
    let right = b.add_decision(DecisionNode::below(2, 0.5));
    b.set_root(root);
    b.push_child(root, Some(left)).unwrap();
    b.push_child(root, Some(right)).unwrap();
    for (parent, data) in [
        (left, vec![1]),
        (left, vec![2, 3]),
        (right, vec![4]),
        (right, vec![5, 6, 7]),
    ] {
        let leaf = b.add_leaf(LeafPayload::Indices(data));
        b.push_child(parent, Some(leaf)).unwrap();
    }
    Cart::from_builder(b).unwrap()
}

/// Every combination of the sample schema's discrete values, with a
/// few continuous values on either side of the fixture thresholds.
pub fn sample_vectors() -> Vec<cart_engine::FeatureVector> {
    let schema = sample_schema();
    let mut vectors = Vec::new();
    for phone in ["0", "a", "e", "i"] {
        for pos in ["0", "n", "v", "adj"] {
            for dur in ["0.05", "0.1", "0.3", "0.5", "1.5"] {
                vectors.push(schema.encode(vectors.len() as u32, &[phone, pos, dur]).unwrap());
            }
        }
    }
    vectors
}
