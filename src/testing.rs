//! Testing utilities for cart-engine.
//!
//! Assertion helpers and small fixture trees shared by unit tests and
//! integration tests.
//!
//! ```ignore
//! use cart_engine::testing::{sample_schema, sample_tree};
//! use cart_engine::assert_approx_eq;
//! ```

use std::sync::Arc;

use crate::repr::{Cart, DecisionNode, Gaussian, GraphBuilder, LeafPayload};
use crate::schema::{FeatureMeta, FeatureSchema};

// =============================================================================
// Constants
// =============================================================================

/// Default tolerance for floating point comparisons.
pub const DEFAULT_TOLERANCE: f32 = 1e-5;

/// Same tolerance as f64.
pub const DEFAULT_TOLERANCE_F64: f64 = 1e-5;

// =============================================================================
// Floating Point Assertions
// =============================================================================

/// Assert that two f32 values are approximately equal.
///
/// # Examples
///
/// ```
/// # use cart_engine::assert_approx_eq;
/// assert_approx_eq!(1.0f32, 1.0001f32, 0.001);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $tolerance:expr) => {{
        let left_val: f32 = $left;
        let right_val: f32 = $right;
        let tol: f32 = $tolerance;
        if !$crate::approx::abs_diff_eq!(left_val, right_val, epsilon = tol) {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`\n right: `{:?}`\n  diff: `{:?}` > tolerance `{:?}`",
                left_val, right_val, (left_val - right_val).abs(), tol
            );
        }
    }};
    ($left:expr, $right:expr, $tolerance:expr, $($arg:tt)+) => {{
        let left_val: f32 = $left;
        let right_val: f32 = $right;
        let tol: f32 = $tolerance;
        if !$crate::approx::abs_diff_eq!(left_val, right_val, epsilon = tol) {
            panic!(
                "assertion failed: `(left ≈ right)` - {}\n  left: `{:?}`\n right: `{:?}`\n  diff: `{:?}` > tolerance `{:?}`",
                format_args!($($arg)+), left_val, right_val, (left_val - right_val).abs(), tol
            );
        }
    }};
}

/// Assert that two f64 values are approximately equal.
///
/// ```
/// # use cart_engine::assert_approx_eq_f64;
/// assert_approx_eq_f64!(1.0f64, 1.0001f64, 0.001);
/// ```
#[macro_export]
macro_rules! assert_approx_eq_f64 {
    ($left:expr, $right:expr, $tolerance:expr) => {{
        let left_val: f64 = $left;
        let right_val: f64 = $right;
        let tol: f64 = $tolerance;
        if !$crate::approx::abs_diff_eq!(left_val, right_val, epsilon = tol) {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`\n right: `{:?}`\n  diff: `{:?}` > tolerance `{:?}`",
                left_val, right_val, (left_val - right_val).abs(), tol
            );
        }
    }};
}

/// Assert that two slices of f32 values are approximately equal element-wise.
///
/// # Panics
///
/// Panics if lengths differ or any element differs by more than tolerance.
pub fn assert_slice_approx_eq(actual: &[f32], expected: &[f32], tolerance: f32, context: &str) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "{context}: length mismatch - got {}, expected {}",
        actual.len(),
        expected.len()
    );
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let diff = (a - e).abs();
        assert!(
            diff <= tolerance,
            "{context}[{i}]: {a} ≠ {e} (diff={diff}, tolerance={tolerance})"
        );
    }
}

/// Assert that a payload is a Gaussian with the given statistics.
///
/// # Panics
///
/// Panics on any other payload kind or when a statistic is off by more
/// than [`DEFAULT_TOLERANCE`].
pub fn assert_gaussian(payload: Option<&LeafPayload>, stddev: f32, mean: f32) {
    match payload {
        Some(LeafPayload::Gaussian(g)) => {
            crate::assert_approx_eq!(g.stddev, stddev, DEFAULT_TOLERANCE, "stddev");
            crate::assert_approx_eq!(g.mean, mean, DEFAULT_TOLERANCE, "mean");
        }
        other => panic!("expected a Gaussian leaf, got {other:?}"),
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Three features: `phone` (byte: 0 a e i), `pos` (short: 0 n v adj),
/// `dur` (continuous).
pub fn sample_schema() -> Arc<FeatureSchema> {
    let features = vec![
        FeatureMeta::byte("phone", ["0", "a", "e", "i"]),
        FeatureMeta::short("pos", ["0", "n", "v", "adj"]),
        FeatureMeta::continuous("dur"),
    ];
    match FeatureSchema::new(features) {
        Ok(schema) => Arc::new(schema),
        Err(e) => panic!("sample schema is invalid: {e}"),
    }
}

/// Classification tree over [`sample_schema`]:
///
/// ```text
/// phone is a
///   yes: [1 2 3]
///   no:  pos isShortOf 4
///          0:   [4]
///          n:   dur < 0.1 ? [5] : [6 7]
///          v:   (empty slot)
///          adj: []
/// ```
pub fn sample_tree() -> Cart {
    let mut b = GraphBuilder::new(sample_schema());
    let root = b.add_decision(DecisionNode::byte_equals(0, 1));
    let pos = b.add_decision(DecisionNode::short_of(1, 4));
    let dur = b.add_decision(DecisionNode::below(2, 0.1));
    let leaf = |b: &mut GraphBuilder, data: &[i32]| b.add_leaf(LeafPayload::Indices(data.to_vec()));
    let a = leaf(&mut b, &[1, 2, 3]);
    let zero = leaf(&mut b, &[4]);
    let short = leaf(&mut b, &[5]);
    let long = leaf(&mut b, &[6, 7]);
    let adj = leaf(&mut b, &[]);
    b.set_root(root);
    let wiring = [
        (root, Some(a)),
        (root, Some(pos)),
        (pos, Some(zero)),
        (pos, Some(dur)),
        (pos, None),
        (pos, Some(adj)),
        (dur, Some(short)),
        (dur, Some(long)),
    ];
    for (parent, child) in wiring {
        if let Err(e) = b.push_child(parent, child) {
            panic!("sample tree wiring failed: {e}");
        }
    }
    match Cart::from_builder(b) {
        Ok(tree) => tree,
        Err(e) => panic!("sample tree is invalid: {e}"),
    }
}

/// Regression tree over [`sample_schema`]: `dur < 0.1 ? N(0.5, 1) : N(0.25, 2)`.
pub fn sample_regression_tree() -> Cart {
    let mut b = GraphBuilder::new(sample_schema());
    let root = b.add_decision(DecisionNode::below(2, 0.1));
    let short = b.add_leaf(LeafPayload::Gaussian(Gaussian { stddev: 0.5, mean: 1.0 }));
    let long = b.add_leaf(LeafPayload::Gaussian(Gaussian { stddev: 0.25, mean: 2.0 }));
    b.set_root(root);
    for child in [short, long] {
        if let Err(e) = b.push_child(root, Some(child)) {
            panic!("regression tree wiring failed: {e}");
        }
    }
    match Cart::from_builder(b) {
        Ok(tree) => tree,
        Err(e) => panic!("regression tree is invalid: {e}"),
    }
}
