//! cart-engine: classification and regression trees over typed feature vectors.
//!
//! Trees route a [`FeatureVector`] through decision nodes to a leaf payload:
//! unit index lists, Gaussian statistics, weighted candidate lists or pdf
//! statistics. Three codecs persist them:
//!
//! - [`io::binary`]: compact binary format with a flat node table
//! - [`io::wagon`]: nested-bracket text format and its binary packing
//! - [`io::hts`]: per-state HTS trees
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use cart_engine::{Cart, DecisionNode, FeatureMeta, FeatureSchema, GraphBuilder, GraphView, LeafPayload};
//!
//! let schema = Arc::new(FeatureSchema::new(vec![FeatureMeta::byte("phone", ["0", "a", "e"])]).unwrap());
//! let mut builder = GraphBuilder::new(schema.clone());
//! let root = builder.add_decision(DecisionNode::byte_equals(0, 1));
//! let yes = builder.add_leaf(LeafPayload::Indices(vec![1, 2]));
//! let no = builder.add_leaf(LeafPayload::Indices(vec![3]));
//! builder.set_root(root);
//! builder.push_child(root, Some(yes)).unwrap();
//! builder.push_child(root, Some(no)).unwrap();
//! let tree = Cart::from_builder(builder).unwrap();
//!
//! let vector = schema.encode(0, &["a"]).unwrap();
//! assert_eq!(tree.interpret(&vector), Some(&LeafPayload::Indices(vec![1, 2])));
//! ```

pub mod io;
pub mod repr;
pub mod schema;
pub mod testing;

pub use io::{FormatError, WriteError};
pub use repr::{
    Cart, CollectedPayload, DecisionNode, DirectedGraph, FeatureVectorIndexer, GraphBuilder,
    GraphError, GraphNode, GraphView, LeafKind, LeafPayload, NodeFilter, NodeId,
    StringPredictionTree,
};
pub use schema::{FeatureKind, FeatureMeta, FeatureSchema, FeatureVector, SchemaError};

// Re-export approx for the assertion macros
pub use approx;
