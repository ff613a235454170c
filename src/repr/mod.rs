//! In-memory tree and graph representation.

/// Node identifier: index into a graph's node arena.
pub type NodeId = u32;

pub mod cart;
pub mod graph;
pub mod indexer;
pub mod iter;
pub mod leaf;
pub mod node;
pub mod string_tree;
pub mod view;

pub use cart::{Cart, GraftError};
pub use graph::{DirectedGraph, GraphBuilder, GraphError, Properties};
pub use indexer::FeatureVectorIndexer;
pub use iter::{NodeFilter, NodeIter};
pub use leaf::{CollectedPayload, Gaussian, LeafKind, LeafPayload, PdfLeaf, SymbolWeights, WeightedIndices};
pub use node::{DecisionNode, DecisionTest, GraphNode, Node, NodeKind};
pub use string_tree::{parse_symbol_header, StringPredictionTree, SymbolTableError};
pub use view::GraphView;
