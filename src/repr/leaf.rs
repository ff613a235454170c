//! Leaf payloads.
//!
//! Every leaf owns one [`LeafPayload`]. The variants mirror the leaf record
//! kinds of the persistence formats; [`LeafKind`] carries the tag.

use serde::{Deserialize, Serialize};

use crate::schema::FeatureVector;

// ============================================================================
// LeafKind
// ============================================================================

/// Payload kind of a leaf, with the tag used on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum LeafKind {
    /// Ordered list of unit indices.
    Indices = 0,
    /// Regression leaf: standard deviation and mean.
    Gaussian = 1,
    /// Parallel index and weight arrays.
    WeightedIndices = 2,
    /// Parallel symbol-index and weight arrays.
    WeightedSymbols = 3,
    /// Feature vectors collected while indexing.
    FeatureVectors = 4,
    /// Probability density reference.
    Pdf = 5,
}

impl LeafKind {
    /// Convert from the on-disk tag, returning None for unknown values.
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(Self::Indices),
            1 => Some(Self::Gaussian),
            2 => Some(Self::WeightedIndices),
            3 => Some(Self::WeightedSymbols),
            4 => Some(Self::FeatureVectors),
            5 => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn tag(self) -> i32 {
        self as i32
    }

    /// Type name written by the text dump.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Indices => "IntArrayLeafNode",
            Self::Gaussian => "FloatLeafNode",
            Self::WeightedIndices => "IntAndFloatArrayLeafNode",
            Self::WeightedSymbols => "StringAndFloatLeafNode",
            Self::FeatureVectors => "FeatureVectorLeafNode",
            Self::Pdf => "PdfLeafNode",
        }
    }
}

// ============================================================================
// Payload structs
// ============================================================================

/// Regression payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gaussian {
    pub stddev: f32,
    pub mean: f32,
}

/// Parallel index and weight arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightedIndices {
    indices: Vec<i32>,
    weights: Vec<f32>,
}

impl WeightedIndices {
    /// # Panics
    ///
    /// Panics if the arrays differ in length.
    pub fn new(indices: Vec<i32>, weights: Vec<f32>) -> Self {
        assert_eq!(
            indices.len(),
            weights.len(),
            "index and weight arrays must have equal length"
        );
        Self { indices, weights }
    }

    pub fn indices(&self) -> &[i32] {
        &self.indices
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, f32)> + '_ {
        self.indices.iter().copied().zip(self.weights.iter().copied())
    }

    /// Entry with the strictly greatest weight; the first one wins ties.
    pub fn most_probable(&self) -> Option<(i32, f32)> {
        let mut best: Option<(i32, f32)> = None;
        let mut best_weight = f32::NEG_INFINITY;
        for (index, weight) in self.iter() {
            if weight > best_weight {
                best_weight = weight;
                best = Some((index, weight));
            }
        }
        best
    }
}

/// Weighted symbol indices decoded through a schema feature's value table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolWeights {
    pub entries: WeightedIndices,
    /// Schema feature whose value names decode the indices, when known.
    pub feature: Option<u32>,
}

/// Density statistics attached to an HTS leaf.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfLeaf {
    /// Leaf id within its state tree (1-based, as written by the trainer).
    pub id: u32,
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
    /// Voiced weight of the first stream (log-F0 trees only).
    pub voiced_weight: Option<f64>,
}

impl PdfLeaf {
    /// Leaf without loaded statistics.
    pub fn unresolved(id: u32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

// ============================================================================
// LeafPayload
// ============================================================================

/// Immutable payload held by a leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LeafPayload {
    Indices(Vec<i32>),
    Gaussian(Gaussian),
    WeightedIndices(WeightedIndices),
    WeightedSymbols(SymbolWeights),
    FeatureVectors(Vec<FeatureVector>),
    Pdf(PdfLeaf),
}

impl LeafPayload {
    /// Empty payload of the given kind. Scalar kinds get zeroed values.
    pub fn empty(kind: LeafKind) -> Self {
        match kind {
            LeafKind::Indices => Self::Indices(Vec::new()),
            LeafKind::Gaussian => Self::Gaussian(Gaussian {
                stddev: 0.0,
                mean: 0.0,
            }),
            LeafKind::WeightedIndices => Self::WeightedIndices(WeightedIndices::default()),
            LeafKind::WeightedSymbols => Self::WeightedSymbols(SymbolWeights::default()),
            LeafKind::FeatureVectors => Self::FeatureVectors(Vec::new()),
            LeafKind::Pdf => Self::Pdf(PdfLeaf::default()),
        }
    }

    pub fn kind(&self) -> LeafKind {
        match self {
            Self::Indices(_) => LeafKind::Indices,
            Self::Gaussian(_) => LeafKind::Gaussian,
            Self::WeightedIndices(_) => LeafKind::WeightedIndices,
            Self::WeightedSymbols(_) => LeafKind::WeightedSymbols,
            Self::FeatureVectors(_) => LeafKind::FeatureVectors,
            Self::Pdf(_) => LeafKind::Pdf,
        }
    }

    /// Number of data points: list length, or 1 for scalar kinds.
    pub fn data_count(&self) -> u32 {
        let n = match self {
            Self::Indices(v) => v.len(),
            Self::WeightedIndices(w) => w.len(),
            Self::WeightedSymbols(s) => s.entries.len(),
            Self::FeatureVectors(v) => v.len(),
            Self::Gaussian(_) | Self::Pdf(_) => 1,
        };
        n as u32
    }

    /// True when a list payload holds no entries. Scalar kinds are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Indices(v) => v.is_empty(),
            Self::WeightedIndices(w) => w.is_empty(),
            Self::WeightedSymbols(s) => s.entries.is_empty(),
            Self::FeatureVectors(v) => v.is_empty(),
            Self::Gaussian(_) | Self::Pdf(_) => false,
        }
    }

    /// Unit or symbol indices for the index-bearing kinds.
    pub fn indices(&self) -> Option<&[i32]> {
        match self {
            Self::Indices(v) => Some(v),
            Self::WeightedIndices(w) => Some(w.indices()),
            Self::WeightedSymbols(s) => Some(s.entries.indices()),
            _ => None,
        }
    }

    /// Weighted entries for the two weighted kinds.
    pub fn weighted(&self) -> Option<&WeightedIndices> {
        match self {
            Self::WeightedIndices(w) => Some(w),
            Self::WeightedSymbols(s) => Some(&s.entries),
            _ => None,
        }
    }

    /// Index with the greatest weight for the weighted kinds.
    pub fn most_probable_index(&self) -> Option<i32> {
        self.weighted()
            .and_then(WeightedIndices::most_probable)
            .map(|(index, _)| index)
    }
}

// ============================================================================
// Collected payload
// ============================================================================

/// Concatenated payload of every leaf below a node.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectedPayload {
    Indices(Vec<i32>),
    FeatureVectors(Vec<FeatureVector>),
}

impl CollectedPayload {
    pub fn len(&self) -> usize {
        match self {
            Self::Indices(v) => v.len(),
            Self::FeatureVectors(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_indices(&self) -> Option<&[i32]> {
        match self {
            Self::Indices(v) => Some(v),
            Self::FeatureVectors(_) => None,
        }
    }

    /// Start collecting from the first leaf; None for kinds that cannot be concatenated.
    pub(crate) fn start(first: &LeafPayload) -> Option<Self> {
        match first {
            LeafPayload::FeatureVectors(_) => Some(Self::FeatureVectors(Vec::new())),
            p if p.indices().is_some() => Some(Self::Indices(Vec::new())),
            _ => None,
        }
    }

    /// Append a leaf payload.
    ///
    /// # Panics
    ///
    /// Panics when the leaf kind cannot be concatenated with what was
    /// collected so far.
    pub(crate) fn extend(&mut self, payload: &LeafPayload) {
        match (self, payload) {
            (Self::FeatureVectors(out), LeafPayload::FeatureVectors(v)) => {
                out.extend(v.iter().cloned())
            }
            (Self::Indices(out), p) if p.indices().is_some() => {
                out.extend_from_slice(p.indices().unwrap_or_default())
            }
            (collected, p) => panic!(
                "cannot concatenate {} leaf payload with {} payload",
                p.kind().type_name(),
                match collected {
                    Self::Indices(_) => "index",
                    Self::FeatureVectors(_) => "feature-vector",
                }
            ),
        }
    }
}
