//! Compact binary tree format.
//!
//! # Format Structure
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Header: magic, version, type (12 bytes)                    │
//! ├────────────────────────────────────────────────────────────┤
//! │ Property block: short length + key=value text              │
//! ├────────────────────────────────────────────────────────────┤
//! │ Feature schema block                                       │
//! ├────────────────────────────────────────────────────────────┤
//! │ int decision count, decision records                       │
//! ├────────────────────────────────────────────────────────────┤
//! │ int leaf count, leaf records                               │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! A decision record is `feature, tag, criterion-or-count, child refs`.
//! Child references are negative for decision nodes (`-1` is the first),
//! positive for leaves (`1` is the first) and zero for an empty slot.
//! Records are stored in pre-order, so decision record 0 is the root.
//!
//! Loading is two-phase: all records are materialized into the arena
//! first, then every child reference is resolved.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use bon::Builder;
use tracing::debug;

use crate::repr::{
    Cart, DecisionNode, DecisionTest, Gaussian, GraphBuilder, GraphView, LeafKind, LeafPayload,
    NodeFilter, NodeId, NodeKind, SymbolWeights, WeightedIndices,
};
use crate::schema::{FeatureKind, FeatureSchema};

use super::data::{DataReader, DataWriter};
use super::header::{FileType, MaryHeader};
use super::properties::{read_property_block, write_property_block};
use super::schema::{read_schema, write_schema};
use super::{FormatError, WriteError};

// ============================================================================
// Options
// ============================================================================

/// Options for loading binary trees.
#[derive(Clone, Debug, Builder)]
pub struct BinaryReadOptions {
    /// Schema feature whose value table decodes weighted-symbol leaves.
    #[builder(into)]
    pub symbol_feature: Option<String>,
}

impl Default for BinaryReadOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Loads trees from the binary format.
#[derive(Clone, Debug, Default)]
pub struct BinaryReader {
    options: BinaryReadOptions,
}

/// Child references of one decision record, resolved in the second phase.
struct PendingChildren {
    node: NodeId,
    refs: Vec<i32>,
}

impl BinaryReader {
    pub fn new(options: BinaryReadOptions) -> Self {
        Self { options }
    }

    /// Load a tree from a file.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Cart, FormatError> {
        let file = File::open(path)?;
        self.read(BufReader::new(file))
    }

    /// Load a tree from a byte stream.
    pub fn read<R: Read>(&self, reader: R) -> Result<Cart, FormatError> {
        let mut reader = DataReader::new(reader);
        MaryHeader::read_expecting(&mut reader, FileType::Carts)?;
        let properties = read_property_block(&mut reader)?;
        let schema = Arc::new(read_schema(&mut reader)?);
        let symbol_feature = self
            .options
            .symbol_feature
            .as_deref()
            .map(|name| schema.feature_index(name))
            .transpose()?;

        let n_decisions = reader.read_count("decision node count")?;
        let mut builder = GraphBuilder::new(schema.clone());
        let mut pending = Vec::with_capacity(n_decisions);
        for i in 0..n_decisions {
            let (decision, n_children) = read_decision(&mut reader, &schema, i)?;
            let refs = (0..n_children)
                .map(|_| reader.read_i32())
                .collect::<Result<Vec<_>, _>>()?;
            let node = builder.add_decision(decision);
            pending.push(PendingChildren { node, refs });
        }

        let n_leaves = reader.read_count("leaf count")?;
        for _ in 0..n_leaves {
            let payload = read_leaf(&mut reader, symbol_feature)?;
            builder.add_leaf(payload);
        }

        // Leaves follow the decisions in the arena.
        for PendingChildren { node, refs } in pending {
            for (slot, &reference) in refs.iter().enumerate() {
                let child = resolve_reference(reference, n_decisions, n_leaves)?;
                builder.set_child(node, slot, child)?;
            }
        }

        // Without decisions only a sole leaf can be the root.
        let mut builder = if n_decisions == 0 && n_leaves != 1 {
            GraphBuilder::new(schema.clone())
        } else {
            builder.set_root(0);
            builder
        };
        if let Some(properties) = properties {
            builder.set_properties(properties);
        }

        let tree = Cart::from_builder(builder)?;
        debug!(
            decisions = n_decisions,
            leaves = n_leaves,
            features = schema.n_features(),
            "loaded binary tree"
        );
        Ok(tree)
    }
}

fn read_decision<R: Read>(
    reader: &mut DataReader<R>,
    schema: &FeatureSchema,
    index: usize,
) -> Result<(DecisionNode, usize), FormatError> {
    let raw_feature = reader.read_i32()?;
    let feature = u32::try_from(raw_feature)
        .ok()
        .filter(|&f| (f as usize) < schema.n_features())
        .ok_or_else(|| FormatError::value("feature index", raw_feature.to_string()))?;
    let tag = reader.read_i32()?;
    let decision = match tag {
        // Criteria are stored widened to int.
        0 => {
            let raw = reader.read_i32()?;
            let value = u8::try_from(raw).map_err(|_| FormatError::value("byte criterion", raw.to_string()))?;
            DecisionNode::byte_equals(feature, value)
        }
        1 => {
            let raw = reader.read_i32()?;
            let value = i16::try_from(raw).map_err(|_| FormatError::value("short criterion", raw.to_string()))?;
            DecisionNode::short_equals(feature, value)
        }
        2 => DecisionNode::below(feature, reader.read_f32()?),
        3 | 4 => {
            let declared = reader.read_i32()?;
            let expected = schema.n_values(feature as usize)?;
            if usize::try_from(declared).ok() != Some(expected) {
                return Err(FormatError::ChildCountMismatch {
                    node: index,
                    feature: schema.feature_name(feature as usize)?.to_string(),
                    expected,
                    actual: declared.max(0) as usize,
                });
            }
            if tag == 3 {
                DecisionNode::byte_of(feature, expected)
            } else {
                DecisionNode::short_of(feature, expected)
            }
        }
        other => return Err(FormatError::UnknownDecisionTag(other)),
    };
    let n_children = decision.n_children();
    Ok((decision, n_children))
}

fn read_leaf<R: Read>(
    reader: &mut DataReader<R>,
    symbol_feature: Option<u32>,
) -> Result<LeafPayload, FormatError> {
    let tag = reader.read_i32()?;
    let kind = LeafKind::from_tag(tag).ok_or(FormatError::UnknownLeafTag(tag))?;
    let payload = match kind {
        LeafKind::Indices => {
            let n = reader.read_count("leaf data count")?;
            let data = (0..n)
                .map(|_| reader.read_i32())
                .collect::<Result<Vec<_>, _>>()?;
            LeafPayload::Indices(data)
        }
        LeafKind::Gaussian => {
            let stddev = reader.read_f32()?;
            let mean = reader.read_f32()?;
            LeafPayload::Gaussian(Gaussian { stddev, mean })
        }
        LeafKind::WeightedIndices | LeafKind::WeightedSymbols => {
            let n = reader.read_count("leaf pair count")?;
            let mut indices = Vec::with_capacity(n);
            let mut weights = Vec::with_capacity(n);
            for _ in 0..n {
                indices.push(reader.read_i32()?);
                weights.push(reader.read_f32()?);
            }
            let entries = WeightedIndices::new(indices, weights);
            if kind == LeafKind::WeightedIndices {
                LeafPayload::WeightedIndices(entries)
            } else {
                LeafPayload::WeightedSymbols(SymbolWeights {
                    entries,
                    feature: symbol_feature,
                })
            }
        }
        LeafKind::FeatureVectors | LeafKind::Pdf => {
            return Err(FormatError::UnsupportedLeaf(kind));
        }
    };
    Ok(payload)
}

/// Map an on-disk child reference to an arena id.
fn resolve_reference(
    reference: i32,
    n_decisions: usize,
    n_leaves: usize,
) -> Result<Option<NodeId>, FormatError> {
    let dangling = || FormatError::DanglingReference {
        reference,
        decisions: n_decisions,
        leaves: n_leaves,
    };
    let id = match reference {
        0 => return Ok(None),
        r if r < 0 => {
            let index = (-(i64::from(r)) - 1) as usize;
            if index >= n_decisions {
                return Err(dangling());
            }
            index
        }
        r => {
            let index = (r - 1) as usize;
            if index >= n_leaves {
                return Err(dangling());
            }
            n_decisions + index
        }
    };
    Ok(Some(id as NodeId))
}

// ============================================================================
// Writer
// ============================================================================

/// On-disk ids assigned in pre-order before emission.
///
/// Decision nodes get `-1, -2, ...`, non-empty leaves `1, 2, ...` and empty
/// leaves `0`, which reloads as an empty slot.
struct Numbering {
    ids: Vec<i32>,
    decisions: Vec<NodeId>,
    leaves: Vec<NodeId>,
}

impl Numbering {
    fn assign(tree: &Cart) -> Self {
        let mut ids = vec![0; tree.n_slots()];
        let mut decisions = Vec::new();
        let mut leaves = Vec::new();
        for id in tree.iter_filtered(NodeFilter::ALL) {
            match tree.node(id).kind() {
                NodeKind::Decision(_) => {
                    decisions.push(id);
                    ids[id as usize] = -(decisions.len() as i32);
                }
                NodeKind::Leaf(payload) if !payload.is_empty() => {
                    leaves.push(id);
                    ids[id as usize] = leaves.len() as i32;
                }
                _ => {}
            }
        }
        Self {
            ids,
            decisions,
            leaves,
        }
    }

    fn reference(&self, child: Option<NodeId>) -> i32 {
        child.map_or(0, |c| self.ids[c as usize])
    }
}

/// Writes trees in the binary format and as a readable text dump.
#[derive(Clone, Debug, Default)]
pub struct BinaryWriter;

impl BinaryWriter {
    pub fn new() -> Self {
        Self
    }

    /// Write a tree to a file.
    pub fn save(&self, tree: &Cart, path: impl AsRef<Path>) -> Result<(), WriteError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write(tree, &mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Write a tree to a byte stream.
    pub fn write<W: Write>(&self, tree: &Cart, writer: W) -> Result<(), WriteError> {
        check_leaves(tree)?;
        let mut out = DataWriter::new(writer);
        MaryHeader::new(FileType::Carts).write(&mut out)?;
        write_property_block(&mut out, tree.properties())?;
        write_schema(&mut out, tree.schema())?;

        let numbering = Numbering::assign(tree);
        out.write_len(numbering.decisions.len())?;
        for &id in &numbering.decisions {
            let Some(decision) = tree.node(id).as_decision() else {
                continue;
            };
            out.write_u32(decision.feature())?;
            out.write_i32(decision.test().tag())?;
            match *decision.test() {
                DecisionTest::ByteEquals(v) => out.write_i32(i32::from(v))?,
                DecisionTest::ShortEquals(v) => out.write_i32(i32::from(v))?,
                DecisionTest::Below(t) => out.write_f32(t)?,
                DecisionTest::ByteOf | DecisionTest::ShortOf => out.write_len(decision.n_children())?,
            }
            for &child in decision.children() {
                out.write_i32(numbering.reference(child))?;
            }
        }

        out.write_len(numbering.leaves.len())?;
        for &id in &numbering.leaves {
            if let Some(payload) = tree.node(id).as_leaf() {
                write_leaf(&mut out, payload)?;
            }
        }
        out.flush()?;
        debug!(
            decisions = numbering.decisions.len(),
            leaves = numbering.leaves.len(),
            "wrote binary tree"
        );
        Ok(())
    }

    /// Render the human-readable dump of the binary layout.
    ///
    /// ```text
    /// Num decision nodes= 1  Num leaf nodes= 2
    /// -1 color is red id1 id2
    ///
    /// ----------------
    ///
    /// id1 IntArrayLeafNode 1 0
    /// id2 IntArrayLeafNode 1 1
    /// ```
    pub fn dump_text(&self, tree: &Cart) -> Result<String, WriteError> {
        check_leaves(tree)?;
        let schema = tree.schema();
        let numbering = Numbering::assign(tree);
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Num decision nodes= {}  Num leaf nodes= {}",
            numbering.decisions.len(),
            numbering.leaves.len()
        );
        for &id in &numbering.decisions {
            let Some(decision) = tree.node(id).as_decision() else {
                continue;
            };
            let _ = write!(out, "{} {}", numbering.ids[id as usize], decision.definition(schema));
            for &child in decision.children() {
                let reference = numbering.reference(child);
                if reference < 0 {
                    let _ = write!(out, " {reference}");
                } else {
                    let _ = write!(out, " id{reference}");
                }
            }
            out.push('\n');
        }
        out.push_str("\n----------------\n\n");
        for &id in &numbering.leaves {
            let Some(payload) = tree.node(id).as_leaf() else {
                continue;
            };
            let _ = write!(
                out,
                "id{} {}",
                numbering.ids[id as usize],
                stored_kind(payload).type_name()
            );
            dump_leaf(&mut out, payload, schema);
            out.push('\n');
        }
        Ok(out)
    }
}

fn check_leaves(tree: &Cart) -> Result<(), WriteError> {
    let unsupported = tree
        .iter_filtered(NodeFilter::LEAVES)
        .any(|id| matches!(tree.node(id).as_leaf(), Some(LeafPayload::Pdf(_))));
    if unsupported {
        return Err(WriteError::Unsupported("pdf leaves in the binary format".into()));
    }
    Ok(())
}

/// Leaf kind as stored: feature-vector leaves become int-array leaves of
/// their unit indices.
fn stored_kind(payload: &LeafPayload) -> LeafKind {
    match payload {
        LeafPayload::FeatureVectors(_) => LeafKind::Indices,
        other => other.kind(),
    }
}

fn write_leaf<W: Write>(out: &mut DataWriter<W>, payload: &LeafPayload) -> Result<(), WriteError> {
    out.write_i32(stored_kind(payload).tag())?;
    match payload {
        LeafPayload::Indices(data) => {
            out.write_len(data.len())?;
            for &v in data {
                out.write_i32(v)?;
            }
        }
        LeafPayload::Gaussian(g) => {
            out.write_f32(g.stddev)?;
            out.write_f32(g.mean)?;
        }
        LeafPayload::WeightedIndices(w) | LeafPayload::WeightedSymbols(SymbolWeights { entries: w, .. }) => {
            out.write_len(w.len())?;
            for (index, weight) in w.iter() {
                out.write_i32(index)?;
                out.write_f32(weight)?;
            }
        }
        LeafPayload::FeatureVectors(vectors) => {
            out.write_len(vectors.len())?;
            for v in vectors {
                let index = i32::try_from(v.unit_index()).map_err(|_| {
                    WriteError::Unsupported(format!("unit index {} beyond the int range", v.unit_index()))
                })?;
                out.write_i32(index)?;
            }
        }
        LeafPayload::Pdf(_) => {
            return Err(WriteError::Unsupported("pdf leaves in the binary format".into()));
        }
    }
    Ok(())
}

/// Float as printed in dumps: `inf`/`nan` literals for non-finite values.
pub(crate) fn format_float(v: f32) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        v.to_string()
    }
}

fn dump_leaf(out: &mut String, payload: &LeafPayload, schema: &FeatureSchema) {
    match payload {
        LeafPayload::Indices(data) => {
            let _ = write!(out, " {}", data.len());
            for v in data {
                let _ = write!(out, " {v}");
            }
        }
        LeafPayload::Gaussian(g) => {
            let _ = write!(out, " 1 {} {}", format_float(g.stddev), format_float(g.mean));
        }
        LeafPayload::WeightedIndices(w) => {
            let _ = write!(out, " {}", w.len());
            for (index, weight) in w.iter() {
                let _ = write!(out, " {index} {}", format_float(weight));
            }
        }
        LeafPayload::WeightedSymbols(s) => {
            let _ = write!(out, " {}", s.entries.len());
            for (index, weight) in s.entries.iter() {
                let symbol = s
                    .feature
                    .filter(|&f| schema.kind(f as usize).is_ok_and(FeatureKind::is_discrete))
                    .and_then(|f| schema.value_name(f as usize, index).ok())
                    .map_or_else(|| index.to_string(), str::to_string);
                let _ = write!(out, " {symbol} {}", format_float(weight));
            }
        }
        LeafPayload::FeatureVectors(vectors) => {
            let _ = write!(out, " {}", vectors.len());
            for v in vectors {
                let _ = write!(out, " {}", v.unit_index());
            }
        }
        LeafPayload::Pdf(_) => {}
    }
}
