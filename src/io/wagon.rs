//! Wagon tree format.
//!
//! The text form writes one node per line in pre-order:
//!
//! ```text
//! ((phone is a)
//! ((((3 0) (7 0)) 0))
//! ((dur < 0.12)
//! ((() 0))
//! ((((9 0)) 0))))
//! ```
//!
//! A decision line opens a bracket that stays open until the line of its
//! last child. A leaf line ends in `0))` (or `))` for regression leaves)
//! followed by one extra `)` per subtree it closes. Leaf lines do not name
//! their payload kind, so the reader is told the [`WagonTreeType`].
//!
//! The binary packing wraps the same node lines: a [`MaryHeader`], an int
//! node count, the tree name as a UTF string, then one record per line
//! (int length + UTF-16 code units) until end of stream.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use bon::Builder;
use tracing::{debug, trace, warn};

use crate::repr::{
    parse_symbol_header, Cart, DecisionNode, DecisionTest, Gaussian, GraphBuilder, GraphView,
    LeafKind, LeafPayload, NodeFilter, NodeId, NodeKind, StringPredictionTree, SymbolTableError,
    SymbolWeights, WeightedIndices,
};
use crate::schema::{FeatureKind, FeatureSchema};

use super::binary::format_float;
use super::data::{DataReader, DataWriter};
use super::header::{FileType, MaryHeader};
use super::{FormatError, WriteError};

/// Record written for an empty child slot.
const EMPTY_LEAF: &str = "((() 0))";

// ============================================================================
// Tree types
// ============================================================================

/// Payload kind of the leaves of a Wagon tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WagonTreeType {
    /// Unit index lists.
    #[default]
    Classification,
    /// Weighted index lists.
    ExtendedClassification,
    /// Gaussian (stddev, mean) pairs.
    Regression,
    /// Empty leaves, later filled with feature vectors.
    TopLevel,
    /// Weighted indices into a symbol table.
    StringCart,
}

impl WagonTreeType {
    /// Leaf kind produced by this tree type.
    pub fn leaf_kind(self) -> LeafKind {
        match self {
            Self::Classification => LeafKind::Indices,
            Self::ExtendedClassification => LeafKind::WeightedIndices,
            Self::Regression => LeafKind::Gaussian,
            Self::TopLevel => LeafKind::FeatureVectors,
            Self::StringCart => LeafKind::WeightedSymbols,
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// Options for reading Wagon trees.
#[derive(Clone, Debug, Builder)]
pub struct WagonReadOptions {
    #[builder(default)]
    pub tree_type: WagonTreeType,
    /// Schema feature decoding [`WagonTreeType::StringCart`] leaves.
    #[builder(into)]
    pub symbol_feature: Option<String>,
}

impl Default for WagonReadOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Options for writing Wagon trees.
#[derive(Clone, Debug, Builder)]
pub struct WagonWriteOptions {
    /// When set, every leaf must have this tree type's payload kind.
    pub tree_type: Option<WagonTreeType>,
    /// Tree name stored in the binary packing.
    #[builder(into, default = "cart".to_string())]
    pub name: String,
}

impl Default for WagonWriteOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Loads Wagon trees against a known schema.
#[derive(Clone, Debug, Default)]
pub struct WagonReader {
    options: WagonReadOptions,
}

impl WagonReader {
    pub fn new(options: WagonReadOptions) -> Self {
        Self { options }
    }

    /// Parse a text tree held in memory.
    pub fn parse_str(&self, text: &str, schema: Arc<FeatureSchema>) -> Result<Cart, FormatError> {
        self.read_text(text.as_bytes(), schema)
    }

    /// Load a text tree from a file.
    pub fn load_text(
        &self,
        path: impl AsRef<Path>,
        schema: Arc<FeatureSchema>,
    ) -> Result<Cart, FormatError> {
        let file = File::open(path)?;
        self.read_text(BufReader::new(file), schema)
    }

    /// Read a text tree, one node per line.
    ///
    /// Blank lines and `;;` comment lines are skipped.
    pub fn read_text<R: BufRead>(
        &self,
        reader: R,
        schema: Arc<FeatureSchema>,
    ) -> Result<Cart, FormatError> {
        let mut parser = LineParser::new(schema, &self.options)?;
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with(";;") {
                continue;
            }
            parser.parse_line(i + 1, &line)?;
        }
        parser.finish()
    }

    /// Load a tree in the binary packing from a file.
    pub fn load_binary(
        &self,
        path: impl AsRef<Path>,
        schema: Arc<FeatureSchema>,
    ) -> Result<Cart, FormatError> {
        let file = File::open(path)?;
        self.read_binary(BufReader::new(file), schema)
    }

    /// Read a tree in the binary packing. Records run to end of stream.
    pub fn read_binary<R: Read>(
        &self,
        reader: R,
        schema: Arc<FeatureSchema>,
    ) -> Result<Cart, FormatError> {
        let mut reader = DataReader::new(reader);
        MaryHeader::read_expecting(&mut reader, FileType::Carts)?;
        // node count and name are informational
        let _declared = reader.read_i32()?;
        let name = reader.read_utf()?;
        let mut parser = LineParser::new(schema, &self.options)?;
        let mut record = 0;
        while let Some(len) = reader.try_read_i32()? {
            record += 1;
            let len = usize::try_from(len)
                .map_err(|_| FormatError::value("record length", len.to_string()))?;
            let line = reader.read_chars(len)?;
            parser.parse_line(record, &line)?;
        }
        debug!(name = %name, records = record, "read packed wagon tree");
        parser.finish()
    }

    /// Read a string prediction tree: a symbol table header line followed
    /// by a weighted-leaf tree body.
    pub fn read_string_tree<R: BufRead>(
        &self,
        reader: R,
        schema: Arc<FeatureSchema>,
    ) -> Result<StringPredictionTree, FormatError> {
        let mut lines = reader.lines().enumerate();
        let symbols = loop {
            match lines.next() {
                Some((_, line)) => {
                    let line = line?;
                    if !line.trim().is_empty() {
                        break parse_symbol_header(&line)?;
                    }
                }
                None => return Err(SymbolTableError::Empty.into()),
            }
        };
        let options = WagonReadOptions {
            tree_type: WagonTreeType::ExtendedClassification,
            symbol_feature: None,
        };
        let mut parser = LineParser::new(schema, &options)?;
        for (i, line) in lines {
            let line = line?;
            if line.trim().is_empty() || line.starts_with(";;") {
                continue;
            }
            parser.parse_line(i + 1, &line)?;
        }
        Ok(StringPredictionTree::new(parser.finish()?, symbols))
    }
}

/// Incremental tree assembly from node lines.
struct LineParser {
    schema: Arc<FeatureSchema>,
    tree_type: WagonTreeType,
    symbol_feature: Option<u32>,
    builder: GraphBuilder,
    /// Decision node receiving the next child.
    cursor: Option<NodeId>,
    /// Set once the root line has been attached.
    has_root: bool,
    open_brackets: usize,
    last_line: usize,
}

impl LineParser {
    fn new(schema: Arc<FeatureSchema>, options: &WagonReadOptions) -> Result<Self, FormatError> {
        let symbol_feature = options
            .symbol_feature
            .as_deref()
            .map(|name| schema.feature_index(name))
            .transpose()?;
        Ok(Self {
            builder: GraphBuilder::new(schema.clone()),
            schema,
            tree_type: options.tree_type,
            symbol_feature,
            cursor: None,
            has_root: false,
            open_brackets: 0,
            last_line: 0,
        })
    }

    fn parse_line(&mut self, line_no: usize, raw: &str) -> Result<(), FormatError> {
        self.last_line = line_no;
        let line = raw.trim();
        let Some(body) = line.strip_prefix("((") else {
            return Err(FormatError::line(line_no, format!("expected '((' at start of '{line}'")));
        };
        let is_decision = body.chars().next().is_some_and(char::is_alphabetic)
            && !body.starts_with("nan ");
        if is_decision {
            let decision = self.parse_decision(line_no, body)?;
            let id = self.builder.add_decision(decision);
            self.attach(line_no, Some(id))?;
            self.cursor = Some(id);
            self.open_brackets += 1;
        } else {
            // regression trees have no empty leaf; the record marks an empty slot
            let id = if self.tree_type == WagonTreeType::Regression && line.starts_with(EMPTY_LEAF) {
                None
            } else {
                let payload = self.parse_leaf(line_no, line)?;
                Some(self.builder.add_leaf(payload))
            };
            self.attach(line_no, id)?;
            self.close_brackets(line_no, line)?;
        }
        trace!(line = line_no, open = self.open_brackets, "parsed node line");
        Ok(())
    }

    fn attach(&mut self, line_no: usize, id: Option<NodeId>) -> Result<(), FormatError> {
        match self.cursor {
            Some(parent) => {
                self.builder.push_child(parent, id)?;
            }
            None if self.has_root => {
                return Err(FormatError::BracketMismatch {
                    line: line_no,
                    message: "node after a complete tree".into(),
                });
            }
            None => {
                self.has_root = true;
                if let Some(id) = id {
                    self.builder.set_root(id);
                }
            }
        }
        Ok(())
    }

    /// `feature op value)` after the leading brackets.
    fn parse_decision(&self, line_no: usize, body: &str) -> Result<DecisionNode, FormatError> {
        let (feature_name, rest) = body
            .split_once(char::is_whitespace)
            .ok_or_else(|| FormatError::line(line_no, "decision without operator"))?;
        let (operator, rest) = rest
            .trim_start()
            .split_once(char::is_whitespace)
            .ok_or_else(|| FormatError::line(line_no, "decision without value"))?;
        let value = rest
            .trim()
            .strip_suffix(')')
            .ok_or_else(|| FormatError::line(line_no, "decision line must end with ')'"))?;
        let value = unquote(value);

        let feature = self.schema.feature_index(feature_name)?;
        let index = feature as usize;
        let decision = match operator {
            "is" => match self.schema.kind(index)? {
                FeatureKind::Byte => DecisionNode::byte_equals(feature, self.schema.byte_value(index, &value)?),
                _ => DecisionNode::short_equals(feature, self.schema.short_value(index, &value)?),
            },
            "<" => {
                let threshold = value
                    .parse::<f32>()
                    .map_err(|_| FormatError::value("threshold", value.clone()))?;
                DecisionNode::below(feature, threshold)
            }
            "isByteOf" | "isShortOf" => {
                let n = value
                    .parse::<usize>()
                    .map_err(|_| FormatError::value("child count", value.clone()))?;
                if operator == "isByteOf" {
                    DecisionNode::byte_of(feature, n)
                } else {
                    DecisionNode::short_of(feature, n)
                }
            }
            other => {
                return Err(FormatError::UnknownOperator {
                    line: line_no,
                    operator: other.to_string(),
                })
            }
        };
        Ok(decision)
    }

    fn parse_leaf(&self, line_no: usize, line: &str) -> Result<LeafPayload, FormatError> {
        // pairs may be written without a separating space: `(0 1.0)(1 2.0)`
        let spaced = line.replace(")(", ") (");
        let tokens: Vec<&str> = spaced.split_whitespace().collect();
        let payload = match self.tree_type {
            WagonTreeType::Classification => {
                let (indices, _) = weighted_pairs(line_no, &tokens)?;
                LeafPayload::Indices(indices)
            }
            WagonTreeType::ExtendedClassification => {
                let (indices, weights) = weighted_pairs(line_no, &tokens)?;
                LeafPayload::WeightedIndices(WeightedIndices::new(indices, weights))
            }
            WagonTreeType::StringCart => {
                let (indices, weights) = weighted_pairs(line_no, &tokens)?;
                LeafPayload::WeightedSymbols(SymbolWeights {
                    entries: WeightedIndices::new(indices, weights),
                    feature: self.symbol_feature,
                })
            }
            WagonTreeType::Regression => {
                // `((stddev mean))` closes right after the mean
                if let Some(mean_token) = tokens.get(1) {
                    let closing = mean_token.len() - mean_token.trim_end_matches(')').len();
                    if closing < 2 {
                        return Err(FormatError::BracketMismatch {
                            line: line_no,
                            message: format!(
                                "regression leaf must close with '))' after the mean, found '{mean_token}'"
                            ),
                        });
                    }
                }
                if tokens.len() != 2 {
                    return Err(FormatError::line(
                        line_no,
                        format!("regression leaf needs two values, got {}", tokens.len()),
                    ));
                }
                // unparseable statistics read as zero
                let stddev = tokens[0].trim_start_matches('(').parse().unwrap_or(0.0);
                let mean_token = tokens[1].split(')').next().unwrap_or_default();
                let mean = mean_token.parse().unwrap_or(0.0);
                LeafPayload::Gaussian(Gaussian { stddev, mean })
            }
            WagonTreeType::TopLevel => {
                if tokens.len() != 2 {
                    return Err(FormatError::line(line_no, "top-level leaf is not empty"));
                }
                LeafPayload::FeatureVectors(Vec::new())
            }
        };
        Ok(payload)
    }

    /// Apply the closing brackets after the leaf's terminating `))`.
    fn close_brackets(&mut self, line_no: usize, line: &str) -> Result<(), FormatError> {
        let last_token = line.split_whitespace().last().unwrap_or_default();
        let mismatch = |message: String| FormatError::BracketMismatch {
            line: line_no,
            message,
        };
        let tail = last_token
            .find(')')
            .map(|p| &last_token[p..])
            .filter(|t| t.starts_with("))"))
            .ok_or_else(|| mismatch(format!("leaf must end with '))', found '{last_token}'")))?;

        let extra = &tail[2..];
        for (i, c) in extra.chars().enumerate() {
            if c != ')' {
                return Err(mismatch(format!("expected closing bracket, found '{c}'")));
            }
            let Some(current) = self.cursor else {
                return Err(mismatch("closing bracket without an open decision".into()));
            };
            self.open_brackets = self.open_brackets.saturating_sub(1);
            if self.builder.node(current).is_root() {
                if i + 1 != extra.len() {
                    return Err(mismatch("too many closing brackets".into()));
                }
            } else {
                self.cursor = self.builder.node(current).mother();
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Cart, FormatError> {
        if self.open_brackets != 0 {
            return Err(FormatError::BracketMismatch {
                line: self.last_line,
                message: format!("{} unclosed brackets at end of input", self.open_brackets),
            });
        }
        let n_nodes = self.builder.n_slots();
        let tree = Cart::from_builder(self.builder)?;
        debug!(nodes = n_nodes, tree_type = ?self.tree_type, "loaded wagon tree");
        Ok(tree)
    }
}

/// Parse `((((i w) (i w)) 0))` into parallel index and weight lists.
///
/// Infinite weights become 10000 for the last pair and 1000000 otherwise;
/// `nan` becomes -1.
fn weighted_pairs(line_no: usize, tokens: &[&str]) -> Result<(Vec<i32>, Vec<f32>), FormatError> {
    if tokens.len() <= 2 {
        return Ok((Vec::new(), Vec::new()));
    }
    let n = (tokens.len() - 1) / 2;
    let mut indices = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);
    for k in 0..n {
        let index_token = tokens[2 * k].trim_start_matches('(');
        let index: i32 = index_token
            .parse()
            .map_err(|_| FormatError::line(line_no, format!("invalid leaf index '{index_token}'")))?;
        let weight_token = tokens[2 * k + 1].trim_end_matches(')');
        let weight = match weight_token {
            "inf" | "nan" => {
                let sentinel: f32 = match weight_token {
                    "nan" => -1.0,
                    _ if k + 1 == n => 10000.0,
                    _ => 1_000_000.0,
                };
                warn!(line = line_no, index, token = weight_token, sentinel, "non-finite leaf weight");
                sentinel
            }
            t => t
                .parse()
                .map_err(|_| FormatError::line(line_no, format!("invalid leaf weight '{t}'")))?,
        };
        indices.push(index);
        weights.push(weight);
    }
    Ok((indices, weights))
}

fn unquote(value: &str) -> String {
    let value = if value.len() > 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    };
    value.replace("\\\"", "\"")
}

// ============================================================================
// Writer
// ============================================================================

/// Writes trees in the Wagon text format or its binary packing.
#[derive(Clone, Debug, Default)]
pub struct WagonWriter {
    options: WagonWriteOptions,
}

impl WagonWriter {
    pub fn new(options: WagonWriteOptions) -> Self {
        Self { options }
    }

    /// Render the tree as text.
    pub fn to_text(&self, tree: &Cart) -> Result<String, WriteError> {
        let mut text = String::new();
        for record in self.records(tree)? {
            text.push_str(&record);
            text.push('\n');
        }
        Ok(text)
    }

    pub fn write_text<W: Write>(&self, tree: &Cart, mut writer: W) -> Result<(), WriteError> {
        writer.write_all(self.to_text(tree)?.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    pub fn save_text(&self, tree: &Cart, path: impl AsRef<Path>) -> Result<(), WriteError> {
        let file = File::create(path)?;
        self.write_text(tree, BufWriter::new(file))
    }

    /// Write the binary packing.
    pub fn write_binary<W: Write>(&self, tree: &Cart, writer: W) -> Result<(), WriteError> {
        let records = self.records(tree)?;
        let mut out = DataWriter::new(writer);
        MaryHeader::new(FileType::Carts).write(&mut out)?;
        out.write_len(tree.node_count())?;
        out.write_utf(&self.options.name)?;
        for record in &records {
            out.write_len(record.encode_utf16().count())?;
            out.write_chars(record)?;
        }
        out.flush()?;
        debug!(name = %self.options.name, records = records.len(), "wrote packed wagon tree");
        Ok(())
    }

    pub fn save_binary(&self, tree: &Cart, path: impl AsRef<Path>) -> Result<(), WriteError> {
        let file = File::create(path)?;
        self.write_binary(tree, BufWriter::new(file))
    }

    /// Write a string prediction tree: symbol header line, then the tree.
    pub fn write_string_tree<W: Write>(
        &self,
        tree: &StringPredictionTree,
        mut writer: W,
    ) -> Result<(), WriteError> {
        writeln!(writer, "{}", tree.symbol_header()?)?;
        self.write_text(tree.tree(), writer)
    }

    /// Node lines in pre-order, each carrying its closing brackets.
    fn records(&self, tree: &Cart) -> Result<Vec<String>, WriteError> {
        self.check_leaves(tree)?;
        let schema = tree.schema();
        let mut records = Vec::with_capacity(tree.n_slots());
        let Some(root) = tree.root() else {
            return Ok(records);
        };
        // (slot content, closing suffix)
        let mut stack: Vec<(Option<NodeId>, String)> = vec![(Some(root), String::new())];
        while let Some((slot, suffix)) = stack.pop() {
            let Some(id) = slot else {
                records.push(format!("{EMPTY_LEAF}{suffix}"));
                continue;
            };
            match tree.node(id).kind() {
                NodeKind::Decision(d) => {
                    records.push(format!("(({})", wagon_definition(d, schema)));
                    let last = d.n_children().saturating_sub(1);
                    for (i, &child) in d.children().iter().enumerate().rev() {
                        let child_suffix = if i == last {
                            format!("){suffix}")
                        } else {
                            String::new()
                        };
                        stack.push((child, child_suffix));
                    }
                }
                NodeKind::Leaf(payload) => records.push(format!("{}{suffix}", leaf_record(payload)?)),
                NodeKind::Graph(_) => {
                    return Err(WriteError::Unsupported("graph nodes in wagon trees".into()))
                }
            }
        }
        Ok(records)
    }

    fn check_leaves(&self, tree: &Cart) -> Result<(), WriteError> {
        let Some(tree_type) = self.options.tree_type else {
            return Ok(());
        };
        let expected = tree_type.leaf_kind();
        for id in tree.iter_filtered(NodeFilter::LEAVES) {
            if let Some(payload) = tree.node(id).as_leaf() {
                if payload.kind() != expected {
                    return Err(WriteError::Unsupported(format!(
                        "{} in a {tree_type:?} tree",
                        payload.kind().type_name()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Node definition with equality values quoted when they would break tokens.
fn wagon_definition(decision: &DecisionNode, schema: &FeatureSchema) -> String {
    let ordinal = match *decision.test() {
        DecisionTest::ByteEquals(v) => i32::from(v),
        DecisionTest::ShortEquals(v) => i32::from(v),
        _ => return decision.definition(schema),
    };
    let index = decision.feature() as usize;
    match (schema.feature_name(index), schema.value_name(index, ordinal)) {
        (Ok(name), Ok(value)) => format!("{name} is {}", quote(value)),
        _ => decision.definition(schema),
    }
}

fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '"'));
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn leaf_record(payload: &LeafPayload) -> Result<String, WriteError> {
    let pairs = |items: Vec<String>| format!("((({}) 0))", items.join(" "));
    let record = match payload {
        LeafPayload::Indices(data) => pairs(data.iter().map(|i| format!("({i} 0)")).collect()),
        LeafPayload::WeightedIndices(w) | LeafPayload::WeightedSymbols(SymbolWeights { entries: w, .. }) => {
            pairs(w.iter().map(|(i, f)| format!("({i} {})", format_float(f))).collect())
        }
        // top-level trees carry structure only; vectors are indexed after loading
        LeafPayload::FeatureVectors(_) => EMPTY_LEAF.to_string(),
        LeafPayload::Gaussian(g) => format!("(({} {}))", format_float(g.stddev), format_float(g.mean)),
        LeafPayload::Pdf(_) => return Err(WriteError::Unsupported("pdf leaves in wagon trees".into())),
    };
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::CollectedPayload;
    use crate::schema::FeatureMeta;

    fn schema() -> Arc<FeatureSchema> {
        Arc::new(
            FeatureSchema::new(vec![
                FeatureMeta::byte("phone", ["0", "a", "e", "o p"]),
                FeatureMeta::short("pos", ["0", "n", "v"]),
                FeatureMeta::continuous("dur"),
            ])
            .unwrap(),
        )
    }

    const TREE: &str = "\
;; generated
((phone is a)
((((3 0) (7 0)) 0))
((dur < 0.12)
((() 0))
((((9 0)) 0))))
";

    #[test]
    fn reads_nested_text() {
        let tree = WagonReader::default().parse_str(TREE, schema()).unwrap();
        assert_eq!(tree.node_count(), 5);
        let root = tree.root().unwrap();
        assert_eq!(
            tree.all_payload(root),
            Some(CollectedPayload::Indices(vec![3, 7, 9]))
        );
        assert_eq!(tree.data_count(root), 3);
        let v = schema().encode(0, &["e", "0", "0.5"]).unwrap();
        assert_eq!(tree.interpret(&v), Some(&LeafPayload::Indices(vec![9])));
    }

    #[test]
    fn text_roundtrip() {
        let tree = WagonReader::default().parse_str(TREE, schema()).unwrap();
        let text = WagonWriter::default().to_text(&tree).unwrap();
        let body: String = TREE.lines().skip(1).map(|l| format!("{l}\n")).collect();
        assert_eq!(text, body);
    }

    #[test]
    fn quoted_values_survive() {
        let text = "((phone is \"o p\")\n((() 0))\n((((1 0)) 0)))\n";
        let tree = WagonReader::default().parse_str(text, schema()).unwrap();
        let out = WagonWriter::default().to_text(&tree).unwrap();
        assert_eq!(out, text);
    }

    #[test]
    fn extended_weights_map_non_finite() {
        let options = WagonReadOptions::builder()
            .tree_type(WagonTreeType::ExtendedClassification)
            .build();
        let tree = WagonReader::new(options)
            .parse_str("((((1 inf) (2 nan) (3 inf)) 0))", schema())
            .unwrap();
        let payload = tree.node(tree.root().unwrap()).as_leaf().unwrap();
        assert_eq!(payload.weighted().unwrap().weights(), &[1_000_000.0, -1.0, 10000.0]);
    }

    #[test]
    fn regression_leaves_are_lenient() {
        let options = WagonReadOptions::builder()
            .tree_type(WagonTreeType::Regression)
            .build();
        let reader = WagonReader::new(options);
        let tree = reader
            .parse_str("((pos isShortOf 3)\n((0.5 1.5))\n((nan 2))\n((- ?)))\n", schema())
            .unwrap();
        let leaves: Vec<_> = tree
            .iter_filtered(NodeFilter::LEAVES)
            .filter_map(|id| tree.node(id).as_leaf().cloned())
            .collect();
        assert_eq!(leaves[0], LeafPayload::Gaussian(Gaussian { stddev: 0.5, mean: 1.5 }));
        assert!(matches!(&leaves[1], LeafPayload::Gaussian(g) if g.stddev.is_nan() && g.mean == 2.0));
        assert_eq!(leaves[2], LeafPayload::Gaussian(Gaussian { stddev: 0.0, mean: 0.0 }));
    }

    #[test]
    fn bracket_errors() {
        let reader = WagonReader::default();
        let unclosed = "((phone is a)\n((() 0))\n((() 0))\n";
        assert!(matches!(
            reader.parse_str(unclosed, schema()),
            Err(FormatError::BracketMismatch { .. })
        ));
        let missing = "((phone is a)\n((() 0)\n((() 0))))\n";
        assert!(matches!(
            reader.parse_str(missing, schema()),
            Err(FormatError::BracketMismatch { line: 2, .. })
        ));
        let extra = "((phone is a)\n((() 0))\n((() 0)))))\n";
        assert!(matches!(
            reader.parse_str(extra, schema()),
            Err(FormatError::BracketMismatch { line: 3, .. })
        ));
    }

    #[test]
    fn unknown_operator_and_feature() {
        let reader = WagonReader::default();
        assert!(matches!(
            reader.parse_str("((phone matches a)\n", schema()),
            Err(FormatError::UnknownOperator { line: 1, .. })
        ));
        assert!(matches!(
            reader.parse_str("((stress is 1)\n", schema()),
            Err(FormatError::Schema(_))
        ));
    }

    #[test]
    fn binary_packing_roundtrip() {
        let tree = WagonReader::default().parse_str(TREE, schema()).unwrap();
        let writer = WagonWriter::new(WagonWriteOptions::builder().name("durations").build());
        let mut bytes = Vec::new();
        writer.write_binary(&tree, &mut bytes).unwrap();
        let back = WagonReader::default().read_binary(bytes.as_slice(), schema()).unwrap();
        assert_eq!(
            WagonWriter::default().to_text(&back).unwrap(),
            WagonWriter::default().to_text(&tree).unwrap()
        );
    }

    #[test]
    fn writer_checks_tree_type() {
        let tree = WagonReader::default().parse_str(TREE, schema()).unwrap();
        let writer = WagonWriter::new(
            WagonWriteOptions::builder()
                .tree_type(WagonTreeType::Regression)
                .build(),
        );
        assert!(matches!(writer.to_text(&tree), Err(WriteError::Unsupported(_))));
    }

    #[test]
    fn string_tree_roundtrip() {
        let text = "\"a\",1:\"b\",2:\"c\"\n((phone is a)\n((((0 0.2) (2 0.8)) 0))\n((((1 1)) 0)))\n";
        let reader = WagonReader::default();
        let spt = reader.read_string_tree(text.as_bytes(), schema()).unwrap();
        assert_eq!(spt.symbols(), &["a", "b", "c"]);
        let v = schema().encode(0, &["a", "0", "0"]).unwrap();
        assert_eq!(spt.most_probable_symbol(&v), Some("c"));

        let mut out = Vec::new();
        WagonWriter::default().write_string_tree(&spt, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), text);
    }

    #[test]
    fn string_tree_with_unwritable_symbol() {
        let spt = StringPredictionTree::new(Cart::empty(schema()), vec!["a,1:b".into()]);
        let mut out = Vec::new();
        assert!(matches!(
            WagonWriter::default().write_string_tree(&spt, &mut out),
            Err(WriteError::SymbolTable(SymbolTableError::Unwritable { index: 0, .. }))
        ));
        assert!(out.is_empty());
    }
}
