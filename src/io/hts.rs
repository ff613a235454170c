//! HTS tree format.
//!
//! A tree file holds a questions section (`QS` lines), then one block per
//! HMM state:
//!
//! ```text
//! QS "C-a" {*-a+*}
//!
//! {*}[2]
//! {
//!    0 phone=a        -1  "dur_s2_1"
//!   -1 pos=n     "dur_s2_2"  "dur_s2_3"
//! }
//! ```
//!
//! `{*}[k]` selects state tree `k - 2`. Body lines are
//! `<id> <feature>=<value> <NO> <YES>` where `0` is the root, `-n` names a
//! decision node and any other reference is a leaf name ending in
//! `_<leaf id>` plus a closing quote. Decision nodes may be referenced
//! before their own line. A block without braces holds a single leaf name.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use bon::Builder;
use tracing::{debug, trace};

use crate::repr::{Cart, DecisionNode, GraphBuilder, GraphError, LeafPayload, NodeId, NodeKind, PdfLeaf};
use crate::schema::{FeatureKind, FeatureSchema};

use super::pdf::{PdfFormat, PdfTables};
use super::FormatError;

// ============================================================================
// SymbolTranslator
// ============================================================================

/// Undoes the value escaping applied when questions were written.
///
/// Punctuation classes and ToBI symbols use fixed tables; phone symbols
/// that are unsafe in file names use a configurable table.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolTranslator {
    /// Escaped phone -> original phone.
    tricky_phones: HashMap<String, String>,
}

const DEFAULT_TRICKY_PHONES: &[(&str, &str)] = &[
    ("6", "ER6"),
    ("2:", "EU2"),
    ("9", "EU9"),
    ("9~", "UM9"),
    ("e~", "IMe"),
    ("a~", "ANa"),
    ("o~", "ONo"),
    ("?", "gstop"),
    ("r=", "rr"),
];

impl Default for SymbolTranslator {
    fn default() -> Self {
        DEFAULT_TRICKY_PHONES
            .iter()
            .fold(Self::empty(), |t, (original, escaped)| t.with_tricky_phone(*original, *escaped))
    }
}

impl SymbolTranslator {
    /// Translator without phone replacements.
    pub fn empty() -> Self {
        Self {
            tricky_phones: HashMap::new(),
        }
    }

    /// Add a phone replacement.
    pub fn with_tricky_phone(mut self, original: impl Into<String>, escaped: impl Into<String>) -> Self {
        self.tricky_phones.insert(escaped.into(), original.into());
        self
    }

    /// Read a phone table: one `<original> <escaped>` pair per line.
    pub fn from_tricky_phones<R: BufRead>(reader: R) -> Result<Self, FormatError> {
        let mut translator = Self::empty();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some(original), Some(escaped), None) => {
                    translator = translator.with_tricky_phone(original, escaped);
                }
                _ => return Err(FormatError::line(i + 1, "expected '<phone> <replacement>'")),
            }
        }
        Ok(translator)
    }

    /// Original value of `value` for `feature`.
    pub fn translate(&self, feature: &str, value: &str) -> String {
        match feature {
            "sentence_punc" | "prev_punctuation" | "next_punctuation" => {
                punctuation(value).to_string()
            }
            f if f.contains("tobi_") => value.replace("st", "*").replace("pc", "%").replace("ht", "^"),
            f if f.contains("phone") => self
                .tricky_phones
                .get(value)
                .map_or_else(|| value.to_string(), Clone::clone),
            _ => value.to_string(),
        }
    }
}

fn punctuation(value: &str) -> &str {
    match value {
        "pt" => ".",
        "cm" => ",",
        "op" => "(",
        "cp" => ")",
        "in" => "?",
        "qt" => "\"",
        other => other,
    }
}

// ============================================================================
// Options and result
// ============================================================================

/// Options for reading HTS trees.
#[derive(Clone, Debug, Builder)]
pub struct HtsReadOptions {
    /// Number of state trees in the file.
    #[builder(default = 5)]
    pub num_states: usize,
    #[builder(default)]
    pub translator: SymbolTranslator,
    /// Layout of the pdf table passed to [`HtsReader::load`].
    pub pdf_format: Option<PdfFormat>,
}

impl Default for HtsReadOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// One tree per HMM state; states absent from the file hold empty trees.
#[derive(Debug, Clone)]
pub struct HtsTrees {
    trees: Vec<Cart>,
    vector_size: Option<usize>,
}

impl HtsTrees {
    pub fn trees(&self) -> &[Cart] {
        &self.trees
    }

    /// Tree of state `state` (0-based).
    pub fn get(&self, state: usize) -> Option<&Cart> {
        self.trees.get(state)
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Vector size of the attached pdf table, if any.
    pub fn vector_size(&self) -> Option<usize> {
        self.vector_size
    }

    pub fn into_trees(self) -> Vec<Cart> {
        self.trees
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Loads per-state HTS trees.
#[derive(Clone, Debug, Default)]
pub struct HtsReader {
    options: HtsReadOptions,
}

impl HtsReader {
    pub fn new(options: HtsReadOptions) -> Self {
        Self { options }
    }

    /// Load a tree file and, when given, its pdf table.
    ///
    /// The pdf layout comes from [`HtsReadOptions::pdf_format`].
    pub fn load(
        &self,
        tree_path: impl AsRef<Path>,
        pdf_path: Option<&Path>,
        schema: Arc<FeatureSchema>,
    ) -> Result<HtsTrees, FormatError> {
        let pdfs = match pdf_path {
            Some(path) => {
                let format = self
                    .options
                    .pdf_format
                    .ok_or_else(|| FormatError::value("pdf format", "unset"))?;
                Some(PdfTables::load(path, format, self.options.num_states)?)
            }
            None => None,
        };
        let file = File::open(tree_path)?;
        self.read(BufReader::new(file), schema, pdfs.as_ref())
    }

    /// Read all state trees. Leaves get statistics from `pdfs` when given,
    /// otherwise they only carry their id.
    pub fn read<R: BufRead>(
        &self,
        reader: R,
        schema: Arc<FeatureSchema>,
        pdfs: Option<&PdfTables>,
    ) -> Result<HtsTrees, FormatError> {
        let num_states = self.options.num_states;
        if num_states == 0 {
            return Err(FormatError::value("state count", "0"));
        }
        let lines = reader.lines().collect::<Result<Vec<_>, _>>()?;
        let mut trees: Vec<Option<Cart>> = vec![None; num_states];

        let mut i = lines.iter().take_while(|l| l.contains("QS")).count();
        trace!(questions = i, "skipped questions section");
        while i < lines.len() {
            let line = &lines[i];
            i += 1;
            if !line.contains("{*}") {
                continue;
            }
            let state = state_index(i, line, num_states)?;
            let header_line = i;
            let mut state_tree = StateTree::new(schema.clone(), &self.options.translator, state, pdfs);
            match lines.get(i) {
                Some(open) if open.contains('{') => {
                    i += 1;
                    loop {
                        let Some(body) = lines.get(i) else {
                            return Err(FormatError::BracketMismatch {
                                line: i,
                                message: format!("state block {} is not closed", state + 2),
                            });
                        };
                        i += 1;
                        if body.contains('}') {
                            break;
                        }
                        if body.trim().is_empty() {
                            continue;
                        }
                        state_tree.parse_line(i, body)?;
                    }
                }
                Some(leaf) => {
                    i += 1;
                    state_tree.single_leaf(i, leaf.trim())?;
                }
                None => return Err(FormatError::line(header_line, "state header without a tree")),
            }
            trees[state] = Some(state_tree.finish(i)?);
        }

        let trees = trees
            .into_iter()
            .map(|t| t.unwrap_or_else(|| Cart::empty(schema.clone())))
            .collect();
        Ok(HtsTrees {
            trees,
            vector_size: pdfs.map(PdfTables::vector_size),
        })
    }
}

/// `{*}[k]` -> `k - 2`.
fn state_index(line_no: usize, line: &str, num_states: usize) -> Result<usize, FormatError> {
    let tag = line
        .split_once('[')
        .and_then(|(_, rest)| rest.split_once(']'))
        .map(|(tag, _)| tag.trim())
        .ok_or_else(|| FormatError::line(line_no, "state header without '[k]'"))?;
    tag.parse::<usize>()
        .ok()
        .and_then(|k| k.checked_sub(2))
        .filter(|&s| s < num_states)
        .ok_or_else(|| FormatError::value("state index", tag))
}

/// Assembly of one state tree.
struct StateTree<'a> {
    schema: Arc<FeatureSchema>,
    translator: &'a SymbolTranslator,
    state: usize,
    pdfs: Option<&'a PdfTables>,
    builder: GraphBuilder,
    /// Decision ids referenced so far, with whether their line was seen.
    placeholders: HashMap<u32, (NodeId, bool)>,
    n_leaves: usize,
}

impl<'a> StateTree<'a> {
    fn new(
        schema: Arc<FeatureSchema>,
        translator: &'a SymbolTranslator,
        state: usize,
        pdfs: Option<&'a PdfTables>,
    ) -> Self {
        Self {
            builder: GraphBuilder::new(schema.clone()),
            schema,
            translator,
            state,
            pdfs,
            placeholders: HashMap::new(),
            n_leaves: 0,
        }
    }

    fn placeholder(&mut self, id: u32) -> NodeId {
        let builder = &mut self.builder;
        self.placeholders
            .entry(id)
            .or_insert_with(|| (builder.add_decision(DecisionNode::byte_equals(0, 0)), false))
            .0
    }

    fn parse_line(&mut self, line_no: usize, line: &str) -> Result<(), FormatError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [node, question, no, yes] = fields[..] else {
            return Err(FormatError::line(line_no, format!("expected 4 fields, got {}", fields.len())));
        };
        let id = match node {
            "0" => 0,
            n => n
                .strip_prefix('-')
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|&n| n > 0)
                .ok_or_else(|| FormatError::line(line_no, format!("'{n}' is not a decision node id")))?,
        };
        if id == 0 && self.placeholders.is_empty() {
            let root = self.placeholder(0);
            self.builder.set_root(root);
        }
        let target = match self.placeholders.get_mut(&id) {
            Some((target, seen)) if !*seen => {
                *seen = true;
                *target
            }
            _ => {
                return Err(FormatError::UnknownNode {
                    line: line_no,
                    id: node.to_string(),
                })
            }
        };

        let decision = self.question(line_no, question)?;
        if let Some(n) = self.builder.node_mut(target) {
            n.kind = NodeKind::Decision(decision);
        }
        let yes = self.child(line_no, yes)?;
        let no = self.child(line_no, no)?;
        self.builder.set_child(target, 0, Some(yes))?;
        self.builder.set_child(target, 1, Some(no))?;
        Ok(())
    }

    /// `feature=value` as an equality test.
    fn question(&self, line_no: usize, question: &str) -> Result<DecisionNode, FormatError> {
        let (name, raw_value) = question
            .split_once('=')
            .ok_or_else(|| FormatError::line(line_no, format!("question '{question}' has no '='")))?;
        let value = self.translator.translate(name, raw_value);
        let feature = self.schema.feature_index(name)?;
        let index = feature as usize;
        let decision = match self.schema.kind(index)? {
            FeatureKind::Short => DecisionNode::short_equals(feature, self.schema.short_value(index, &value)?),
            _ => DecisionNode::byte_equals(feature, self.schema.byte_value(index, &value)?),
        };
        Ok(decision)
    }

    fn child(&mut self, line_no: usize, reference: &str) -> Result<NodeId, FormatError> {
        if let Some(id) = reference.strip_prefix('-') {
            let id = id
                .parse::<u32>()
                .map_err(|_| FormatError::line(line_no, format!("invalid node reference '{reference}'")))?;
            if let Some(&(node, _)) = self.placeholders.get(&id) {
                return Err(GraphError::SharedNode { node }.into());
            }
            return Ok(self.placeholder(id));
        }
        let payload = self.leaf(line_no, reference)?;
        Ok(self.builder.add_leaf(payload))
    }

    /// Leaf named `..._<id>` followed by one closing character.
    fn leaf(&mut self, line_no: usize, name: &str) -> Result<LeafPayload, FormatError> {
        let tail = name.rsplit_once('_').map_or(name, |(_, tail)| tail);
        let digits = tail.get(..tail.len().saturating_sub(1)).unwrap_or_default();
        let id = digits
            .parse::<u32>()
            .map_err(|_| FormatError::line(line_no, format!("invalid leaf name '{name}'")))?;
        let leaf = match self.pdfs {
            Some(tables) => tables.leaf(self.state, id).cloned().ok_or_else(|| FormatError::UnknownNode {
                line: line_no,
                id: name.to_string(),
            })?,
            None => PdfLeaf::unresolved(id),
        };
        self.n_leaves += 1;
        Ok(LeafPayload::Pdf(leaf))
    }

    fn single_leaf(&mut self, line_no: usize, name: &str) -> Result<(), FormatError> {
        let payload = self.leaf(line_no, name)?;
        let id = self.builder.add_leaf(payload);
        self.builder.set_root(id);
        Ok(())
    }

    fn finish(self, line_no: usize) -> Result<Cart, FormatError> {
        if let Some(id) = self
            .placeholders
            .iter()
            .filter(|(_, (_, seen))| !seen)
            .map(|(id, _)| *id)
            .min()
        {
            return Err(FormatError::UnknownNode {
                line: line_no,
                id: format!("-{id}"),
            });
        }
        let n_decisions = self.placeholders.len();
        let tree = Cart::from_builder(self.builder)?;
        debug!(
            state = self.state + 2,
            decisions = n_decisions,
            leaves = self.n_leaves,
            "loaded state tree"
        );
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::GraphView;
    use crate::schema::FeatureMeta;

    fn schema() -> Arc<FeatureSchema> {
        Arc::new(
            FeatureSchema::new(vec![
                FeatureMeta::byte("phone", ["0", "a", "6", "?"]),
                FeatureMeta::byte("sentence_punc", ["0", ".", ","]),
                FeatureMeta::short("pos", ["0", "n", "v"]),
            ])
            .unwrap(),
        )
    }

    const TREES: &str = r#"QS "C-a" {*-a+*}
QS "Punc" {*|pt|*}

{*}[2]
{
   0 phone=a        -1  "dur_s2_1"
  -1 sentence_punc=pt     "dur_s2_2"  -2
  -2 pos=v  "dur_s2_3" "dur_s2_4"
}

{*}[4]
   "dur_s4_7"
"#;

    fn leaf_id(tree: &Cart, values: [&str; 3]) -> u32 {
        let v = schema().encode(0, &values).unwrap();
        match tree.interpret(&v) {
            Some(LeafPayload::Pdf(p)) => p.id,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn yes_is_slot_zero() {
        let trees = HtsReader::default().read(TREES.as_bytes(), schema(), None).unwrap();
        assert_eq!(trees.len(), 5);
        let tree = trees.get(0).unwrap();
        assert_eq!(tree.node_count(), 7);
        assert_eq!(leaf_id(tree, ["a", "0", "0"]), 1);
        assert_eq!(leaf_id(tree, ["6", ".", "v"]), 4);
        assert_eq!(leaf_id(tree, ["6", ".", "n"]), 3);
        assert_eq!(leaf_id(tree, ["6", ",", "v"]), 2);
    }

    #[test]
    fn missing_states_are_empty_and_single_leaf_blocks_load() {
        let trees = HtsReader::default().read(TREES.as_bytes(), schema(), None).unwrap();
        assert!(trees.get(1).unwrap().is_empty());
        let single = trees.get(2).unwrap();
        assert_eq!(leaf_id(single, ["a", "0", "0"]), 7);
        assert_eq!(trees.vector_size(), None);
    }

    #[test]
    fn translator_reverses_escapes() {
        let t = SymbolTranslator::default();
        assert_eq!(t.translate("sentence_punc", "qt"), "\"");
        assert_eq!(t.translate("next_punctuation", "cm"), ",");
        assert_eq!(t.translate("tobi_accent", "Lpst"), "Lp*");
        assert_eq!(t.translate("prev_phone", "gstop"), "?");
        assert_eq!(t.translate("phone", "a"), "a");
        assert_eq!(t.translate("pos", "pt"), "pt");

        let custom = SymbolTranslator::from_tricky_phones("# table\nA: AA\n".as_bytes()).unwrap();
        assert_eq!(custom.translate("phone", "AA"), "A:");
        assert_eq!(custom.translate("phone", "ER6"), "ER6");
    }

    #[test]
    fn forward_reference_must_be_defined() {
        let text = "{*}[2]\n{\n 0 phone=a -1 \"x_1\"\n}\n";
        assert!(matches!(
            HtsReader::default().read(text.as_bytes(), schema(), None),
            Err(FormatError::UnknownNode { .. })
        ));
    }

    #[test]
    fn undeclared_node_line_rejected() {
        let text = "{*}[2]\n{\n 0 phone=a \"x_2\" \"x_1\"\n -3 phone=6 \"x_3\" \"x_4\"\n}\n";
        assert!(matches!(
            HtsReader::default().read(text.as_bytes(), schema(), None),
            Err(FormatError::UnknownNode { line: 4, .. })
        ));
    }

    #[test]
    fn state_out_of_range() {
        let options = HtsReadOptions::builder().num_states(1).build();
        let text = "{*}[3]\n\"x_1\"\n";
        assert!(matches!(
            HtsReader::new(options).read(text.as_bytes(), schema(), None),
            Err(FormatError::InvalidValue { field: "state index", .. })
        ));
    }
}
