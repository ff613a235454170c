//! Trees predicting strings from their own symbol table.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

use crate::schema::FeatureVector;

use super::cart::Cart;
use super::view::GraphView;

/// Errors raised while parsing or rendering a symbol-table header line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolTableError {
    #[error("symbol table entry {index} is not quoted: {entry}")]
    Unquoted { index: usize, entry: String },
    #[error("symbol table is empty")]
    Empty,
    /// Symbol the header line cannot carry: a line break or a `,<index>:` marker.
    #[error("symbol {index} cannot be written to a header: {symbol:?}")]
    Unwritable { index: usize, symbol: String },
}

/// A [`Cart`] whose weighted leaves index a symbol table owned by the tree.
///
/// Used for letter-to-sound style predictions where the candidate strings
/// are not values of any schema feature.
#[derive(Debug, Clone)]
pub struct StringPredictionTree {
    tree: Cart,
    symbols: Vec<String>,
}

impl StringPredictionTree {
    pub fn new(tree: Cart, symbols: Vec<String>) -> Self {
        Self { tree, symbols }
    }

    pub fn tree(&self) -> &Cart {
        &self.tree
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn into_parts(self) -> (Cart, Vec<String>) {
        (self.tree, self.symbols)
    }

    /// Symbol with the strictly greatest weight in the leaf `vector` reaches.
    ///
    /// Returns `None` when the walk ends in an empty slot, the leaf has no
    /// entries, or the winning index is outside the symbol table.
    ///
    /// # Panics
    ///
    /// Panics if the leaf reached does not hold weighted candidates.
    pub fn most_probable_symbol(&self, vector: &FeatureVector) -> Option<&str> {
        let node = self.tree.interpret_to_node(vector, 0)?;
        let node = self.tree.node(node);
        if node.is_decision() {
            return None;
        }
        let Some(weighted) = node.as_leaf().and_then(|p| p.weighted()) else {
            panic!(
                "symbol prediction requires a weighted leaf, found {:?}",
                node.as_leaf().map(|p| p.kind())
            );
        };
        let (index, _) = weighted.most_probable()?;
        let index = usize::try_from(index).ok()?;
        self.symbols.get(index).map(String::as_str)
    }

    /// Render the symbol table as its header line.
    pub fn symbol_header(&self) -> Result<String, SymbolTableError> {
        if self.symbols.is_empty() {
            return Err(SymbolTableError::Empty);
        }
        let mut line = String::new();
        for (i, symbol) in self.symbols.iter().enumerate() {
            if symbol.contains(['\n', '\r']) || SEPARATOR.is_match(symbol) {
                return Err(SymbolTableError::Unwritable {
                    index: i,
                    symbol: symbol.clone(),
                });
            }
            if i > 0 {
                let _ = write!(line, ",{i}:");
            }
            let _ = write!(line, "\"{symbol}\"");
        }
        Ok(line)
    }
}

static SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\d+:").expect("invalid separator regex"));
static LEADING_INDEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+:").expect("invalid index regex"));

/// Parse a symbol table header: quoted entries separated by `,<index>:`.
///
/// Entries are kept in the order they appear; the indices are not re-read.
pub fn parse_symbol_header(line: &str) -> Result<Vec<String>, SymbolTableError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(SymbolTableError::Empty);
    }
    let line = LEADING_INDEX.replace(line, "");
    SEPARATOR
        .split(&line)
        .enumerate()
        .map(|(index, entry)| {
            entry
                .strip_prefix('"')
                .and_then(|e| e.strip_suffix('"'))
                .filter(|_| entry.len() >= 2)
                .map(str::to_string)
                .ok_or_else(|| SymbolTableError::Unquoted {
                    index,
                    entry: entry.to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::repr::{DecisionNode, GraphBuilder, LeafPayload, WeightedIndices};
    use crate::schema::{FeatureMeta, FeatureSchema};

    #[test]
    fn header_parsing() {
        assert_eq!(
            parse_symbol_header(r#""a",1:"b",2:"c""#).unwrap(),
            vec!["a", "b", "c"]
        );
        assert_eq!(parse_symbol_header(r#"0:"x",1:"""#).unwrap(), vec!["x", ""]);
        assert_eq!(
            parse_symbol_header(r#""a",1:b"#),
            Err(SymbolTableError::Unquoted {
                index: 1,
                entry: "b".into()
            })
        );
        assert_eq!(parse_symbol_header("  "), Err(SymbolTableError::Empty));
    }

    #[test]
    fn header_roundtrip() {
        let schema = Arc::new(FeatureSchema::empty());
        let tree = StringPredictionTree::new(
            Cart::empty(schema),
            vec!["a".into(), "b-c".into(), "'".into()],
        );
        let header = tree.symbol_header().unwrap();
        assert_eq!(header, r#""a",1:"b-c",2:"'""#);
        assert_eq!(parse_symbol_header(&header).unwrap(), tree.symbols());

        let quoted = StringPredictionTree::new(
            Cart::empty(Arc::new(FeatureSchema::empty())),
            vec!["\"".into(), "x,y".into()],
        );
        let header = quoted.symbol_header().unwrap();
        assert_eq!(parse_symbol_header(&header).unwrap(), quoted.symbols());
    }

    #[test]
    fn header_rejects_ambiguous_symbols() {
        let table = |symbols: &[&str]| {
            StringPredictionTree::new(
                Cart::empty(Arc::new(FeatureSchema::empty())),
                symbols.iter().map(|s| s.to_string()).collect(),
            )
        };
        assert_eq!(
            table(&["a", "b\",2:\"c"]).symbol_header(),
            Err(SymbolTableError::Unwritable {
                index: 1,
                symbol: "b\",2:\"c".into()
            })
        );
        assert!(matches!(
            table(&["two\nlines"]).symbol_header(),
            Err(SymbolTableError::Unwritable { index: 0, .. })
        ));
        assert_eq!(table(&[]).symbol_header(), Err(SymbolTableError::Empty));
    }

    #[test]
    fn predicts_heaviest_symbol() {
        let schema = Arc::new(FeatureSchema::new(vec![FeatureMeta::byte("l", ["x", "y"])]).unwrap());
        let mut b = GraphBuilder::new(schema.clone());
        let root = b.add_decision(DecisionNode::byte_equals(0, 0));
        let yes = b.add_leaf(LeafPayload::WeightedIndices(WeightedIndices::new(
            vec![0, 1, 2],
            vec![0.2, 0.7, 0.1],
        )));
        let no = b.add_leaf(LeafPayload::WeightedIndices(WeightedIndices::default()));
        b.set_root(root);
        b.push_child(root, Some(yes)).unwrap();
        b.push_child(root, Some(no)).unwrap();
        let tree = StringPredictionTree::new(
            Cart::from_builder(b).unwrap(),
            vec!["a".into(), "b".into(), "c".into()],
        );

        let x = schema.encode(0, &["x"]).unwrap();
        let y = schema.encode(0, &["y"]).unwrap();
        assert_eq!(tree.most_probable_symbol(&x), Some("b"));
        assert_eq!(tree.most_probable_symbol(&y), None);
    }

    #[test]
    #[should_panic(expected = "weighted leaf")]
    fn non_weighted_leaf_panics() {
        let schema = Arc::new(FeatureSchema::new(vec![FeatureMeta::byte("l", ["x"])]).unwrap());
        let mut b = GraphBuilder::new(schema.clone());
        let leaf = b.add_leaf(LeafPayload::Indices(vec![0]));
        b.set_root(leaf);
        let tree = StringPredictionTree::new(Cart::from_builder(b).unwrap(), vec!["a".into()]);
        tree.most_probable_symbol(&schema.encode(0, &["x"]).unwrap());
    }
}
