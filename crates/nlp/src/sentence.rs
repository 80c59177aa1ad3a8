//! # Sentence Trees
//!
//! A sentence is a binary tree flattened into parallel arrays indexed by
//! node id. Node 0 is the root and every child has a larger index than its
//! parent, so iterating `N-1..=0` visits children before parents and
//! iterating `0..N` visits parents before children.
//!
//! ```text
//!   ((the cat) sat)          node  left  right  word
//!                              0     1     4     -
//!         0                    1     2     3     -
//!        / \                   2     -     -    the
//!       1   4 sat              3     -     -    cat
//!      / \                     4     -     -    sat
//!     2   3
//!   the   cat
//! ```
//!
//! A node with a single child stores it as `child_left`.

use serde::{Deserialize, Serialize};

use crate::dictionary::Dictionary;
use crate::error::CorpusError;

/// One sentence: a binary tree over word ids plus sentence-level metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    /// Left (or only) child per node.
    pub child_left: Vec<Option<usize>>,
    /// Right child per node.
    pub child_right: Vec<Option<usize>>,
    /// Word id for leaves, `None` for internal nodes.
    pub leaf_word: Vec<Option<usize>>,
    /// Free-form node tags (e.g. category ids from a parser).
    pub tags: Vec<u32>,
    /// Leaf word ids in surface order.
    pub words: Vec<usize>,
    /// Sentence-level class label.
    pub label: usize,
    /// Row of this sentence in a document-level dictionary.
    pub id: usize,
    /// Document this sentence belongs to.
    pub doc_id: usize,
}

impl Sentence {
    /// Left-branching tree over `words` (a single leaf for one word).
    ///
    /// `((w0 w1) w2) ...`
    pub fn flat(words: &[usize]) -> Result<Self, CorpusError> {
        if words.is_empty() {
            return Err(CorpusError::EmptySentence);
        }
        let mut builder = TreeBuilder::default();
        builder.left_branching(words);
        Ok(builder.finish())
    }

    /// Right-branching tree over `words`: `w0 (w1 (w2 ...))`.
    pub fn right_branching(words: &[usize]) -> Result<Self, CorpusError> {
        if words.is_empty() {
            return Err(CorpusError::EmptySentence);
        }
        let mut builder = TreeBuilder::default();
        builder.right_branching(words);
        Ok(builder.finish())
    }

    /// Parse bracketed notation such as `((the cat) sat)`.
    ///
    /// Tokens are looked up in `dict`; unknown tokens map to the unknown id.
    /// A bracket with one constituent yields a unary node.
    pub fn parse_bracketed(text: &str, dict: &Dictionary) -> Result<Self, CorpusError> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(CorpusError::EmptySentence);
        }
        let mut parser = BracketParser {
            tokens: &tokens,
            pos: 0,
            dict,
            builder: TreeBuilder::default(),
        };
        parser.constituent()?;
        if parser.pos != tokens.len() {
            return Err(CorpusError::ParseError {
                position: tokens[parser.pos].0,
                message: "trailing input after the root constituent".to_string(),
            });
        }
        Ok(parser.builder.finish())
    }

    pub fn with_label(mut self, label: usize) -> Self {
        self.label = label;
        self
    }

    pub fn with_ids(mut self, id: usize, doc_id: usize) -> Self {
        self.id = id;
        self.doc_id = doc_id;
        self
    }

    /// Number of tree nodes.
    pub fn num_nodes(&self) -> usize {
        self.child_left.len()
    }

    /// Number of leaves (surface words).
    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    pub fn is_leaf(&self, node: usize) -> bool {
        self.child_left[node].is_none()
    }

    /// Children of `node`: `(left, right)`, right is `None` for unary nodes.
    pub fn children(&self, node: usize) -> Option<(usize, Option<usize>)> {
        self.child_left[node].map(|l| (l, self.child_right[node]))
    }

    /// Word id at `node`, panicking for internal nodes.
    pub fn word_at(&self, node: usize) -> usize {
        match self.leaf_word[node] {
            Some(w) => w,
            None => panic!("Node {} is not a leaf", node),
        }
    }

    /// Number of leaves among the tree nodes.
    pub fn num_leaves(&self) -> usize {
        self.leaf_word.iter().filter(|w| w.is_some()).count()
    }

    /// Check the tree invariants.
    ///
    /// - all arrays have one entry per node
    /// - children have larger indices than their parent and each node has
    ///   at most one parent (so the structure is a tree rooted at 0)
    /// - a right child implies a left child
    /// - leaves carry a word id below `dict_size`, internal nodes carry none
    /// - `words` lists the leaf words in left-to-right order
    pub fn validate(&self, dict_size: usize) -> Result<(), CorpusError> {
        let n = self.num_nodes();
        if n == 0 {
            return Err(CorpusError::EmptySentence);
        }
        if self.child_right.len() != n || self.leaf_word.len() != n || self.tags.len() != n {
            return Err(CorpusError::InvalidTree {
                node: 0,
                reason: "parallel arrays differ in length".to_string(),
            });
        }

        let mut parents = vec![0usize; n];
        for node in 0..n {
            let invalid = |reason: &str| CorpusError::InvalidTree {
                node,
                reason: reason.to_string(),
            };
            match (self.child_left[node], self.child_right[node]) {
                (None, Some(_)) => return Err(invalid("right child without left child")),
                (None, None) => match self.leaf_word[node] {
                    None => return Err(invalid("leaf without a word id")),
                    Some(w) if w >= dict_size => {
                        return Err(CorpusError::UnknownWord {
                            id: w,
                            size: dict_size,
                        })
                    }
                    Some(_) => {}
                },
                (Some(l), r) => {
                    if self.leaf_word[node].is_some() {
                        return Err(invalid("internal node with a word id"));
                    }
                    for child in std::iter::once(l).chain(r) {
                        if child <= node || child >= n {
                            return Err(invalid("child index must exceed its parent"));
                        }
                        parents[child] += 1;
                    }
                }
            }
        }
        if let Some(node) = (1..n).find(|&i| parents[i] != 1) {
            return Err(CorpusError::InvalidTree {
                node,
                reason: format!("node has {} parents", parents[node]),
            });
        }

        let in_order = self.leaves_in_order();
        if in_order != self.words {
            return Err(CorpusError::InvalidTree {
                node: 0,
                reason: "word sequence does not match the leaves".to_string(),
            });
        }
        Ok(())
    }

    /// Leaf words by a left-to-right walk from the root.
    pub fn leaves_in_order(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.words.len());
        let mut stack = vec![0usize];
        while let Some(node) = stack.pop() {
            match self.children(node) {
                None => out.extend(self.leaf_word[node]),
                Some((l, r)) => {
                    stack.extend(r);
                    stack.push(l);
                }
            }
        }
        out
    }
}

/// Allocates nodes parent-first, which keeps child indices above parents.
#[derive(Debug, Default)]
struct TreeBuilder {
    child_left: Vec<Option<usize>>,
    child_right: Vec<Option<usize>>,
    leaf_word: Vec<Option<usize>>,
    words: Vec<usize>,
}

impl TreeBuilder {
    fn node(&mut self) -> usize {
        self.child_left.push(None);
        self.child_right.push(None);
        self.leaf_word.push(None);
        self.child_left.len() - 1
    }

    fn leaf(&mut self, word: usize) -> usize {
        let id = self.node();
        self.leaf_word[id] = Some(word);
        self.words.push(word);
        id
    }

    fn left_branching(&mut self, words: &[usize]) -> usize {
        match words {
            [w] => self.leaf(*w),
            [init @ .., last] => {
                let id = self.node();
                let l = self.left_branching(init);
                let r = self.leaf(*last);
                self.child_left[id] = Some(l);
                self.child_right[id] = Some(r);
                id
            }
            [] => unreachable!("callers reject empty input"),
        }
    }

    fn right_branching(&mut self, words: &[usize]) -> usize {
        match words {
            [w] => self.leaf(*w),
            [first, rest @ ..] => {
                let id = self.node();
                let l = self.leaf(*first);
                let r = self.right_branching(rest);
                self.child_left[id] = Some(l);
                self.child_right[id] = Some(r);
                id
            }
            [] => unreachable!("callers reject empty input"),
        }
    }

    fn finish(self) -> Sentence {
        let n = self.child_left.len();
        Sentence {
            child_left: self.child_left,
            child_right: self.child_right,
            leaf_word: self.leaf_word,
            tags: vec![0; n],
            words: self.words,
            label: 0,
            id: 0,
            doc_id: 0,
        }
    }
}

fn tokenize(text: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        if c == '(' || c == ')' || c.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push((s, &text[s..i]));
            }
            if !c.is_whitespace() {
                tokens.push((i, &text[i..i + 1]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        tokens.push((s, &text[s..]));
    }
    tokens
}

struct BracketParser<'t, 'd> {
    tokens: &'t [(usize, &'t str)],
    pos: usize,
    dict: &'d Dictionary,
    builder: TreeBuilder,
}

impl BracketParser<'_, '_> {
    fn error(&self, message: &str) -> CorpusError {
        let position = self
            .tokens
            .get(self.pos)
            .map(|(p, _)| *p)
            .unwrap_or_else(|| self.tokens.last().map(|(p, t)| p + t.len()).unwrap_or(0));
        CorpusError::ParseError {
            position,
            message: message.to_string(),
        }
    }

    fn constituent(&mut self) -> Result<usize, CorpusError> {
        match self.tokens.get(self.pos).map(|(_, t)| *t) {
            None => Err(self.error("unexpected end of input")),
            Some(")") => Err(self.error("unexpected ')'")),
            Some("(") => {
                self.pos += 1;
                let id = self.builder.node();
                let left = self.constituent()?;
                self.builder.child_left[id] = Some(left);
                if self.tokens.get(self.pos).map(|(_, t)| *t) != Some(")") {
                    let right = self.constituent()?;
                    self.builder.child_right[id] = Some(right);
                }
                match self.tokens.get(self.pos).map(|(_, t)| *t) {
                    Some(")") => {
                        self.pos += 1;
                        Ok(id)
                    }
                    Some(_) => Err(self.error("a constituent has at most two children")),
                    None => Err(self.error("missing ')'")),
                }
            }
            Some(word) => {
                self.pos += 1;
                let id = self.dict.id(word);
                Ok(self.builder.leaf(id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict() -> Dictionary {
        Dictionary::from_words(["the", "cat", "sat", "down"])
    }

    #[test]
    fn test_flat_single_word_is_a_leaf_root() {
        let s = Sentence::flat(&[3]).unwrap();
        assert_eq!(s.num_nodes(), 1);
        assert!(s.is_leaf(0));
        assert_eq!(s.word_at(0), 3);
        s.validate(4).unwrap();
    }

    #[test]
    fn test_flat_is_left_branching() {
        let s = Sentence::flat(&[1, 2, 3]).unwrap();
        assert_eq!(s.num_nodes(), 5);
        assert_eq!(s.children(0), Some((1, Some(4))));
        assert_eq!(s.children(1), Some((2, Some(3))));
        assert_eq!(s.words, vec![1, 2, 3]);
        assert_eq!(s.leaves_in_order(), vec![1, 2, 3]);
        s.validate(4).unwrap();
    }

    #[test]
    fn test_right_branching() {
        let s = Sentence::right_branching(&[1, 2, 3]).unwrap();
        assert_eq!(s.children(0), Some((1, Some(2))));
        assert_eq!(s.word_at(1), 1);
        s.validate(4).unwrap();
    }

    #[test]
    fn test_parse_bracketed_matches_doc_diagram() {
        let s = Sentence::parse_bracketed("((the cat) sat)", &dict()).unwrap();
        assert_eq!(s.child_left, vec![Some(1), Some(2), None, None, None]);
        assert_eq!(s.child_right, vec![Some(4), Some(3), None, None, None]);
        assert_eq!(s.words, vec![1, 2, 3]);
        s.validate(5).unwrap();
    }

    #[test]
    fn test_parse_unary_and_unknown() {
        let s = Sentence::parse_bracketed("((dog) down)", &dict()).unwrap();
        assert_eq!(s.children(1), Some((2, None)));
        assert_eq!(s.words, vec![0, 4]);
        s.validate(5).unwrap();
    }

    #[test]
    fn test_parse_errors() {
        let d = dict();
        assert_eq!(
            Sentence::parse_bracketed("", &d),
            Err(CorpusError::EmptySentence)
        );
        assert!(matches!(
            Sentence::parse_bracketed("(the cat sat)", &d),
            Err(CorpusError::ParseError { .. })
        ));
        assert!(matches!(
            Sentence::parse_bracketed("(the cat", &d),
            Err(CorpusError::ParseError { .. })
        ));
        assert!(matches!(
            Sentence::parse_bracketed("(the cat) sat", &d),
            Err(CorpusError::ParseError { position: 10, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_trees() {
        let mut s = Sentence::flat(&[1, 2]).unwrap();
        s.child_right[0] = Some(0);
        assert!(matches!(
            s.validate(3),
            Err(CorpusError::InvalidTree { node: 0, .. })
        ));

        let mut s = Sentence::flat(&[1, 2]).unwrap();
        s.child_left[0] = None;
        assert!(matches!(s.validate(3), Err(CorpusError::InvalidTree { .. })));

        let s = Sentence::flat(&[1, 7]).unwrap();
        assert_eq!(s.validate(3), Err(CorpusError::UnknownWord { id: 7, size: 3 }));

        let mut s = Sentence::flat(&[1, 2, 1]).unwrap();
        s.child_right[1] = Some(4);
        assert!(matches!(s.validate(3), Err(CorpusError::InvalidTree { .. })));
    }
}
