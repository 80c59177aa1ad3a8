//! # Corpora
//!
//! An immutable sequence of sentence trees. Propagators are sized from the
//! largest sentence, so the corpus caches its maximum word and node counts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Index;

use crate::error::CorpusError;
use crate::sentence::Sentence;

/// A sequence of sentences with cached size maxima.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Corpus {
    sentences: Vec<Sentence>,
    max_words: usize,
    max_nodes: usize,
}

impl Corpus {
    pub fn new(sentences: Vec<Sentence>) -> Self {
        let max_words = sentences.iter().map(Sentence::num_words).max().unwrap_or(0);
        let max_nodes = sentences.iter().map(Sentence::num_nodes).max().unwrap_or(0);
        Self {
            sentences,
            max_words,
            max_nodes,
        }
    }

    /// Build a corpus, validating every tree against the dictionary size.
    pub fn validated(sentences: Vec<Sentence>, dict_size: usize) -> Result<Self, CorpusError> {
        for s in &sentences {
            s.validate(dict_size)?;
        }
        Ok(Self::new(sentences))
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Sentence> {
        self.sentences.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sentence> {
        self.sentences.iter()
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    /// Most leaves in any sentence.
    pub fn max_words(&self) -> usize {
        self.max_words
    }

    /// Most nodes in any tree.
    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    /// One past the largest sentence id: the row count a document-level
    /// dictionary needs to hold every sentence.
    pub fn id_space(&self) -> usize {
        self.sentences.iter().map(|s| s.id + 1).max().unwrap_or(0)
    }

    /// Paired corpora must line up sentence by sentence.
    pub fn check_paired(&self, other: &Corpus) -> Result<(), CorpusError> {
        if self.len() == other.len() {
            Ok(())
        } else {
            Err(CorpusError::LengthMismatch {
                left: self.len(),
                right: other.len(),
            })
        }
    }

    /// Group sentences into documents.
    ///
    /// Documents appear in order of their first sentence; each becomes a
    /// left-branching tree whose leaves are the ids of its sentences. The
    /// document's own `id` and `doc_id` are its position in the result.
    pub fn document_level(&self) -> Corpus {
        let mut slots: HashMap<usize, usize> = HashMap::new();
        let mut members: Vec<Vec<usize>> = Vec::new();
        for s in &self.sentences {
            let k = *slots.entry(s.doc_id).or_insert_with(|| {
                members.push(Vec::new());
                members.len() - 1
            });
            members[k].push(s.id);
        }
        let docs = members
            .iter()
            .enumerate()
            .filter_map(|(k, ids)| Sentence::flat(ids).ok().map(|d| d.with_ids(k, k)))
            .collect();
        Corpus::new(docs)
    }
}

impl Index<usize> for Corpus {
    type Output = Sentence;

    fn index(&self, i: usize) -> &Sentence {
        &self.sentences[i]
    }
}

impl<'a> IntoIterator for &'a Corpus {
    type Item = &'a Sentence;
    type IntoIter = std::slice::Iter<'a, Sentence>;

    fn into_iter(self) -> Self::IntoIter {
        self.sentences.iter()
    }
}

impl FromIterator<Sentence> for Corpus {
    fn from_iter<I: IntoIterator<Item = Sentence>>(iter: I) -> Self {
        Corpus::new(iter.into_iter().collect())
    }
}
