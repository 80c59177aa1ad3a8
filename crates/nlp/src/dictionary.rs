//! # Dictionary
//!
//! A word ↔ id map with a distinguished unknown token. Id 0 is always
//! [`UNKNOWN_WORD`], so any lookup miss falls back to a valid embedding row.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Surface form of the unknown token.
pub const UNKNOWN_WORD: &str = "_UNK_";

/// Id of the unknown token.
pub const UNKNOWN_ID: usize = 0;

/// Vocabulary for one language (or one document layer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dictionary {
    words: Vec<String>,
    ids: HashMap<String, usize>,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl Dictionary {
    /// A dictionary holding only the unknown token.
    pub fn new() -> Self {
        let mut dict = Self {
            words: Vec::new(),
            ids: HashMap::new(),
        };
        dict.insert(UNKNOWN_WORD);
        dict
    }

    /// Build from a word list, in order, skipping duplicates.
    pub fn from_words<'a>(words: impl IntoIterator<Item = &'a str>) -> Self {
        let mut dict = Self::new();
        for w in words {
            dict.insert(w);
        }
        dict
    }

    /// Add `word` if missing and return its id.
    pub fn insert(&mut self, word: &str) -> usize {
        if let Some(&id) = self.ids.get(word) {
            return id;
        }
        let id = self.words.len();
        self.words.push(word.to_string());
        self.ids.insert(word.to_string(), id);
        id
    }

    /// Id of `word`, or [`UNKNOWN_ID`].
    pub fn id(&self, word: &str) -> usize {
        self.ids.get(word).copied().unwrap_or(UNKNOWN_ID)
    }

    /// Exact lookup without the unknown fallback.
    pub fn get(&self, word: &str) -> Option<usize> {
        self.ids.get(word).copied()
    }

    pub fn word(&self, id: usize) -> Option<&str> {
        self.words.get(id).map(String::as_str)
    }

    /// Number of entries, including the unknown token.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Never true: the unknown token is always present.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Map a token sequence to ids, unknown words becoming [`UNKNOWN_ID`].
    pub fn encode<'a>(&self, tokens: impl IntoIterator<Item = &'a str>) -> Vec<usize> {
        tokens.into_iter().map(|t| self.id(t)).collect()
    }
}
