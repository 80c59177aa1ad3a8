//! Error types for sentence trees and corpora.

use thiserror::Error;

/// Errors raised while building or validating trees and corpora.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CorpusError {
    /// Word id outside the dictionary.
    #[error("Unknown word id {id} (dictionary holds {size} words)")]
    UnknownWord { id: usize, size: usize },

    /// Tree structure violates the binary-tree invariants.
    #[error("Invalid tree at node {node}: {reason}")]
    InvalidTree { node: usize, reason: String },

    /// Bracketed tree text could not be parsed.
    #[error("Parse error at byte {position}: {message}")]
    ParseError { position: usize, message: String },

    /// Empty sentence.
    #[error("Cannot build a tree for an empty sentence")]
    EmptySentence,

    /// Paired corpora do not line up.
    #[error("Paired corpora differ in length: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
}
