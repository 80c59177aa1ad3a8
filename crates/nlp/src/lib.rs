//! # NLP - Sentence Trees and Corpora
//!
//! This crate holds the linguistic side of the engine: the binary trees that
//! recursive autoencoders compose over, the corpora they come in, and the
//! metrics used to compare the resulting sentence vectors.
//!
//! ## Core Concepts
//!
//! - **Dictionary**: word ↔ id, with `_UNK_` fixed at id 0
//! - **Sentence**: a binary tree as parallel arrays, children after parents
//! - **Corpus**: immutable sentence sequence sized for propagator buffers
//! - **Documents**: sentences grouped into trees whose leaves are sentence ids
//! - **Similarity**: guarded cosine and windowed paraphrase retrieval
//!
//! ## Example: Parsing "((the cat) sat)"
//!
//! ```rust
//! use rae_nlp::{Dictionary, Sentence};
//!
//! let dict = Dictionary::from_words(["the", "cat", "sat"]);
//! let tree = Sentence::parse_bracketed("((the cat) sat)", &dict).unwrap();
//!
//! assert_eq!(tree.num_nodes(), 5);
//! assert_eq!(tree.words, vec![1, 2, 3]);
//! tree.validate(dict.len()).unwrap();
//! ```

pub mod corpus;
pub mod dictionary;
mod error;
pub mod sentence;
pub mod similarity;

pub use corpus::Corpus;
pub use dictionary::{Dictionary, UNKNOWN_ID, UNKNOWN_WORD};
pub use error::CorpusError;
pub use sentence::Sentence;
pub use similarity::{cosine_similarity, paraphrase_retrieval, ParaphraseResult};
