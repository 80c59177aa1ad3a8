//! Error types for model setup and training.

use rae_core::CoreError;
use rae_nlp::CorpusError;
use thiserror::Error;

/// Errors detected while setting up or driving training.
///
/// Everything here is caught before the parallel hot loop starts; usage
/// errors inside propagation (unfolding on a variant without a decoder,
/// labelling a subtree of a flat model) are panics instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrainError {
    /// Parameter layout or buffer failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Malformed trees or mismatched corpora.
    #[error(transparent)]
    Corpus(#[from] CorpusError),

    /// A configuration that cannot be trained.
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// Gradient buffer does not mirror the parameter arena.
    #[error("Gradient buffer has {got} values, expected {expected}")]
    BufferSize { expected: usize, got: usize },

    /// Minibatch window outside the corpus.
    #[error("Minibatch [{from}, {to}) is invalid for a corpus of {len} sentences")]
    Window { from: usize, to: usize, len: usize },

    /// Configuration text could not be decoded.
    #[error("Cannot parse configuration: {message}")]
    Parse { message: String },
}

impl TrainError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        TrainError::Config {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for TrainError {
    fn from(e: serde_json::Error) -> Self {
        TrainError::Parse {
            message: e.to_string(),
        }
    }
}
