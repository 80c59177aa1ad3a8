//! # Error Types
//!
//! Errors in the parameter arena are layout failures: a region that does not
//! exist, or a buffer whose length disagrees with the layout it is supposed
//! to carry. Both are detected when a store is built or relocated, never in
//! the propagation hot loop.

use thiserror::Error;

/// Core errors for parameter layouts and buffers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// A named region was requested that the layout does not declare.
    #[error("Unknown region '{name}' in layout [{available}]")]
    UnknownRegion { name: String, available: String },

    /// Two regions with the same name were declared.
    #[error("Region '{name}' declared twice")]
    DuplicateRegion { name: String },

    /// A buffer does not have the size the layout requires.
    #[error("Buffer size mismatch: expected {expected}, got {got}")]
    SizeMismatch { expected: usize, got: usize },

    /// A region was viewed with the wrong dimensionality.
    #[error("Region '{name}' has shape {rows}x{cols}, cannot view as {requested}")]
    ShapeMismatch {
        name: String,
        rows: usize,
        cols: usize,
        requested: &'static str,
    },

    /// A store handle from a different arena was used.
    #[error("Unknown store {id} (arena holds {count} stores)")]
    UnknownStore { id: usize, count: usize },

    /// The worker pool could not be created.
    #[error("Cannot build worker pool: {reason}")]
    PoolError { reason: String },
}
