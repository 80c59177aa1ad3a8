//! # Core - Parameter Arena and Parallel Reduction
//!
//! This crate provides the foundations the propagation engine is built on:
//!
//! - **Layouts**: declarative, ordered lists of named parameter regions
//! - **Stores**: a layout plus its buffer, relocated into one global [`Theta`]
//! - **Views**: bounds-checked row-major matrix views over regions
//! - **Parallel**: strided minibatch shards and an ordered fan-in reduction
//! - **Errors**: layout and buffer failures, detected at setup time
//!
//! ## Example
//!
//! ```rust
//! use rae_core::{Layout, ParamStore, Theta};
//!
//! let layout = Layout::builder()
//!     .matrix("Wl", 1, 4)
//!     .vector("Bl", 1)
//!     .build()
//!     .unwrap();
//! let mut store = ParamStore::zeros(layout);
//! store.fill_region("Bl", || 0.5).unwrap();
//!
//! let mut theta = Theta::new();
//! let id = theta.adopt(store);
//! assert_eq!(theta.store(id).unwrap().vector("Bl").unwrap(), &[0.5]);
//! ```

pub mod error;
pub mod layout;
pub mod parallel;
pub mod store;
pub mod view;

/// Scalar type for parameters, gradients and errors.
pub type Real = f64;

// Re-export key types at crate root for convenience
pub use error::CoreError;
pub use layout::{Layout, LayoutBuilder, Region, RegionSpec, RegionsMut};
pub use parallel::{strided, Accumulate, Combiner, OrderedSum, ShardPool};
pub use store::{ParamStore, Segment, StoreId, StoreView, StoreViewMut, Theta};
pub use view::{MatrixMut, MatrixRef};
