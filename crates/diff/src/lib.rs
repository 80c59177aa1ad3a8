//! # Diff - Tree Propagation and Joint Gradient Computation
//!
//! This crate trains sentence vectors by composing word embeddings over
//! binary parse trees, and aligns two such models through a noise-contrastive
//! hinge loss.
//!
//! ## Core Concepts
//!
//! - **Trees are parallel arrays**: children always carry larger indices
//!   than their parent, so one reverse sweep is a bottom-up pass
//! - **Parameters live in one arena**: every model's stores are relocated
//!   into a single [`rae_core::Theta`]; gradient buffers share its layout
//! - **Shards own their state**: a minibatch is striped over shards, each
//!   with its own propagators and partial gradients, reduced in shard order
//!
//! ## Modules
//!
//! - [`config`]: model variants, error-term switches, lambdas and noise settings
//! - [`model`]: models, bi-models, layouts and parameter views
//! - [`propagator`]: per-sentence working state and feature vectors
//! - `forward` / `backward`: composition, label, reconstruction and unfolding passes
//! - [`collector`]: per-shard gradient accumulation
//! - [`trainer`]: the cost-and-gradient orchestrator
//! - [`gradcheck`]: finite-difference verification
//! - [`optim`]: SGD and AdaGrad drivers
//! - [`eval`]: label accuracy and paraphrase retrieval
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rae_core::Theta;
//! use rae_diff::{Model, ModelConfig, Objective, Trainer, TrainerConfig};
//! use rae_nlp::{Corpus, Sentence};
//!
//! let corpus = Arc::new(Corpus::new(vec![
//!     Sentence::flat(&[1, 2]).unwrap().with_label(1),
//!     Sentence::flat(&[3]).unwrap(),
//! ]));
//! let config = ModelConfig { calc_lbl: true, word_width: 4, ..ModelConfig::default() };
//!
//! let mut theta = Theta::new();
//! let model = Model::new(config, corpus, 4, &mut theta, 7).unwrap();
//! let objective = Objective::Single(model);
//!
//! let mut trainer = Trainer::new(TrainerConfig::default()).unwrap();
//! let mut grad = theta.zeros_like();
//! let mut error = 0.0;
//! trainer
//!     .compute_cost_and_grad(&objective, &mut theta, &mut grad, 0, &mut error)
//!     .unwrap();
//! assert!(error > 0.0);
//! ```

pub mod backward;
pub mod collector;
pub mod config;
pub mod error;
pub mod eval;
mod forward;
pub mod gradcheck;
pub mod model;
pub mod optim;
pub mod propagator;
pub mod trainer;

// Re-export key types
pub use backward::ErrorTerms;
pub use collector::{ClassificationStats, GradientCollector, ModelContext};
pub use config::{Lambdas, ModelConfig, NoiseConfig, Trainable, TrainerConfig, Variant};
pub use error::TrainError;
pub use eval::{paraphrase_test, test_model};
pub use gradcheck::{finite_grad_check, finite_grad_check_strided, GradCheckError, GradCheckReport};
pub use model::{BiModel, Model, ModelParams, Objective};
pub use optim::{AdaGrad, AdaGradConfig, NoiseResample, Sgd, SgdConfig};
pub use propagator::{DynamicMode, Propagator};
pub use trainer::{hinge, noise_index, Trainer};
