//! # Configuration
//!
//! Serde-backed settings for models and training. Every struct has a
//! `Default` that reproduces the usual command-line defaults, and every field
//! may be omitted from JSON.
//!
//! ```rust
//! use rae_diff::config::{ModelConfig, Variant};
//!
//! let config = ModelConfig::from_json(r#"{ "variant": "recursive", "calc_uae": true }"#).unwrap();
//! assert_eq!(config.variant, Variant::Recursive);
//! assert_eq!(config.word_width, 10);
//! ```

use rae_core::Real;
use serde::{Deserialize, Serialize};

use crate::error::TrainError;

/// Composition function used to build node encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Node encoding is the sum of its children; root = sum of leaves.
    #[default]
    Additive,
    /// Like `Additive` over leaves scaled by `1/leaves`; root = mean.
    AdditiveAvg,
    /// `tanh` of adjacent word pairs, summed at the root.
    FlatTree,
    /// `tanh(W [l; r] + B)` with a `tanh(Wd x + Bd)` decoder.
    Recursive,
}

impl Variant {
    /// Does the variant carry a decoder (reconstruction and unfolding)?
    pub fn has_decoder(&self) -> bool {
        matches!(self, Variant::Recursive)
    }

    /// Can `unfold_from_here` run on this variant?
    pub fn has_unfolding(&self) -> bool {
        self.has_decoder()
    }

    /// Are labels applied at every node, or at the root only?
    pub fn labels_subtrees(&self) -> bool {
        matches!(self, Variant::Recursive)
    }
}

/// Per-model settings: architecture and the error terms to train.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub variant: Variant,
    /// Embedding and node-encoding width.
    pub word_width: usize,
    /// Number of sigmoid outputs of the label classifier.
    pub label_classes: usize,
    /// Margin of the noise-contrastive hinge.
    pub hinge_margin: Real,
    /// Weight of label and bi-distance terms.
    pub alpha_lbl: Real,
    /// Weight of reconstruction and unfolding terms.
    pub alpha_rae: Real,
    /// Label weight for internal nodes when subtrees are labelled.
    pub beta: Real,
    pub calc_lbl: bool,
    pub calc_rae: bool,
    pub calc_uae: bool,
    pub calc_bi: bool,
    pub calc_through: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            variant: Variant::Additive,
            word_width: 10,
            label_classes: 1,
            hinge_margin: 1.0,
            alpha_lbl: 1.0,
            alpha_rae: 1.0,
            beta: 0.5,
            calc_lbl: false,
            calc_rae: false,
            calc_uae: false,
            calc_bi: false,
            calc_through: false,
        }
    }
}

impl ModelConfig {
    pub fn from_json(text: &str) -> Result<Self, TrainError> {
        let config: ModelConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the variant cannot compute.
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.word_width == 0 {
            return Err(TrainError::config("word_width must be positive"));
        }
        if self.label_classes == 0 {
            return Err(TrainError::config("label_classes must be positive"));
        }
        if self.calc_rae && !self.variant.has_decoder() {
            return Err(TrainError::config(format!(
                "{:?} has no decoder, cannot compute reconstruction error",
                self.variant
            )));
        }
        if self.calc_uae && !self.variant.has_unfolding() {
            return Err(TrainError::config(format!(
                "{:?} does not support unfolding",
                self.variant
            )));
        }
        if self.calc_through && !cfg!(feature = "throughprop") {
            return Err(TrainError::config(
                "calc_through requires the `throughprop` feature",
            ));
        }
        Ok(())
    }
}

/// L2 weights per parameter group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lambdas {
    pub d: Real,
    pub w: Real,
    pub b: Real,
    pub wd: Real,
    pub bd: Real,
    pub wl: Real,
    pub bl: Real,
}

impl Default for Lambdas {
    fn default() -> Self {
        Self::uniform(1.0)
    }
}

impl Lambdas {
    pub fn uniform(value: Real) -> Self {
        Self {
            d: value,
            w: value,
            b: value,
            wd: value,
            bd: value,
            wl: value,
            bl: value,
        }
    }

    /// Every weight multiplied by `factor`.
    pub fn scaled(&self, factor: Real) -> Self {
        Self {
            d: self.d * factor,
            w: self.w * factor,
            b: self.b * factor,
            wd: self.wd * factor,
            bd: self.bd * factor,
            wl: self.wl * factor,
            bl: self.bl * factor,
        }
    }
}

/// Which parameter groups receive gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Trainable {
    pub d: bool,
    pub w: bool,
    pub b: bool,
    pub wd: bool,
    pub bd: bool,
    pub wl: bool,
    pub bl: bool,
}

impl Default for Trainable {
    fn default() -> Self {
        Self {
            d: true,
            w: true,
            b: true,
            wd: true,
            bd: true,
            wl: true,
            bl: true,
        }
    }
}

/// Negative sampling for the bi-alignment hinge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Scale of every hinge gradient.
    pub gamma: Real,
    pub num_noise_samples: usize,
    /// Stride between noise candidates inside the minibatch.
    pub noise_sample_offset: usize,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            gamma: 0.1,
            num_noise_samples: 2,
            noise_sample_offset: 1,
        }
    }
}

/// Parallelism and regularization of the cost-and-gradient computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Worker threads (`0` lets rayon decide).
    pub threads: usize,
    /// Logical shards; results depend on this, never on `threads`.
    pub shards: usize,
    pub calc_l2: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            shards: 4,
            calc_l2: true,
        }
    }
}

impl TrainerConfig {
    pub fn from_json(text: &str) -> Result<Self, TrainError> {
        let config: TrainerConfig = serde_json::from_str(text)?;
        if config.shards == 0 {
            return Err(TrainError::config("shards must be positive"));
        }
        Ok(config)
    }
}
