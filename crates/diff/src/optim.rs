//! # Optimization
//!
//! Drivers that call [`Trainer::compute_cost_and_grad`] and own the update
//! rule.
//!
//! ## Optimizers
//!
//! - [`Sgd`]: full-batch gradient descent with an adaptive step
//! - [`AdaGrad`]: minibatch AdaGrad with an optional L1 soft threshold
//!
//! ## Example
//!
//! ```rust
//! use rae_diff::optim::{AdaGrad, AdaGradConfig};
//!
//! let config = AdaGradConfig { iterations: 5, ..AdaGradConfig::default() };
//! let adagrad = AdaGrad::new(config);
//! assert_eq!(adagrad.config().batches, 100);
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rae_core::{Real, Theta};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::TrainError;
use crate::model::Objective;
use crate::trainer::Trainer;

/// Settings for [`Sgd`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SgdConfig {
    pub eta: Real,
    pub iterations: usize,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            eta: 0.2,
            iterations: 250,
        }
    }
}

/// Halve the step after an increase of the error, grow it by 5% otherwise.
pub fn adapt_eta(eta: Real, previous: Real, current: Real) -> Real {
    if current > previous {
        eta * 0.5
    } else {
        eta * 1.05
    }
}

/// Full-batch gradient descent: `θ = θ − η ∇J`.
#[derive(Debug, Clone)]
pub struct Sgd {
    config: SgdConfig,
    eta: Real,
    grad: Vec<Real>,
}

impl Sgd {
    pub fn new(config: SgdConfig) -> Self {
        Self {
            config,
            eta: config.eta,
            grad: Vec::new(),
        }
    }

    /// Current step size.
    pub fn eta(&self) -> Real {
        self.eta
    }

    /// Run all iterations over the whole corpus. Returns the error of every
    /// iteration.
    pub fn run(
        &mut self,
        trainer: &mut Trainer,
        objective: &mut Objective,
        theta: &mut Theta,
    ) -> Result<Vec<Real>, TrainError> {
        let size = objective.corpus_len();
        objective.set_window(0, size)?;
        self.grad.resize(theta.len(), 0.0);

        let mut previous = Real::MAX;
        let mut history = Vec::with_capacity(self.config.iterations);
        for iteration in 0..self.config.iterations {
            let mut error = 0.0;
            trainer.compute_cost_and_grad(objective, theta, &mut self.grad, iteration, &mut error)?;
            for (t, g) in theta.as_mut_slice().iter_mut().zip(&self.grad) {
                *t -= self.eta * g;
            }
            info!(iteration, error, eta = self.eta, "SGD iteration");
            self.eta = adapt_eta(self.eta, previous, error);
            previous = error;
            history.push(error);
        }
        Ok(history)
    }
}

/// When the noise stride is redrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseResample {
    /// Once per pass over the corpus.
    #[default]
    Epoch,
    Minibatch,
}

/// Settings for [`AdaGrad`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaGradConfig {
    pub eta: Real,
    pub iterations: usize,
    /// Requested minibatches per epoch.
    pub batches: usize,
    /// L1 weight; `0.0` disables the soft threshold.
    pub l1: Real,
    pub noise_resample: NoiseResample,
    pub seed: u64,
}

impl Default for AdaGradConfig {
    fn default() -> Self {
        Self {
            eta: 0.01,
            iterations: 100,
            batches: 100,
            l1: 0.0,
            noise_resample: NoiseResample::Epoch,
            seed: 42,
        }
    }
}

/// Minibatch windows for a corpus of `size` sentences.
///
/// `min(batches, size/2)` batches of `max(size/batches, 2)` sentences; the
/// last window extends to the end of the corpus.
pub fn batch_windows(size: usize, batches: usize) -> Vec<(usize, usize)> {
    if size == 0 {
        return Vec::new();
    }
    let num_batches = batches.min(size / 2).max(1);
    let batchsize = (size / num_batches).max(2);
    (0..num_batches)
        .map(|b| {
            let from = (b * batchsize).min(size);
            let to = if b + 1 == num_batches {
                size
            } else {
                ((b + 1) * batchsize).min(size)
            };
            (from, to)
        })
        .filter(|(from, to)| from < to)
        .collect()
}

/// Minibatch AdaGrad over the primary model's corpus.
#[derive(Debug, Clone)]
pub struct AdaGrad {
    config: AdaGradConfig,
    history: Vec<Real>,
    grad: Vec<Real>,
    rng: StdRng,
}

impl AdaGrad {
    pub fn new(config: AdaGradConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
            grad: Vec::new(),
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    pub fn config(&self) -> &AdaGradConfig {
        &self.config
    }

    /// Sum of squared gradients per coordinate.
    pub fn history(&self) -> &[Real] {
        &self.history
    }

    /// One update: `θ = θ − η/√G · g`, then the L1 soft threshold
    /// `η/√G · l1_batch`. Coordinates that never saw a gradient are left
    /// alone.
    pub fn step(&mut self, theta: &mut [Real], grad: &[Real], l1_batch: Real) {
        if self.history.len() != theta.len() {
            self.history = vec![0.0; theta.len()];
        }
        let eta = self.config.eta;
        for ((t, &g), h) in theta.iter_mut().zip(grad).zip(self.history.iter_mut()) {
            *h += g * g;
            if *h <= 1e-16 {
                continue;
            }
            let rate = eta / h.sqrt();
            let update = *t - rate * g;
            *t = if l1_batch > 0.0 {
                update.signum() * (update.abs() - rate * l1_batch).max(0.0)
            } else {
                update
            };
        }
    }

    fn draw_offset(&mut self, batchsize: usize) -> usize {
        if batchsize < 2 {
            1
        } else {
            self.rng.gen_range(1..batchsize)
        }
    }

    /// Run all iterations. Returns the summed minibatch error per epoch.
    pub fn run(
        &mut self,
        trainer: &mut Trainer,
        objective: &mut Objective,
        theta: &mut Theta,
    ) -> Result<Vec<Real>, TrainError> {
        let size = objective.corpus_len();
        let windows = batch_windows(size, self.config.batches);
        let batchsize = windows.first().map_or(0, |&(from, to)| to - from);
        let lambdas = objective.primary().lambdas;
        self.grad.resize(theta.len(), 0.0);
        info!(batches = windows.len(), batchsize, eta = self.config.eta, "Training with AdaGrad");

        let mut epochs = Vec::with_capacity(self.config.iterations);
        for iteration in 0..self.config.iterations {
            if self.config.noise_resample == NoiseResample::Epoch {
                let offset = self.draw_offset(batchsize);
                objective.primary_mut().noise.noise_sample_offset = offset;
            }
            let mut epoch_error = 0.0;
            for &(from, to) in &windows {
                if self.config.noise_resample == NoiseResample::Minibatch {
                    let offset = self.draw_offset(batchsize);
                    objective.primary_mut().noise.noise_sample_offset = offset;
                }
                let fraction = (to - from) as Real / size as Real;
                objective.set_window(from, to)?;
                objective.primary_mut().lambdas = lambdas.scaled(fraction);

                let mut error = 0.0;
                trainer.compute_cost_and_grad(objective, theta, &mut self.grad, iteration, &mut error)?;
                let grad = std::mem::take(&mut self.grad);
                self.step(theta.as_mut_slice(), &grad, self.config.l1 * fraction);
                self.grad = grad;

                debug!(from, to, error, "AdaGrad minibatch");
                epoch_error += error;
            }
            info!(iteration, error = epoch_error, eta = self.config.eta, "AdaGrad epoch");
            epochs.push(epoch_error);
        }

        objective.primary_mut().lambdas = lambdas;
        objective.set_window(0, size)?;
        Ok(epochs)
    }
}
