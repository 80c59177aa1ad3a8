//! # Gradient Collector
//!
//! A [`GradientCollector`] owns one propagator and one gradient buffer laid
//! out like its model's weight store. Dictionary gradients are not owned
//! here: the caller passes the slot for the model's dictionary store on
//! every call, so two models sharing a dictionary write into the same
//! memory.
//!
//! Every `back_propagate_*` call loads the sentence afresh, forwards it and
//! adds the propagator's error terms to the collector's running error.

use rae_core::{Accumulate, Layout, MatrixMut, Real, Theta};
use rae_nlp::Sentence;

use crate::backward::ErrorTerms;
use crate::error::TrainError;
use crate::model::{Model, ModelParams, WeightGrads};
use crate::propagator::Propagator;

/// A model resolved against one parameter arena.
#[derive(Debug, Clone, Copy)]
pub struct ModelContext<'a> {
    pub model: &'a Model,
    pub params: ModelParams<'a>,
    pub weight_layout: &'a Layout,
}

impl<'a> ModelContext<'a> {
    pub fn new(model: &'a Model, theta: &'a Theta) -> Result<Self, TrainError> {
        Ok(Self {
            model,
            params: model.params(theta)?,
            weight_layout: theta.segment(model.weights)?.layout(),
        })
    }

    pub fn sentence(&self, j: usize) -> &'a Sentence {
        &self.model.corpus[j]
    }

    fn dictionary<'d>(&self, slot: &'d mut [Real]) -> MatrixMut<'d> {
        MatrixMut::new(slot, self.model.dict_size, self.params.width())
    }
}

/// Label accuracy over processed sentences.
///
/// `confusion[label * classes + predicted]` counts root decisions; one
/// sigmoid output is treated as two classes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationStats {
    pub sentences: usize,
    pub correct_sentences: usize,
    pub labelled_nodes: usize,
    pub correct_nodes: usize,
    pub classes: usize,
    pub confusion: Vec<usize>,
}

impl ClassificationStats {
    pub fn new(label_classes: usize) -> Self {
        let classes = label_classes.max(2);
        Self {
            classes,
            confusion: vec![0; classes * classes],
            ..Self::default()
        }
    }

    /// Record one labelled sentence.
    pub fn record(&mut self, label: usize, propagator: &Propagator, correct: bool) {
        self.sentences += 1;
        self.correct_sentences += usize::from(correct);
        self.labelled_nodes += propagator.class_correct() + propagator.class_wrong();
        self.correct_nodes += propagator.class_correct();
        if let Some(predicted) = propagator.root_class() {
            if label < self.classes && predicted < self.classes {
                self.confusion[label * self.classes + predicted] += 1;
            }
        }
    }

    /// Fraction of sentences whose majority vote was correct.
    pub fn accuracy(&self) -> Real {
        if self.sentences == 0 {
            0.0
        } else {
            self.correct_sentences as Real / self.sentences as Real
        }
    }

    pub fn node_accuracy(&self) -> Real {
        if self.labelled_nodes == 0 {
            0.0
        } else {
            self.correct_nodes as Real / self.labelled_nodes as Real
        }
    }
}

impl Accumulate for ClassificationStats {
    fn accumulate(&mut self, other: &Self) {
        self.sentences += other.sentences;
        self.correct_sentences += other.correct_sentences;
        self.labelled_nodes += other.labelled_nodes;
        self.correct_nodes += other.correct_nodes;
        if self.confusion.is_empty() {
            self.classes = other.classes;
            self.confusion = other.confusion.clone();
        } else if self.classes == other.classes {
            for (c, o) in self.confusion.iter_mut().zip(&other.confusion) {
                *c += o;
            }
        }
    }
}

impl std::fmt::Display for ClassificationStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} sentences correct ({:.2}%), {}/{} nodes",
            self.correct_sentences,
            self.sentences,
            100.0 * self.accuracy(),
            self.correct_nodes,
            self.labelled_nodes
        )
    }
}

/// Per-model gradient accumulation for one shard.
#[derive(Debug, Clone)]
pub struct GradientCollector {
    propagator: Propagator,
    weights: Vec<Real>,
    error: Real,
    stats: ClassificationStats,
    /// Sentence forwarded by the last call and not yet backpropagated.
    fresh: Option<usize>,
}

impl GradientCollector {
    pub fn new(model: &Model) -> Result<Self, TrainError> {
        let config = &model.config;
        let layout = config
            .variant
            .weight_layout(config.word_width, config.label_classes)?;
        Ok(Self {
            propagator: Propagator::for_model(model),
            weights: vec![0.0; layout.size()],
            error: 0.0,
            stats: ClassificationStats::new(config.label_classes),
            fresh: None,
        })
    }

    /// Zero the gradient buffer, error and statistics.
    pub fn reset(&mut self) {
        self.weights.fill(0.0);
        self.error = 0.0;
        let classes = self.stats.classes;
        self.stats = ClassificationStats {
            classes,
            confusion: vec![0; classes * classes],
            ..ClassificationStats::default()
        };
        self.fresh = None;
    }

    /// Weight gradients accumulated since the last reset, laid out like the
    /// model's weight store.
    pub fn dump_weights(&self) -> &[Real] {
        &self.weights
    }

    pub fn error(&self) -> Real {
        self.error
    }

    pub fn add_error(&mut self, error: Real) {
        self.error += error;
    }

    pub fn stats(&self) -> &ClassificationStats {
        &self.stats
    }

    pub fn propagator(&self) -> &Propagator {
        &self.propagator
    }

    /// Forward sentence `j` and copy its root into `root_out`.
    pub fn forward_propagate(&mut self, ctx: &ModelContext<'_>, j: usize, root_out: &mut [Real]) {
        self.forward(ctx, j, false);
        root_out.copy_from_slice(self.propagator.root());
        self.fresh = Some(j);
    }

    fn forward(&mut self, ctx: &ModelContext<'_>, j: usize, autoencode: bool) {
        let sentence = ctx.sentence(j);
        self.propagator.load_with_sentence(sentence);
        self.propagator.forward_propagate(sentence, &ctx.params, autoencode);
    }

    fn backward(
        &mut self,
        ctx: &ModelContext<'_>,
        dict: &mut [Real],
        j: usize,
        terms: ErrorTerms<'_>,
    ) -> Result<bool, TrainError> {
        let mut grads = WeightGrads::bind(ctx.model.config.variant, ctx.weight_layout, &mut self.weights)?;
        let mut dict = ctx.dictionary(dict);
        let correct = self.propagator.back_propagate(
            ctx.sentence(j),
            &ctx.params,
            &mut grads,
            &mut dict,
            terms,
        );
        let p = &self.propagator;
        self.error += p.lbl_error() + p.rae_error() + p.bi_error();
        self.fresh = None;
        Ok(correct)
    }

    /// Label term of sentence `j`.
    pub fn back_propagate_lbl(
        &mut self,
        ctx: &ModelContext<'_>,
        dict: &mut [Real],
        j: usize,
    ) -> Result<bool, TrainError> {
        self.forward(ctx, j, false);
        let terms = ErrorTerms {
            lbl: true,
            word: ctx.model.bools.d,
            ..ErrorTerms::default()
        };
        let correct = self.backward(ctx, dict, j, terms)?;
        self.stats.record(ctx.sentence(j).label, &self.propagator, correct);
        Ok(correct)
    }

    /// Reconstruction term of sentence `j`.
    pub fn back_propagate_rae(
        &mut self,
        ctx: &ModelContext<'_>,
        dict: &mut [Real],
        j: usize,
    ) -> Result<(), TrainError> {
        self.forward(ctx, j, true);
        let terms = ErrorTerms {
            rae: true,
            word: ctx.model.bools.d,
            ..ErrorTerms::default()
        };
        self.backward(ctx, dict, j, terms).map(|_| ())
    }

    /// Unfolding term of sentence `j`, at every internal node.
    pub fn back_propagate_unf(
        &mut self,
        ctx: &ModelContext<'_>,
        dict: &mut [Real],
        j: usize,
    ) -> Result<(), TrainError> {
        self.forward(ctx, j, false);
        let terms = ErrorTerms {
            unf: true,
            word: ctx.model.bools.d,
            ..ErrorTerms::default()
        };
        self.backward(ctx, dict, j, terms).map(|_| ())
    }

    /// Bi-distance term between sentence `j`'s root and `other`. The root
    /// is written to `root_out`.
    pub fn back_propagate_bi(
        &mut self,
        ctx: &ModelContext<'_>,
        dict: &mut [Real],
        j: usize,
        root_out: &mut [Real],
        other: &[Real],
    ) -> Result<(), TrainError> {
        self.forward(ctx, j, false);
        root_out.copy_from_slice(self.propagator.root());
        let terms = ErrorTerms {
            bi: Some(other),
            word: ctx.model.bools.d,
            ..ErrorTerms::default()
        };
        self.backward(ctx, dict, j, terms).map(|_| ())
    }

    /// Backpropagate an externally computed root gradient for sentence `j`.
    /// Reuses the last forward pass when it was for `j` and nothing has been
    /// backpropagated since.
    pub fn back_propagate_given(
        &mut self,
        ctx: &ModelContext<'_>,
        dict: &mut [Real],
        j: usize,
        gradient: &[Real],
    ) -> Result<(), TrainError> {
        if self.fresh != Some(j) {
            self.forward(ctx, j, false);
        }
        self.propagator.set_root_delta(gradient);
        let terms = ErrorTerms {
            word: ctx.model.bools.d,
            ..ErrorTerms::default()
        };
        self.backward(ctx, dict, j, terms).map(|_| ())
    }

    /// Unfold `encoding` through sentence `j`'s tree and write the gradient
    /// of the unfolding error with respect to `encoding` to `grad_out`.
    #[cfg(feature = "throughprop")]
    pub fn unfold_propagate_given(
        &mut self,
        ctx: &ModelContext<'_>,
        dict: &mut [Real],
        j: usize,
        encoding: &[Real],
        grad_out: &mut [Real],
    ) -> Result<(), TrainError> {
        let sentence = ctx.sentence(j);
        self.propagator.load_with_sentence(sentence);
        self.propagator.set_root(encoding);

        let mut grads = WeightGrads::bind(ctx.model.config.variant, ctx.weight_layout, &mut self.weights)?;
        let mut dict = ctx.dictionary(dict);
        self.propagator
            .unfold_from_here(sentence, 0, &ctx.params, &mut grads, &mut dict, ctx.model.bools.d);
        grad_out.copy_from_slice(self.propagator.delta(0));
        self.error += self.propagator.rae_error();
        self.fresh = None;
        Ok(())
    }
}
