//! # Cost and Gradient
//!
//! [`Trainer::compute_cost_and_grad`] is the one entry point optimizers use.
//! It evaluates the objective over the current minibatch window of the
//! primary model and leaves the full gradient in the caller's buffer.
//!
//! ## Joint objective, per sentence `j`
//!
//! ```text
//!   label / reconstruction / unfolding terms of A and B
//!   A→B:  rootB = B(j)
//!         ½‖A(j) − B(j)‖²                           (bi distance)
//!         for each noise sentence k ≠ j in the window:
//!             h = margin + ½‖A − B‖² − ½‖A − B(k)‖²
//!             h > 0 ⇒ error += γh, push B(k) away from A
//!         pull A towards B, B towards A
//!   B→A:  the same with roles swapped
//! ```
//!
//! Noise sentences are picked by a rotating stride through the window
//! (`noise_sample_offset`), never at random inside a call.
//!
//! ## Shards
//!
//! The window is striped over `shards` logical shards. Each shard owns its
//! collectors and dictionary-gradient slots for the whole run; partials are
//! summed into the caller's buffer in shard order afterwards, so results
//! depend on the shard count and never on the number of threads.
//!
//! ## Documents
//!
//! With a document pair attached, every sentence root is written into the
//! document models' dictionaries once the parallel section is over. On the
//! last window of an epoch the joint objective recurses over the documents;
//! the document dictionary gradient it leaves behind is fed back into the
//! sentence roots on subsequent calls.

use rae_core::view::axpy;
use rae_core::{strided, Accumulate, Combiner, OrderedSum, Real, ShardPool, StoreId, Theta};
use tracing::{debug, warn};

use crate::collector::{ClassificationStats, GradientCollector, ModelContext};
use crate::config::TrainerConfig;
use crate::error::TrainError;
use crate::model::{BiModel, Model, Objective, D};

/// `margin + ½‖a − b‖² − ½‖a − noise‖²`; positive means the hinge fires.
pub fn hinge(margin: Real, a: &[Real], b: &[Real], noise: &[Real]) -> Real {
    let mut pair = 0.0;
    let mut apart = 0.0;
    for ((&x, &y), &n) in a.iter().zip(b).zip(noise) {
        pair += (x - y) * (x - y);
        apart += (x - n) * (x - n);
    }
    margin + 0.5 * pair - 0.5 * apart
}

/// Window position of the `n`-th noise sample for position `pos`.
///
/// Never returns `pos` itself.
///
/// # Panics
///
/// Panics if the window holds fewer than two sentences.
pub fn noise_index(pos: usize, from: usize, to: usize, offset: usize, n: usize) -> usize {
    let m = to - from;
    assert!(m >= 2, "Noise sampling needs a window of at least two sentences");
    let stride = offset.wrapping_mul(n + 1) % (m - 1);
    (pos - from + 1 + stride) % m + from
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

impl Side {
    fn other(self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Dictionary-gradient slots of one shard; `b` is `None` when both models
/// share one dictionary.
#[derive(Debug)]
struct DictSlots {
    a: Vec<Real>,
    b: Option<Vec<Real>>,
}

impl DictSlots {
    fn get(&mut self, side: Side) -> &mut [Real] {
        match (side, self.b.as_mut()) {
            (Side::B, Some(b)) => b.as_mut_slice(),
            _ => self.a.as_mut_slice(),
        }
    }

    fn reset(&mut self) {
        self.a.fill(0.0);
        if let Some(b) = self.b.as_mut() {
            b.fill(0.0);
        }
    }
}

/// Document dictionary gradients from the last document pass.
#[derive(Debug, Default)]
struct DocFeedback {
    a: Vec<Real>,
    b: Vec<Real>,
}

impl DocFeedback {
    fn side(&self, side: Side) -> &[Real] {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }
}

/// Settings shared by every shard of one joint pass.
#[derive(Debug, Clone, Copy)]
struct AlignSettings<'s> {
    margin: Real,
    gamma: Real,
    samples: usize,
    offset: usize,
    from: usize,
    to: usize,
    iteration: usize,
    documents: bool,
    indexes: &'s [usize],
    feedback: Option<&'s DocFeedback>,
}

fn local_terms(
    collector: &mut GradientCollector,
    ctx: &ModelContext<'_>,
    dict: &mut [Real],
    j: usize,
) -> Result<(), TrainError> {
    let config = &ctx.model.config;
    if config.calc_lbl {
        collector.back_propagate_lbl(ctx, dict, j)?;
    }
    if config.calc_rae {
        collector.back_propagate_rae(ctx, dict, j)?;
    }
    if config.calc_uae {
        collector.back_propagate_unf(ctx, dict, j)?;
    }
    Ok(())
}

/// Add a collector's weight gradients for trainable regions into `grad`.
fn reduce_weights(
    model: &Model,
    theta: &Theta,
    grad: &mut [Real],
    part: &[Real],
) -> Result<(), TrainError> {
    let mut target = theta.view_in_mut(model.weights, grad)?;
    let layout = target.layout();
    let target = target.as_mut_slice();
    for region in layout.regions().filter(|r| model.trains(r.name)) {
        let range = region.range();
        axpy(1.0, &part[range.clone()], &mut target[range]);
    }
    Ok(())
}

fn reduce_dictionary(
    model: &Model,
    theta: &Theta,
    grad: &mut [Real],
    part: &[Real],
) -> Result<(), TrainError> {
    if model.trains(D) {
        let mut target = theta.view_in_mut(model.dictionary, grad)?;
        axpy(1.0, part, target.as_mut_slice());
    }
    Ok(())
}

#[derive(Debug)]
struct SingleShard {
    collector: GradientCollector,
    dict: Vec<Real>,
}

#[derive(Debug)]
struct JointShard {
    a: GradientCollector,
    b: GradientCollector,
    slots: DictSlots,
    root_x: Vec<Real>,
    root_y: Vec<Real>,
    noise_root: Vec<Real>,
    combined: Vec<Real>,
    correction: Vec<Real>,
    /// Pending document dictionary writes; values in `write_values`.
    writes: Vec<(Side, usize)>,
    write_values: Vec<Real>,
    hinges: usize,
}

impl JointShard {
    fn new(pair: &BiModel) -> Result<Self, TrainError> {
        let width = pair.a.config.word_width;
        let slot = |m: &Model| vec![0.0; m.dict_size * width];
        Ok(Self {
            a: GradientCollector::new(&pair.a)?,
            b: GradientCollector::new(&pair.b)?,
            slots: DictSlots {
                a: slot(&pair.a),
                b: (!pair.shares_dictionary()).then(|| slot(&pair.b)),
            },
            root_x: vec![0.0; width],
            root_y: vec![0.0; width],
            noise_root: vec![0.0; width],
            combined: vec![0.0; width],
            correction: vec![0.0; width],
            writes: Vec::new(),
            write_values: Vec::new(),
            hinges: 0,
        })
    }

    fn reset(&mut self) {
        self.a.reset();
        self.b.reset();
        self.slots.reset();
        self.writes.clear();
        self.write_values.clear();
        self.hinges = 0;
    }

    fn sentence(
        &mut self,
        ctx_a: &ModelContext<'_>,
        ctx_b: &ModelContext<'_>,
        settings: &AlignSettings<'_>,
        i: usize,
    ) -> Result<(), TrainError> {
        let j = settings.indexes[i];
        local_terms(&mut self.a, ctx_a, self.slots.get(Side::A), j)?;
        local_terms(&mut self.b, ctx_b, self.slots.get(Side::B), j)?;

        if ctx_a.model.config.calc_bi {
            self.align(Side::A, ctx_a, ctx_b, settings, i)?;
        }
        if ctx_b.model.config.calc_bi {
            self.align(Side::B, ctx_b, ctx_a, settings, i)?;
        }

        #[cfg(feature = "throughprop")]
        {
            if ctx_a.model.config.calc_through {
                self.through(Side::A, ctx_a, ctx_b, j)?;
            }
            if ctx_b.model.config.calc_through {
                self.through(Side::B, ctx_b, ctx_a, j)?;
            }
        }
        Ok(())
    }

    /// One ranking direction: `x` is the anchor, `y` supplies the partner
    /// and the noise sentences.
    fn align(
        &mut self,
        x_side: Side,
        ctx_x: &ModelContext<'_>,
        ctx_y: &ModelContext<'_>,
        s: &AlignSettings<'_>,
        i: usize,
    ) -> Result<(), TrainError> {
        let JointShard {
            a,
            b,
            slots,
            root_x,
            root_y,
            noise_root,
            combined,
            correction,
            writes,
            write_values,
            hinges,
        } = self;
        let (x, y) = match x_side {
            Side::A => (a, b),
            Side::B => (b, a),
        };
        let y_side = x_side.other();
        let j = s.indexes[i];

        y.forward_propagate(ctx_y, j, root_y);
        if s.documents {
            writes.push((y_side, ctx_y.sentence(j).id));
            write_values.extend_from_slice(root_y);
        }

        x.back_propagate_bi(ctx_x, slots.get(x_side), j, root_x, root_y)?;
        y.back_propagate_bi(ctx_y, slots.get(y_side), j, root_y, root_x)?;

        let mut count = 0usize;
        let mut noise_error = 0.0;
        combined.fill(0.0);
        for n in 0..s.samples {
            let k = s.indexes[noise_index(i, s.from, s.to, s.offset, n)];
            y.forward_propagate(ctx_y, k, noise_root);
            let h = hinge(s.margin, root_x, root_y, noise_root);
            if h > 0.0 {
                noise_error += h;
                count += 1;
                axpy(1.0, noise_root, combined);
                for ((c, &rx), &nr) in correction.iter_mut().zip(root_x.iter()).zip(noise_root.iter()) {
                    *c = s.gamma * (rx - nr);
                }
                y.back_propagate_given(ctx_y, slots.get(y_side), k, correction)?;
            }
        }
        *hinges += count;

        if count > 0 || (s.documents && s.iteration > 0) {
            x.add_error(0.5 * s.gamma * noise_error);
            y.add_error(0.5 * s.gamma * noise_error);

            let scale = count as Real;
            for ((c, &cn), &ry) in correction.iter_mut().zip(combined.iter()).zip(root_y.iter()) {
                *c = s.gamma * (cn - scale * ry);
            }
            if s.documents && s.iteration > 0 {
                if let Some(feedback) = s.feedback {
                    let rows = feedback.side(x_side);
                    let w = correction.len();
                    let row = ctx_x.sentence(j).id;
                    if rows.len() >= (row + 1) * w {
                        axpy(1.0, &rows[row * w..(row + 1) * w], correction);
                    }
                }
            }
            x.back_propagate_given(ctx_x, slots.get(x_side), j, correction)?;

            for ((c, &ry), &rx) in correction.iter_mut().zip(root_y.iter()).zip(root_x.iter()) {
                *c = s.gamma * scale * (ry - rx);
            }
            y.back_propagate_given(ctx_y, slots.get(y_side), j, correction)?;
        }
        Ok(())
    }

    /// Unfold `x`'s root through `y`'s tree of the same sentence.
    #[cfg(feature = "throughprop")]
    fn through(
        &mut self,
        x_side: Side,
        ctx_x: &ModelContext<'_>,
        ctx_y: &ModelContext<'_>,
        j: usize,
    ) -> Result<(), TrainError> {
        let JointShard {
            a,
            b,
            slots,
            root_x,
            correction,
            ..
        } = self;
        let (x, y) = match x_side {
            Side::A => (a, b),
            Side::B => (b, a),
        };
        x.forward_propagate(ctx_x, j, root_x);
        y.unfold_propagate_given(ctx_y, slots.get(x_side.other()), j, root_x, correction)?;
        x.back_propagate_given(ctx_x, slots.get(x_side), j, correction)
    }

    /// Sum this shard's gradient partials into `grad`.
    fn reduce_into(&self, pair: &BiModel, theta: &Theta, grad: &mut [Real]) -> Result<(), TrainError> {
        reduce_weights(&pair.a, theta, grad, self.a.dump_weights())?;
        reduce_weights(&pair.b, theta, grad, self.b.dump_weights())?;
        reduce_dictionary(&pair.a, theta, grad, &self.slots.a)?;
        if let Some(b) = &self.slots.b {
            reduce_dictionary(&pair.b, theta, grad, b)?;
        }
        Ok(())
    }

    fn error(&self) -> Real {
        self.a.error() + self.b.error()
    }

    fn stats(&self) -> ClassificationStats {
        let mut stats = self.a.stats().clone();
        stats.accumulate(self.b.stats());
        stats
    }
}

/// Shard state of one joint level (sentences, documents, ...).
#[derive(Debug, Default)]
struct Level {
    key: Vec<StoreId>,
    shards: Vec<JointShard>,
    feedback: Option<DocFeedback>,
}

/// Parallel cost-and-gradient computation.
///
/// Working state is built on the first call for an objective and reused
/// afterwards; a different objective (other stores) rebuilds it.
#[derive(Debug)]
pub struct Trainer {
    config: TrainerConfig,
    pool: ShardPool,
    single_key: Vec<StoreId>,
    single: Vec<SingleShard>,
    levels: Vec<Level>,
    last_stats: ClassificationStats,
    last_hinges: usize,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Result<Self, TrainError> {
        if config.shards == 0 {
            return Err(TrainError::config("shards must be positive"));
        }
        Ok(Self {
            config,
            pool: ShardPool::new(config.threads)?,
            single_key: Vec::new(),
            single: Vec::new(),
            levels: Vec::new(),
            last_stats: ClassificationStats::default(),
            last_hinges: 0,
        })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Worker threads actually running shards.
    pub fn threads(&self) -> usize {
        self.pool.threads()
    }

    /// Label statistics of the last call, all models and levels combined.
    pub fn last_stats(&self) -> &ClassificationStats {
        &self.last_stats
    }

    /// Hinge firings in the last call.
    pub fn last_hinges(&self) -> usize {
        self.last_hinges
    }

    /// Cost and gradient of `objective` over the primary model's window.
    ///
    /// `grad` must mirror `theta` and is overwritten. The cost is added to
    /// `error`. `theta` is only written when a document pair is attached
    /// (sentence roots become document-level embeddings).
    pub fn compute_cost_and_grad(
        &mut self,
        objective: &Objective,
        theta: &mut Theta,
        grad: &mut [Real],
        iteration: usize,
        error: &mut Real,
    ) -> Result<(), TrainError> {
        if grad.len() != theta.len() {
            return Err(TrainError::BufferSize {
                expected: theta.len(),
                got: grad.len(),
            });
        }
        grad.fill(0.0);
        self.last_hinges = 0;

        let mut stats = ClassificationStats::default();
        let cost = match objective {
            Objective::Single(model) => self.single_pass(model, theta, grad, &mut stats)?,
            Objective::Joint(pair) => self.joint_pass(0, pair, theta, grad, iteration, &mut stats)?,
        };

        let window = objective.primary().window();
        if !cost.is_finite() {
            warn!(from = window.start, to = window.end, cost, "Non-finite error in minibatch");
        }
        debug!(
            from = window.start,
            to = window.end,
            shards = self.config.shards,
            hinges = self.last_hinges,
            cost,
            "Computed cost and gradient"
        );
        self.last_stats = stats;
        *error += cost;
        Ok(())
    }

    fn single_pass(
        &mut self,
        model: &Model,
        theta: &Theta,
        grad: &mut [Real],
        stats: &mut ClassificationStats,
    ) -> Result<Real, TrainError> {
        let key = vec![model.weights, model.dictionary];
        if self.single_key != key || self.single.len() != self.config.shards {
            self.single = (0..self.config.shards)
                .map(|_| {
                    Ok(SingleShard {
                        collector: GradientCollector::new(model)?,
                        dict: vec![0.0; model.dict_size * model.config.word_width],
                    })
                })
                .collect::<Result<_, TrainError>>()?;
            self.single_key = key;
        }

        let ctx = ModelContext::new(model, theta)?;
        let (from, to) = (model.from, model.to);
        let shards = self.single.len();
        let indexes = &model.indexes;
        let results = self.pool.map_shards(&mut self.single, |s, shard| {
            shard.collector.reset();
            shard.dict.fill(0.0);
            for i in strided(from, to, s, shards) {
                local_terms(&mut shard.collector, &ctx, &mut shard.dict, indexes[i])?;
            }
            Ok::<(), TrainError>(())
        });
        results.into_iter().collect::<Result<Vec<()>, TrainError>>()?;

        for shard in &self.single {
            reduce_weights(model, theta, grad, shard.collector.dump_weights())?;
            reduce_dictionary(model, theta, grad, &shard.dict)?;
        }
        let errors: Vec<Real> = self.single.iter().map(|s| s.collector.error()).collect();
        let mut cost = OrderedSum.combine(errors);
        let partials: Vec<ClassificationStats> =
            self.single.iter().map(|s| s.collector.stats().clone()).collect();
        stats.accumulate(&OrderedSum.combine(partials));
        if self.config.calc_l2 {
            cost += model.add_l2(theta, grad, &model.lambdas, true)?;
        }
        Ok(cost)
    }

    fn prepare_level(&mut self, level: usize, pair: &BiModel) -> Result<(), TrainError> {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, Level::default);
        }
        let key = vec![pair.a.weights, pair.a.dictionary, pair.b.weights, pair.b.dictionary];
        let state = &mut self.levels[level];
        if state.key != key || state.shards.len() != self.config.shards {
            state.shards = (0..self.config.shards)
                .map(|_| JointShard::new(pair))
                .collect::<Result<_, _>>()?;
            state.key = key;
            state.feedback = None;
        }
        Ok(())
    }

    fn joint_pass(
        &mut self,
        level: usize,
        pair: &BiModel,
        theta: &mut Theta,
        grad: &mut [Real],
        iteration: usize,
        stats: &mut ClassificationStats,
    ) -> Result<Real, TrainError> {
        let (a, b) = (&pair.a, &pair.b);
        if a.window() != b.window() {
            return Err(TrainError::config(format!(
                "paired models disagree on the window: {:?} vs {:?}",
                a.window(),
                b.window()
            )));
        }
        pair.check_shared_dictionary()?;
        let (from, to) = (a.from, a.to);
        if (a.config.calc_bi || b.config.calc_bi) && to - from < 2 {
            return Err(TrainError::config(format!(
                "bi-alignment needs at least two sentences per window, got [{}, {})",
                from, to
            )));
        }
        #[cfg(feature = "throughprop")]
        {
            if (a.config.calc_through && !b.config.variant.has_unfolding())
                || (b.config.calc_through && !a.config.variant.has_unfolding())
            {
                return Err(TrainError::config(
                    "throughprop needs a partner model that supports unfolding",
                ));
            }
        }
        self.prepare_level(level, pair)?;

        let mut cost = 0.0;
        {
            let ctx_a = ModelContext::new(a, theta)?;
            let ctx_b = ModelContext::new(b, theta)?;
            let Trainer {
                pool,
                levels,
                last_hinges,
                ..
            } = &mut *self;
            let Level { shards, feedback, .. } = &mut levels[level];
            let settings = AlignSettings {
                margin: a.config.hinge_margin,
                gamma: a.noise.gamma,
                samples: a.noise.num_noise_samples,
                offset: a.noise.noise_sample_offset,
                from,
                to,
                iteration,
                documents: pair.docmod.is_some(),
                indexes: &a.indexes,
                feedback: feedback.as_ref(),
            };
            let count = shards.len();
            let results = pool.map_shards(shards, |s, shard| {
                shard.reset();
                for i in strided(from, to, s, count) {
                    shard.sentence(&ctx_a, &ctx_b, &settings, i)?;
                }
                Ok::<(), TrainError>(())
            });
            results.into_iter().collect::<Result<Vec<()>, TrainError>>()?;

            for shard in shards.iter() {
                shard.reduce_into(pair, theta, grad)?;
            }
            cost += OrderedSum.combine(shards.iter().map(JointShard::error).collect::<Vec<Real>>());
            let partials: Vec<ClassificationStats> = shards.iter().map(JointShard::stats).collect();
            stats.accumulate(&OrderedSum.combine(partials));
            *last_hinges += OrderedSum.combine(shards.iter().map(|s| s.hinges).collect::<Vec<usize>>());
        }

        if self.config.calc_l2 {
            let lambdas = a.lambdas;
            cost += a.add_l2(theta, grad, &lambdas, true)?;
            cost += b.add_l2(theta, grad, &lambdas, !pair.shares_dictionary())?;
        }

        if let Some(docs) = pair.docmod.as_deref() {
            self.write_document_embeddings(level, docs, theta)?;
            if a.is_final_window() {
                debug!(level, documents = docs.a.corpus.len(), "Recursing into documents");
                cost += self.joint_pass(level + 1, docs, theta, grad, 1, stats)?;

                let feedback = self.levels[level].feedback.get_or_insert_with(DocFeedback::default);
                feedback.a.clear();
                feedback.a.extend_from_slice(&grad[theta.segment(docs.a.dictionary)?.range()]);
                feedback.b.clear();
                feedback.b.extend_from_slice(&grad[theta.segment(docs.b.dictionary)?.range()]);
            }
        }
        Ok(cost)
    }

    /// Apply the sentence roots collected by `level`'s shards, in shard order.
    fn write_document_embeddings(
        &self,
        level: usize,
        docs: &BiModel,
        theta: &mut Theta,
    ) -> Result<(), TrainError> {
        let width = docs.a.config.word_width;
        for shard in &self.levels[level].shards {
            for (&(side, row), values) in shard.writes.iter().zip(shard.write_values.chunks(width)) {
                let model = match side {
                    Side::A => &docs.a,
                    Side::B => &docs.b,
                };
                let mut store = theta.store_mut(model.dictionary)?;
                store.matrix_mut(D)?.row_mut(row).copy_from_slice(values);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hinge_boundary() {
        let a = [0.5, -1.0];
        // noise at distance 2 = sqrt(2·margin) with margin 2
        let at = [2.5, -1.0];
        assert_eq!(hinge(2.0, &a, &a, &at), 0.0);
        assert!(hinge(2.0, &a, &a, &[2.4, -1.0]) > 0.0);
        assert!(hinge(2.0, &a, &a, &[2.6, -1.0]) < 0.0);
    }

    #[test]
    fn test_noise_index_never_self() {
        for from in 0..3 {
            for to in from + 2..from + 9 {
                for offset in 0..12 {
                    for n in 0..4 {
                        for pos in from..to {
                            let k = noise_index(pos, from, to, offset, n);
                            assert!(k != pos && (from..to).contains(&k));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_noise_index_rotates_with_offset() {
        assert_eq!(noise_index(0, 0, 5, 1, 0), 2);
        assert_eq!(noise_index(0, 0, 5, 1, 1), 3);
        assert_eq!(noise_index(4, 0, 5, 0, 0), 0);
    }

    #[test]
    #[should_panic(expected = "at least two sentences")]
    fn test_noise_index_needs_two() {
        noise_index(3, 3, 4, 1, 0);
    }

    #[test]
    fn test_dict_slots_share_when_single() {
        let mut shared = DictSlots {
            a: vec![0.0; 2],
            b: None,
        };
        shared.get(Side::B)[0] = 1.0;
        assert_eq!(shared.a, vec![1.0, 0.0]);

        let mut split = DictSlots {
            a: vec![0.0; 2],
            b: Some(vec![0.0; 2]),
        };
        split.get(Side::B)[1] = 1.0;
        assert_eq!(split.a, vec![0.0, 0.0]);
        assert_eq!(split.get(Side::B), &[0.0, 1.0]);
    }

    fn labelled_pass(shards: usize, objective: &Objective, theta: &mut Theta) -> (Real, ClassificationStats) {
        let mut trainer = Trainer::new(TrainerConfig {
            threads: 2,
            shards,
            ..TrainerConfig::default()
        })
        .unwrap();
        let mut grad = theta.zeros_like();
        let mut error = 0.0;
        trainer
            .compute_cost_and_grad(objective, theta, &mut grad, 0, &mut error)
            .unwrap();
        (error, trainer.last_stats().clone())
    }

    #[test]
    fn test_shard_partials_cover_the_window() {
        let sentences = (0..5)
            .map(|i| {
                rae_nlp::Sentence::flat(&[1 + i % 3, 1 + (i + 1) % 3])
                    .unwrap()
                    .with_label(i % 2)
            })
            .collect();
        let config = crate::config::ModelConfig {
            word_width: 3,
            calc_lbl: true,
            ..crate::config::ModelConfig::default()
        };
        let mut theta = Theta::new();
        let corpus = std::sync::Arc::new(rae_nlp::Corpus::new(sentences));
        let objective = Objective::Single(Model::new(config, corpus, 4, &mut theta, 7).unwrap());

        let (one, stats_one) = labelled_pass(1, &objective, &mut theta);
        // more shards than sentences leaves some shards empty
        let (eight, stats_eight) = labelled_pass(8, &objective, &mut theta);
        assert_eq!(stats_one.sentences, 5);
        assert_eq!(stats_one, stats_eight);
        approx::assert_relative_eq!(one, eight, max_relative = 1e-12);
    }

    #[test]
    fn test_buffer_size_checked() {
        let mut trainer = Trainer::new(TrainerConfig::default()).unwrap();
        let mut theta = Theta::new();
        let model = Model::new(
            crate::config::ModelConfig::default(),
            std::sync::Arc::new(rae_nlp::Corpus::new(vec![rae_nlp::Sentence::flat(&[1]).unwrap()])),
            2,
            &mut theta,
            0,
        )
        .unwrap();
        let mut grad = vec![0.0; theta.len() + 1];
        let mut error = 0.0;
        let err = trainer
            .compute_cost_and_grad(&Objective::Single(model), &mut theta, &mut grad, 0, &mut error)
            .unwrap_err();
        assert!(matches!(err, TrainError::BufferSize { .. }));
    }
}
