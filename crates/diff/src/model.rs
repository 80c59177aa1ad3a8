//! # Models and Parameter Views
//!
//! A [`Model`] couples a corpus with two stores inside the global [`Theta`]:
//! its composition/classifier weights and its word-embedding dictionary.
//! Two models trained jointly form a [`BiModel`]; a bilingual pair may share
//! one dictionary store, in which case both models hold the same
//! [`StoreId`] and gradients meet in one region.
//!
//! ## Layouts
//!
//! | Variant | Weight regions | Dictionary |
//! |---------|----------------|------------|
//! | `recursive` | `W (w×2w)`, `B`, `Wd (2w×w)`, `Bd`, `Wl (K×w)`, `Bl` | `D (V×w)` |
//! | others | `Wl (K×w)`, `Bl` | `D (V×w)` |
//!
//! Layouts depend only on the configuration and dictionary size, so a
//! persisted buffer always re-aliases the same way.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::ops::Range;
use std::sync::Arc;

use rae_core::{CoreError, Layout, MatrixMut, MatrixRef, ParamStore, Real, StoreId, Theta};
use rae_nlp::Corpus;

use crate::config::{Lambdas, ModelConfig, NoiseConfig, Trainable, Variant};
use crate::error::TrainError;

pub const D: &str = "D";
pub const W: &str = "W";
pub const B: &str = "B";
pub const WD: &str = "Wd";
pub const BD: &str = "Bd";
pub const WL: &str = "Wl";
pub const BL: &str = "Bl";

impl Variant {
    /// Layout of the composition and classifier weights.
    pub fn weight_layout(&self, width: usize, classes: usize) -> Result<Layout, CoreError> {
        let builder = Layout::builder();
        let builder = if self.has_decoder() {
            builder
                .matrix(W, width, 2 * width)
                .vector(B, width)
                .matrix(WD, 2 * width, width)
                .vector(BD, 2 * width)
        } else {
            builder
        };
        builder.matrix(WL, classes, width).vector(BL, classes).build()
    }
}

/// Layout of a word-embedding dictionary.
pub fn dictionary_layout(words: usize, width: usize) -> Result<Layout, CoreError> {
    Layout::builder().matrix(D, words, width).build()
}

/// Fresh weights: `Wl ~ U(±6/√(2w))`, `W`, `Wd ~ U(±1/√w)`, biases zero.
pub fn init_weights(config: &ModelConfig, rng: &mut StdRng) -> Result<ParamStore, CoreError> {
    let width = config.word_width;
    let layout = config.variant.weight_layout(width, config.label_classes)?;
    let mut store = ParamStore::zeros(layout);

    let r_label = 6.0 / ((2 * width) as Real).sqrt();
    store.fill_region(WL, || rng.gen_range(-r_label..r_label))?;
    if config.variant.has_decoder() {
        let r_tree = 1.0 / (width as Real).sqrt();
        store.fill_region(W, || rng.gen_range(-r_tree..r_tree))?;
        store.fill_region(WD, || rng.gen_range(-r_tree..r_tree))?;
    }
    Ok(store)
}

/// Fresh embeddings: `D ~ 0.1·N(0, 1)`.
pub fn init_dictionary(
    words: usize,
    width: usize,
    rng: &mut StdRng,
) -> Result<ParamStore, CoreError> {
    let mut store = ParamStore::zeros(dictionary_layout(words, width)?);
    store.fill_region(D, || 0.1 * rng.sample::<Real, _>(StandardNormal))?;
    Ok(store)
}

/// One model: corpus, stores, hyperparameters and the current minibatch.
#[derive(Debug, Clone)]
pub struct Model {
    pub config: ModelConfig,
    pub corpus: Arc<Corpus>,
    /// Rows of the dictionary store.
    pub dict_size: usize,
    pub weights: StoreId,
    pub dictionary: StoreId,
    pub lambdas: Lambdas,
    pub bools: Trainable,
    pub noise: NoiseConfig,
    /// Processing order; `indexes[i]` is the sentence at position `i`.
    pub indexes: Vec<usize>,
    pub from: usize,
    pub to: usize,
}

impl Model {
    /// Create a model with its own dictionary, adopting both stores into
    /// `theta`.
    pub fn new(
        config: ModelConfig,
        corpus: Arc<Corpus>,
        dict_size: usize,
        theta: &mut Theta,
        seed: u64,
    ) -> Result<Self, TrainError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let dictionary = theta.adopt(init_dictionary(dict_size, config.word_width, &mut rng)?);
        Self::build(config, corpus, dict_size, dictionary, theta, &mut rng)
    }

    /// Create a model that reuses `partner`'s dictionary store.
    pub fn with_shared_dictionary(
        config: ModelConfig,
        corpus: Arc<Corpus>,
        partner: &Model,
        theta: &mut Theta,
        seed: u64,
    ) -> Result<Self, TrainError> {
        config.validate()?;
        if config.word_width != partner.config.word_width {
            return Err(TrainError::config(format!(
                "shared dictionary has width {}, model wants {}",
                partner.config.word_width, config.word_width
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        Self::build(
            config,
            corpus,
            partner.dict_size,
            partner.dictionary,
            theta,
            &mut rng,
        )
    }

    fn build(
        config: ModelConfig,
        corpus: Arc<Corpus>,
        dict_size: usize,
        dictionary: StoreId,
        theta: &mut Theta,
        rng: &mut StdRng,
    ) -> Result<Self, TrainError> {
        for sentence in corpus.iter() {
            sentence.validate(dict_size)?;
            if config.calc_lbl && config.label_classes > 1 && sentence.label >= config.label_classes {
                return Err(TrainError::config(format!(
                    "label {} out of range for {} classes",
                    sentence.label, config.label_classes
                )));
            }
        }
        let weights = theta.adopt(init_weights(&config, rng)?);
        let len = corpus.len();
        Ok(Self {
            config,
            corpus,
            dict_size,
            weights,
            dictionary,
            lambdas: Lambdas::default(),
            bools: Trainable::default(),
            noise: NoiseConfig::default(),
            indexes: (0..len).collect(),
            from: 0,
            to: len,
        })
    }

    pub fn with_lambdas(mut self, lambdas: Lambdas) -> Self {
        self.lambdas = lambdas;
        self
    }

    pub fn with_noise(mut self, noise: NoiseConfig) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_bools(mut self, bools: Trainable) -> Self {
        self.bools = bools;
        self
    }

    /// Set the minibatch window `[from, to)`.
    pub fn set_window(&mut self, from: usize, to: usize) -> Result<(), TrainError> {
        if from > to || to > self.corpus.len() {
            return Err(TrainError::Window {
                from,
                to,
                len: self.corpus.len(),
            });
        }
        self.from = from;
        self.to = to;
        Ok(())
    }

    pub fn window(&self) -> Range<usize> {
        self.from..self.to
    }

    /// Is the current window the last one of an epoch?
    pub fn is_final_window(&self) -> bool {
        self.to == self.corpus.len()
    }

    /// Resolve this model's parameter views inside `theta`.
    pub fn params<'a>(&self, theta: &'a Theta) -> Result<ModelParams<'a>, TrainError> {
        ModelParams::resolve(self, theta)
    }

    /// Does `region` receive gradients?
    pub fn trains(&self, region: &str) -> bool {
        match region {
            W => self.bools.w,
            B => self.bools.b,
            WD => self.bools.wd,
            BD => self.bools.bd,
            WL => self.bools.wl,
            BL => self.bools.bl,
            D => self.bools.d,
            _ => false,
        }
    }

    /// L2 factor for a weight region, `None` when it is frozen.
    fn l2_factor(&self, region: &str, lambdas: &Lambdas) -> Option<Real> {
        let (lambda, alpha) = match region {
            W => (lambdas.w, self.config.alpha_rae),
            B => (lambdas.b, self.config.alpha_rae),
            WD => (lambdas.wd, self.config.alpha_rae),
            BD => (lambdas.bd, self.config.alpha_rae),
            WL => (lambdas.wl, self.config.alpha_lbl),
            BL => (lambdas.bl, self.config.alpha_lbl),
            D => (lambdas.d, 1.0),
            _ => return None,
        };
        self.trains(region).then_some(lambda * alpha)
    }

    /// Add `0.5·λ·‖θ‖²` to the returned cost and `λθ` to `grad` for the
    /// weight store, and for the dictionary when `with_dictionary` is set.
    pub fn add_l2(
        &self,
        theta: &Theta,
        grad: &mut [Real],
        lambdas: &Lambdas,
        with_dictionary: bool,
    ) -> Result<Real, TrainError> {
        let mut cost = 0.0;
        let mut stores = vec![self.weights];
        if with_dictionary {
            stores.push(self.dictionary);
        }
        for id in stores {
            let values = theta.store(id)?;
            let mut grads = theta.view_in_mut(id, grad)?;
            for region in values.layout().regions() {
                let Some(factor) = self.l2_factor(region.name, lambdas) else {
                    continue;
                };
                if factor == 0.0 {
                    continue;
                }
                let range = region.range();
                let theta_r = &values.as_slice()[range.clone()];
                let grad_r = &mut grads.as_mut_slice()[range];
                for (g, &t) in grad_r.iter_mut().zip(theta_r) {
                    cost += 0.5 * factor * t * t;
                    *g += factor * t;
                }
            }
        }
        Ok(cost)
    }
}

/// Two models trained jointly on paired corpora.
#[derive(Debug, Clone)]
pub struct BiModel {
    pub a: Model,
    pub b: Model,
    /// Document-level pair composed over sentence roots.
    pub docmod: Option<Box<BiModel>>,
}

impl BiModel {
    /// Pair two models. Corpora must line up and widths must agree.
    pub fn new(a: Model, b: Model) -> Result<Self, TrainError> {
        a.corpus.check_paired(&b.corpus)?;
        if a.config.word_width != b.config.word_width {
            return Err(TrainError::config(format!(
                "paired models differ in width: {} vs {}",
                a.config.word_width, b.config.word_width
            )));
        }
        let pair = Self { a, b, docmod: None };
        pair.check_shared_dictionary()?;
        Ok(pair)
    }

    pub fn shares_dictionary(&self) -> bool {
        self.a.dictionary == self.b.dictionary
    }

    /// A shared dictionary is either trained by both models or by neither.
    pub(crate) fn check_shared_dictionary(&self) -> Result<(), TrainError> {
        if self.shares_dictionary() && self.a.bools.d != self.b.bools.d {
            return Err(TrainError::config(
                "models sharing a dictionary must agree on whether it is trainable",
            ));
        }
        Ok(())
    }

    /// Attach a document-level pair built from both corpora.
    ///
    /// Each side gets a document corpus (sentences grouped by `doc_id`) and
    /// a dictionary with one row per sentence id; those rows are overwritten
    /// with sentence roots during training.
    pub fn with_documents(
        mut self,
        config: ModelConfig,
        theta: &mut Theta,
        seed: u64,
    ) -> Result<Self, TrainError> {
        if config.word_width != self.a.config.word_width {
            return Err(TrainError::config(
                "document models must share the sentence width",
            ));
        }
        let docs_a = Arc::new(self.a.corpus.document_level());
        let docs_b = Arc::new(self.b.corpus.document_level());
        if docs_a.len() < 2 || docs_b.len() < 2 {
            return Err(TrainError::config(format!(
                "document alignment needs at least two documents per side, got {} and {}",
                docs_a.len(),
                docs_b.len()
            )));
        }
        let doc_config = ModelConfig {
            calc_bi: true,
            ..config
        };
        let a = Model::new(
            doc_config.clone(),
            docs_a,
            self.a.corpus.id_space(),
            theta,
            seed,
        )?;
        let b = Model::new(doc_config, docs_b, self.b.corpus.id_space(), theta, seed.wrapping_add(1))?;
        let mut docs = BiModel::new(a, b)?;
        docs.a.noise = self.a.noise;
        docs.b.noise = self.b.noise;
        self.docmod = Some(Box::new(docs));
        Ok(self)
    }
}

/// What a cost-and-gradient call optimizes.
#[derive(Debug, Clone)]
pub enum Objective {
    Single(Model),
    Joint(BiModel),
}

impl Objective {
    /// The model whose window, lambdas and noise settings drive training.
    pub fn primary(&self) -> &Model {
        match self {
            Objective::Single(m) => m,
            Objective::Joint(pair) => &pair.a,
        }
    }

    pub fn primary_mut(&mut self) -> &mut Model {
        match self {
            Objective::Single(m) => m,
            Objective::Joint(pair) => &mut pair.a,
        }
    }

    pub fn corpus_len(&self) -> usize {
        self.primary().corpus.len()
    }

    /// Move every top-level model to `[from, to)`.
    pub fn set_window(&mut self, from: usize, to: usize) -> Result<(), TrainError> {
        match self {
            Objective::Single(m) => m.set_window(from, to),
            Objective::Joint(pair) => {
                pair.a.set_window(from, to)?;
                pair.b.set_window(from, to)
            }
        }
    }
}

/// Classifier parameters.
#[derive(Debug, Clone, Copy)]
pub struct LabelParams<'a> {
    pub wl: MatrixRef<'a>,
    pub bl: &'a [Real],
}

/// Encoder and decoder of the recursive variant.
#[derive(Debug, Clone, Copy)]
pub struct TreeParams<'a> {
    pub w: MatrixRef<'a>,
    pub b: &'a [Real],
    pub wd: MatrixRef<'a>,
    pub bd: &'a [Real],
}

/// Composition function together with the parameters it needs.
#[derive(Debug, Clone, Copy)]
pub enum Composition<'a> {
    Additive,
    AdditiveAvg,
    FlatTree,
    Recursive(TreeParams<'a>),
}

impl Composition<'_> {
    pub fn variant(&self) -> Variant {
        match self {
            Composition::Additive => Variant::Additive,
            Composition::AdditiveAvg => Variant::AdditiveAvg,
            Composition::FlatTree => Variant::FlatTree,
            Composition::Recursive(_) => Variant::Recursive,
        }
    }
}

/// Everything a propagator reads for one model.
#[derive(Debug, Clone, Copy)]
pub struct ModelParams<'a> {
    pub embeddings: MatrixRef<'a>,
    pub label: LabelParams<'a>,
    pub composition: Composition<'a>,
}

impl<'a> ModelParams<'a> {
    pub fn resolve(model: &Model, theta: &'a Theta) -> Result<Self, TrainError> {
        let weights = theta.store(model.weights)?;
        let dictionary = theta.store(model.dictionary)?;
        let composition = match model.config.variant {
            Variant::Additive => Composition::Additive,
            Variant::AdditiveAvg => Composition::AdditiveAvg,
            Variant::FlatTree => Composition::FlatTree,
            Variant::Recursive => Composition::Recursive(TreeParams {
                w: weights.matrix(W)?,
                b: weights.vector(B)?,
                wd: weights.matrix(WD)?,
                bd: weights.vector(BD)?,
            }),
        };
        Ok(Self {
            embeddings: dictionary.matrix(D)?,
            label: LabelParams {
                wl: weights.matrix(WL)?,
                bl: weights.vector(BL)?,
            },
            composition,
        })
    }

    pub fn width(&self) -> usize {
        self.embeddings.cols()
    }
}

/// Classifier gradients.
#[derive(Debug)]
pub struct LabelGrads<'a> {
    pub wl: MatrixMut<'a>,
    pub bl: &'a mut [Real],
}

/// Encoder and decoder gradients.
#[derive(Debug)]
pub struct TreeGrads<'a> {
    pub w: MatrixMut<'a>,
    pub b: &'a mut [Real],
    pub wd: MatrixMut<'a>,
    pub bd: &'a mut [Real],
}

/// Gradient views over one model's weight store.
#[derive(Debug)]
pub struct WeightGrads<'a> {
    pub label: LabelGrads<'a>,
    pub tree: Option<TreeGrads<'a>>,
}

impl<'a> WeightGrads<'a> {
    /// Alias a gradient buffer laid out like the model's weight store.
    pub fn bind(
        variant: Variant,
        layout: &'a Layout,
        buffer: &'a mut [Real],
    ) -> Result<Self, CoreError> {
        let mut regions = layout.split_mut(buffer)?;
        let tree = if variant.has_decoder() {
            Some(TreeGrads {
                w: regions.take_matrix(W)?,
                b: regions.take_vector(B)?,
                wd: regions.take_matrix(WD)?,
                bd: regions.take_vector(BD)?,
            })
        } else {
            None
        };
        Ok(Self {
            label: LabelGrads {
                wl: regions.take_matrix(WL)?,
                bl: regions.take_vector(BL)?,
            },
            tree,
        })
    }

    /// Decoder gradients; only recursive models have them.
    pub(crate) fn tree_mut(&mut self) -> &mut TreeGrads<'a> {
        match self.tree.as_mut() {
            Some(tree) => tree,
            None => panic!("Model gradients have no encoder/decoder regions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rae_nlp::Sentence;

    fn corpus() -> Arc<Corpus> {
        Arc::new(Corpus::new(vec![
            Sentence::flat(&[1, 2]).unwrap().with_label(1),
            Sentence::flat(&[3]).unwrap(),
        ]))
    }

    #[test]
    fn test_layouts_per_variant() {
        let rec = Variant::Recursive.weight_layout(3, 1).unwrap();
        assert_eq!(rec.names(), vec!["W", "B", "Wd", "Bd", "Wl", "Bl"]);
        assert_eq!(rec.size(), 18 + 3 + 18 + 6 + 3 + 1);
        let add = Variant::Additive.weight_layout(3, 2).unwrap();
        assert_eq!(add.names(), vec!["Wl", "Bl"]);
        assert_eq!(add.size(), 8);
    }

    #[test]
    fn test_init_is_seeded() {
        let config = ModelConfig {
            word_width: 4,
            ..ModelConfig::default()
        };
        let mut t1 = Theta::new();
        let mut t2 = Theta::new();
        Model::new(config.clone(), corpus(), 5, &mut t1, 0).unwrap();
        Model::new(config, corpus(), 5, &mut t2, 0).unwrap();
        assert_eq!(t1, t2);
    }

    #[test]
    fn test_init_ranges() {
        let config = ModelConfig {
            variant: Variant::Recursive,
            word_width: 8,
            ..ModelConfig::default()
        };
        let mut theta = Theta::new();
        let model = Model::new(config, corpus(), 5, &mut theta, 3).unwrap();
        let weights = theta.store(model.weights).unwrap();
        let r_label = 6.0 / (16.0 as Real).sqrt();
        assert!(weights.vector(WL).unwrap().iter().all(|v| v.abs() < r_label));
        assert!(weights.vector(BL).unwrap().iter().all(|&v| v == 0.0));
        assert!(weights.vector(W).unwrap().iter().all(|v| v.abs() < 1.0 / (8.0 as Real).sqrt()));
        let d = theta.store(model.dictionary).unwrap();
        assert!(d.as_slice().iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_shared_dictionary_is_one_store() {
        let config = ModelConfig {
            word_width: 4,
            ..ModelConfig::default()
        };
        let mut theta = Theta::new();
        let a = Model::new(config.clone(), corpus(), 5, &mut theta, 0).unwrap();
        let b = Model::with_shared_dictionary(config, corpus(), &a, &mut theta, 1).unwrap();
        assert_eq!(a.dictionary, b.dictionary);
        assert_ne!(a.weights, b.weights);
        assert_eq!(theta.num_stores(), 3);
        assert!(BiModel::new(a, b).unwrap().shares_dictionary());
    }

    #[test]
    fn test_unknown_word_rejected_at_setup() {
        let mut theta = Theta::new();
        let err = Model::new(ModelConfig::default(), corpus(), 3, &mut theta, 0).unwrap_err();
        assert!(matches!(err, TrainError::Corpus(_)));
    }

    #[test]
    fn test_mismatched_corpora_rejected() {
        let mut theta = Theta::new();
        let short = Arc::new(Corpus::new(vec![Sentence::flat(&[1]).unwrap()]));
        let a = Model::new(ModelConfig::default(), corpus(), 5, &mut theta, 0).unwrap();
        let b = Model::new(ModelConfig::default(), short, 5, &mut theta, 0).unwrap();
        assert!(matches!(BiModel::new(a, b), Err(TrainError::Corpus(_))));
    }

    #[test]
    fn test_documents_need_two_per_side() {
        let mut theta = Theta::new();
        let one_doc = || {
            Arc::new(Corpus::new(
                (0..4)
                    .map(|i| Sentence::flat(&[1 + i % 3]).unwrap().with_ids(i, 0))
                    .collect(),
            ))
        };
        let config = ModelConfig {
            word_width: 2,
            ..ModelConfig::default()
        };
        let a = Model::new(config.clone(), one_doc(), 5, &mut theta, 0).unwrap();
        let b = Model::new(config.clone(), one_doc(), 5, &mut theta, 1).unwrap();
        let stores = theta.num_stores();
        let err = BiModel::new(a, b)
            .unwrap()
            .with_documents(config, &mut theta, 2)
            .unwrap_err();
        assert!(matches!(err, TrainError::Config { .. }));
        assert_eq!(theta.num_stores(), stores);
    }

    #[test]
    fn test_shared_dictionary_flags_must_agree() {
        let config = ModelConfig {
            word_width: 4,
            ..ModelConfig::default()
        };
        let mut theta = Theta::new();
        let mut a = Model::new(config.clone(), corpus(), 5, &mut theta, 0).unwrap();
        let b = Model::with_shared_dictionary(config.clone(), corpus(), &a, &mut theta, 1).unwrap();
        a.bools.d = false;
        assert!(matches!(BiModel::new(a.clone(), b.clone()), Err(TrainError::Config { .. })));

        // separate dictionaries may be frozen independently
        let c = Model::new(config, corpus(), 5, &mut theta, 2).unwrap();
        assert!(BiModel::new(a, c).is_ok());
    }

    #[test]
    fn test_window_validation() {
        let mut theta = Theta::new();
        let mut m = Model::new(ModelConfig::default(), corpus(), 5, &mut theta, 0).unwrap();
        assert!(m.set_window(0, 3).is_err());
        m.set_window(1, 2).unwrap();
        assert!(m.is_final_window());
        assert_eq!(m.window(), 1..2);
    }

    #[test]
    fn test_l2_cost_and_gradient() {
        let config = ModelConfig {
            word_width: 2,
            alpha_lbl: 0.5,
            ..ModelConfig::default()
        };
        let mut theta = Theta::new();
        let m = Model::new(config, corpus(), 5, &mut theta, 0).unwrap();
        {
            let mut w = theta.store_mut(m.weights).unwrap();
            w.as_mut_slice().copy_from_slice(&[1.0, 2.0, 4.0]);
        }
        let mut grad = theta.zeros_like();
        let lambdas = Lambdas::uniform(2.0);
        let cost = m.add_l2(&theta, &mut grad, &lambdas, false).unwrap();
        // factor = λ·alpha_lbl = 1.0
        assert_eq!(cost, 0.5 * (1.0 + 4.0 + 16.0));
        let seg = theta.segment(m.weights).unwrap().range();
        assert_eq!(&grad[seg], &[1.0, 2.0, 4.0]);
    }

    #[test]
    fn test_weight_grads_bind() {
        let layout = Variant::Recursive.weight_layout(2, 1).unwrap();
        let mut buffer = vec![0.0; layout.size()];
        {
            let mut grads = WeightGrads::bind(Variant::Recursive, &layout, &mut buffer).unwrap();
            grads.label.bl[0] = 3.0;
            grads.tree_mut().b[1] = 1.0;
        }
        assert_eq!(buffer[layout.size() - 1], 3.0);
        assert_eq!(buffer[layout.region(B).unwrap().offset + 1], 1.0);
    }
}
