//! # Single-Sentence Propagator
//!
//! A [`Propagator`] owns the per-node working state for one sentence at a
//! time: encodings `d`, error signals `delta`, reconstructions and the
//! unfolding mirror. Buffers are sized from the largest sentence of the
//! bound corpus and reused; loading a sentence only zeroes the prefix it
//! uses.
//!
//! ```text
//!   load_with_sentence ─▶ forward_propagate ─▶ [set_root_delta] ─▶ back_propagate
//!                                   │
//!                                   └─▶ set_dynamic (feature vectors)
//! ```
//!
//! A propagator is never shared: every shard of the cost-and-gradient
//! computation owns its own.
//!
//! The forward pass lives in `forward.rs`, the backward pass and unfolding
//! in `backward.rs`.

use std::collections::VecDeque;
use std::ops::Range;

use rae_core::view::axpy;
use rae_core::Real;
use rae_nlp::Sentence;

use crate::config::{ModelConfig, Variant};
use crate::model::{LabelGrads, LabelParams, Model};

/// Row `node` of a buffer with `width` values per node.
#[inline]
pub(crate) fn span(node: usize, width: usize) -> Range<usize> {
    node * width..(node + 1) * width
}

#[inline]
pub(crate) fn sigmoid(x: Real) -> Real {
    1.0 / (1.0 + (-x).exp())
}

/// Aggregation used by [`Propagator::set_dynamic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicMode {
    /// Root followed by the mean of all nodes.
    RootAndMean,
    Root,
    /// Mean of all nodes.
    Mean,
    /// Every node encoding, concatenated.
    AllNodes,
    /// Root, mean of all nodes, mean of leaves, mean of internal nodes.
    Summary,
}

impl DynamicMode {
    /// Mode from its numeric code (`0..=4`).
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DynamicMode::RootAndMean),
            1 => Some(DynamicMode::Root),
            2 => Some(DynamicMode::Mean),
            3 => Some(DynamicMode::AllNodes),
            4 => Some(DynamicMode::Summary),
            _ => None,
        }
    }

    /// Values written for a tree of `nodes` nodes.
    pub fn len(&self, width: usize, nodes: usize) -> usize {
        match self {
            DynamicMode::RootAndMean => 2 * width,
            DynamicMode::Root | DynamicMode::Mean => width,
            DynamicMode::AllNodes => nodes * width,
            DynamicMode::Summary => 4 * width,
        }
    }
}

/// Per-sentence forward/backward working state.
#[derive(Debug, Clone)]
pub struct Propagator {
    pub(crate) variant: Variant,
    pub(crate) width: usize,
    pub(crate) classes: usize,
    pub(crate) alpha_lbl: Real,
    pub(crate) alpha_rae: Real,
    pub(crate) beta: Real,

    pub(crate) nodes: usize,
    pub(crate) leaves: usize,
    pub(crate) words: usize,
    node_capacity: usize,
    word_capacity: usize,
    pub(crate) autoencoded: bool,

    /// Node encodings, `width` per node.
    pub(crate) d: Vec<Real>,
    /// Error signals on node encodings.
    pub(crate) delta: Vec<Real>,
    /// Reconstructions `tanh(Wd d + Bd)`, `2·width` per node.
    pub(crate) rec: Vec<Real>,
    /// Flat-tree merge activations, one row per adjacent word pair.
    pub(crate) merges: Vec<Real>,
    /// Unfolded encodings (mirror of `d`).
    pub(crate) dr: Vec<Real>,
    pub(crate) delta_r: Vec<Real>,
    /// Decoder outputs during unfolding, `2·width` per node.
    pub(crate) y: Vec<Real>,

    pub(crate) pred: Vec<Real>,
    pub(crate) label_delta: Vec<Real>,
    pub(crate) x: Vec<Real>,
    pub(crate) dz: Vec<Real>,
    pub(crate) dy: Vec<Real>,
    pub(crate) back: Vec<Real>,
    pub(crate) order: Vec<usize>,
    pub(crate) queue: VecDeque<usize>,

    pub(crate) lbl_error: Real,
    pub(crate) rae_error: Real,
    pub(crate) bi_error: Real,
    pub(crate) correct: usize,
    pub(crate) wrong: usize,
    pub(crate) root_class: Option<usize>,
}

impl Propagator {
    /// A propagator for trees of up to `max_nodes` nodes and `max_words`
    /// leaves. Larger sentences grow the buffers on load.
    pub fn new(config: &ModelConfig, max_nodes: usize, max_words: usize) -> Self {
        let width = config.word_width;
        let classes = config.label_classes;
        let mut propagator = Self {
            variant: config.variant,
            width,
            classes,
            alpha_lbl: config.alpha_lbl,
            alpha_rae: config.alpha_rae,
            beta: config.beta,
            nodes: 0,
            leaves: 0,
            words: 0,
            node_capacity: 0,
            word_capacity: 0,
            autoencoded: false,
            d: Vec::new(),
            delta: Vec::new(),
            rec: Vec::new(),
            merges: Vec::new(),
            dr: Vec::new(),
            delta_r: Vec::new(),
            y: Vec::new(),
            pred: vec![0.0; classes],
            label_delta: vec![0.0; classes],
            x: vec![0.0; 2 * width],
            dz: vec![0.0; 2 * width],
            dy: vec![0.0; 2 * width],
            back: vec![0.0; 2 * width],
            order: Vec::new(),
            queue: VecDeque::new(),
            lbl_error: 0.0,
            rae_error: 0.0,
            bi_error: 0.0,
            correct: 0,
            wrong: 0,
            root_class: None,
        };
        propagator.reserve(max_nodes.max(1), max_words.max(1));
        propagator
    }

    /// A propagator sized for `model`'s corpus.
    pub fn for_model(model: &Model) -> Self {
        Self::new(
            &model.config,
            model.corpus.max_nodes(),
            model.corpus.max_words(),
        )
    }

    fn reserve(&mut self, nodes: usize, words: usize) {
        let w = self.width;
        if nodes > self.node_capacity {
            self.node_capacity = nodes;
            self.d.resize(nodes * w, 0.0);
            self.delta.resize(nodes * w, 0.0);
            self.dr.resize(nodes * w, 0.0);
            self.delta_r.resize(nodes * w, 0.0);
            if self.variant.has_decoder() {
                self.rec.resize(nodes * 2 * w, 0.0);
                self.y.resize(nodes * 2 * w, 0.0);
            }
            self.order.reserve(nodes);
            self.queue.reserve(nodes);
        }
        if words > self.word_capacity {
            self.word_capacity = words;
            if self.variant == Variant::FlatTree {
                self.merges.resize(words * w, 0.0);
            }
        }
    }

    /// Bind a sentence: zero the working state it needs and reset errors.
    pub fn load_with_sentence(&mut self, sentence: &Sentence) {
        let nodes = sentence.num_nodes();
        let words = sentence.num_words();
        self.reserve(nodes, words.max(1));
        self.nodes = nodes;
        self.words = words;
        self.leaves = sentence.num_leaves();

        let w = self.width;
        self.d[..nodes * w].fill(0.0);
        self.delta[..nodes * w].fill(0.0);
        self.dr[..nodes * w].fill(0.0);
        self.delta_r[..nodes * w].fill(0.0);
        if self.variant.has_decoder() {
            self.rec[..nodes * 2 * w].fill(0.0);
            self.y[..nodes * 2 * w].fill(0.0);
        }
        if self.variant == Variant::FlatTree {
            self.merges[..words.max(1) * w].fill(0.0);
        }

        self.autoencoded = false;
        self.lbl_error = 0.0;
        self.rae_error = 0.0;
        self.bi_error = 0.0;
        self.correct = 0;
        self.wrong = 0;
        self.root_class = None;
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Nodes of the loaded sentence.
    pub fn num_nodes(&self) -> usize {
        self.nodes
    }

    pub fn num_words(&self) -> usize {
        self.words
    }

    /// Root encoding of the loaded sentence.
    pub fn root(&self) -> &[Real] {
        &self.d[span(0, self.width)]
    }

    pub fn encoding(&self, node: usize) -> &[Real] {
        assert!(node < self.nodes, "Node {} out of range ({} nodes)", node, self.nodes);
        &self.d[span(node, self.width)]
    }

    /// Error signal on a node encoding.
    pub fn delta(&self, node: usize) -> &[Real] {
        assert!(node < self.nodes, "Node {} out of range ({} nodes)", node, self.nodes);
        &self.delta[span(node, self.width)]
    }

    /// Encoding reconstructed for `node` by the last unfolding.
    pub fn unfolded(&self, node: usize) -> &[Real] {
        assert!(node < self.nodes, "Node {} out of range ({} nodes)", node, self.nodes);
        &self.dr[span(node, self.width)]
    }

    /// Overwrite the root's error signal; the next `back_propagate` carries
    /// it down the tree.
    pub fn set_root_delta(&mut self, gradient: &[Real]) {
        self.delta[span(0, self.width)].copy_from_slice(gradient);
    }

    /// Overwrite the root encoding, e.g. to unfold another model's root.
    pub fn set_root(&mut self, encoding: &[Real]) {
        self.d[span(0, self.width)].copy_from_slice(encoding);
    }

    pub fn lbl_error(&self) -> Real {
        self.lbl_error
    }

    pub fn rae_error(&self) -> Real {
        self.rae_error
    }

    /// Bi-distance error; reported with the label error by the collector.
    pub fn bi_error(&self) -> Real {
        self.bi_error
    }

    /// Labelled nodes classified correctly since the last load.
    pub fn class_correct(&self) -> usize {
        self.correct
    }

    pub fn class_wrong(&self) -> usize {
        self.wrong
    }

    /// Predicted class at the root, once the root has been labelled.
    pub fn root_class(&self) -> Option<usize> {
        self.root_class
    }

    /// Majority vote over labelled nodes.
    pub(crate) fn classified_correctly(&self) -> bool {
        self.correct > self.wrong
    }

    /// Leaves count fully, internal nodes with `beta`.
    pub(crate) fn label_weight(&self, sentence: &Sentence, node: usize) -> Real {
        if sentence.is_leaf(node) {
            1.0
        } else {
            self.beta
        }
    }

    /// Label pass at `node`.
    ///
    /// Independent sigmoids; target is the label value for one class and
    /// one-hot otherwise. With `grads`, classifier gradients are accumulated
    /// and the node's error signal receives `Wlᵀ dz`.
    ///
    /// # Panics
    ///
    /// Panics when asked to label a subtree of a variant that only labels
    /// the root.
    pub(crate) fn apply_label(
        &mut self,
        node: usize,
        label: usize,
        weight: Real,
        params: &LabelParams<'_>,
        grads: Option<&mut LabelGrads<'_>>,
    ) -> bool {
        assert!(
            node == 0 || self.variant.labels_subtrees(),
            "{:?} models do not label subtrees (node {})",
            self.variant,
            node
        );
        let w = self.width;
        let k = self.classes;
        let encoding = span(node, w);

        self.pred.copy_from_slice(params.bl);
        params.wl.mul_vec_add(&self.d[encoding.clone()], &mut self.pred);
        self.pred.iter_mut().for_each(|p| *p = sigmoid(*p));

        let target = |c: usize| -> Real {
            if k == 1 {
                label as Real
            } else if c == label {
                1.0
            } else {
                0.0
            }
        };

        let mut error = 0.0;
        for (c, (&p, dz)) in self.pred.iter().zip(self.label_delta.iter_mut()).enumerate() {
            let diff = p - target(c);
            error += diff * diff;
            *dz = self.alpha_lbl * weight * diff * p * (1.0 - p);
        }
        self.lbl_error += self.alpha_lbl * 0.5 * weight * error;

        let predicted = predicted_class(&self.pred);
        let correct = if k == 1 {
            (label as Real - self.pred[0]).abs() < 0.5
        } else {
            predicted == label
        };
        if correct {
            self.correct += 1;
        } else {
            self.wrong += 1;
        }
        if node == 0 {
            self.root_class = Some(predicted);
        }

        if let Some(grads) = grads {
            grads
                .wl
                .add_outer(1.0, &self.label_delta, &self.d[encoding.clone()]);
            axpy(1.0, &self.label_delta, grads.bl);
            params
                .wl
                .transpose_mul_add(&self.label_delta, &mut self.delta[encoding]);
        }
        correct
    }

    /// Classify an already forwarded sentence without touching gradients.
    /// Returns the majority vote over labelled nodes.
    pub fn evaluate_sentence(&mut self, sentence: &Sentence, params: &LabelParams<'_>) -> bool {
        assert_eq!(sentence.num_nodes(), self.nodes, "Propagator holds another sentence");
        if self.variant.labels_subtrees() {
            for node in 0..self.nodes {
                let weight = self.label_weight(sentence, node);
                self.apply_label(node, sentence.label, weight, params, None);
            }
        } else {
            self.apply_label(0, sentence.label, 1.0, params, None);
        }
        self.classified_correctly()
    }

    /// Pack a feature vector from the node encodings into `out`.
    ///
    /// The segment `[slot·len, (slot+1)·len)` of `out` is overwritten, where
    /// `len` is [`DynamicMode::len`]. Means divide by the number of nodes in
    /// their category, at least 1.
    ///
    /// # Panics
    ///
    /// Panics if `out` is too short for the requested slot.
    pub fn set_dynamic(&self, sentence: &Sentence, out: &mut [Real], mode: DynamicMode, slot: usize) {
        let w = self.width;
        let n = self.nodes;
        let len = mode.len(w, n);
        let offset = slot * len;
        assert!(
            out.len() >= offset + len,
            "Feature buffer of {} values cannot hold slot {} of {:?} ({} values each)",
            out.len(),
            slot,
            mode,
            len
        );
        let segment = &mut out[offset..offset + len];
        segment.fill(0.0);
        match mode {
            DynamicMode::Root => segment.copy_from_slice(self.root()),
            DynamicMode::Mean => self.mean_into(segment, |_| true),
            DynamicMode::RootAndMean => {
                let (root, mean) = segment.split_at_mut(w);
                root.copy_from_slice(self.root());
                self.mean_into(mean, |_| true);
            }
            DynamicMode::AllNodes => segment.copy_from_slice(&self.d[..n * w]),
            DynamicMode::Summary => {
                let (root, rest) = segment.split_at_mut(w);
                let (mean, rest) = rest.split_at_mut(w);
                let (leaves, inner) = rest.split_at_mut(w);
                root.copy_from_slice(self.root());
                self.mean_into(mean, |_| true);
                self.mean_into(leaves, |i| sentence.is_leaf(i));
                self.mean_into(inner, |i| !sentence.is_leaf(i));
            }
        }
    }

    fn mean_into(&self, out: &mut [Real], include: impl Fn(usize) -> bool) {
        let mut count = 0usize;
        for node in (0..self.nodes).filter(|&i| include(i)) {
            axpy(1.0, &self.d[span(node, self.width)], out);
            count += 1;
        }
        let scale = 1.0 / count.max(1) as Real;
        out.iter_mut().for_each(|v| *v *= scale);
    }
}

/// Index of the largest prediction; for one class, `1` when `p ≥ 0.5`.
pub(crate) fn predicted_class(pred: &[Real]) -> usize {
    if pred.len() == 1 {
        return usize::from(pred[0] >= 0.5);
    }
    let mut best = 0;
    for (c, &p) in pred.iter().enumerate() {
        if p > pred[best] {
            best = c;
        }
    }
    best
}
