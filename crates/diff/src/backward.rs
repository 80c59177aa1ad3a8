//! # Backward Pass and Unfolding
//!
//! Top-down propagation of error signals. Nodes are visited `0..N`, so a
//! node's `delta` is complete (its parent and every loss term attached to it
//! have contributed) before it is pushed to its children.
//!
//! Per node, in order:
//!
//! 1. bi-distance at the root, when requested
//! 2. label pass (root only, or every node for recursive models)
//! 3. leaves: embedding gradient; internal nodes: reconstruction,
//!    unfolding, then the composition backprop to the children
//!
//! Unfolding reconstructs the subtree under a node top-down with the
//! decoder and backpropagates the leaf errors along the exact reverse of
//! the downward visit order.

use rae_core::view::{axpy, squared_norm};
use rae_core::{MatrixMut, Real};
use rae_nlp::Sentence;

use crate::config::Variant;
use crate::model::{Composition, ModelParams, TreeParams, WeightGrads};
use crate::propagator::{span, Propagator};

/// Loss terms to backpropagate for one sentence.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorTerms<'o> {
    pub lbl: bool,
    pub rae: bool,
    pub unf: bool,
    /// Root of the paired sentence for the bi-distance term.
    pub bi: Option<&'o [Real]>,
    /// Accumulate word-embedding gradients.
    pub word: bool,
}

impl Propagator {
    /// Backpropagate the requested terms over the loaded, forwarded
    /// sentence. Returns whether the majority of labelled nodes was
    /// classified correctly.
    pub fn back_propagate(
        &mut self,
        sentence: &Sentence,
        params: &ModelParams<'_>,
        grads: &mut WeightGrads<'_>,
        dict: &mut MatrixMut<'_>,
        terms: ErrorTerms<'_>,
    ) -> bool {
        assert_eq!(
            sentence.num_nodes(),
            self.nodes,
            "Propagator holds another sentence"
        );
        if self.variant == Variant::FlatTree {
            self.back_propagate_flat(sentence, params, grads, dict, terms);
            return self.classified_correctly();
        }

        for i in 0..self.nodes {
            if i == 0 {
                if let Some(other) = terms.bi {
                    self.backprop_bi(other);
                }
            }
            if terms.lbl && (i == 0 || self.variant.labels_subtrees()) {
                let weight = if self.variant.labels_subtrees() {
                    self.label_weight(sentence, i)
                } else {
                    1.0
                };
                self.apply_label(i, sentence.label, weight, &params.label, Some(&mut grads.label));
            }
            match sentence.children(i) {
                None => {
                    if terms.word {
                        self.backprop_word(i, sentence.word_at(i), dict);
                    }
                }
                Some((l, r)) => match params.composition {
                    Composition::Recursive(tree) => {
                        self.backprop_recursive(sentence, i, l, r, params, &tree, grads, dict, terms)
                    }
                    _ => self.backprop_sum(i, l, r),
                },
            }
        }
        self.classified_correctly()
    }

    /// `delta_0 += alpha_lbl·(D_0 − other)`, error `alpha_lbl·¼‖D_0 − other‖²`.
    ///
    /// Each side of a pair contributes a quarter, so both together give
    /// `½‖A − B‖²`.
    pub(crate) fn backprop_bi(&mut self, other: &[Real]) {
        let w = self.width;
        assert_eq!(other.len(), w, "Paired root has the wrong width");
        let mut error = 0.0;
        for (k, &o) in other.iter().enumerate() {
            let diff = self.d[k] - o;
            error += diff * diff;
            self.delta[k] += self.alpha_lbl * diff;
        }
        self.bi_error += self.alpha_lbl * 0.25 * error;
    }

    fn backprop_word(&mut self, node: usize, word: usize, dict: &mut MatrixMut<'_>) {
        let scale = match self.variant {
            Variant::AdditiveAvg => 1.0 / self.leaves.max(1) as Real,
            _ => 1.0,
        };
        dict.add_to_row(word, scale, &self.delta[span(node, self.width)]);
    }

    fn backprop_sum(&mut self, node: usize, left: usize, right: Option<usize>) {
        let w = self.width;
        for child in std::iter::once(left).chain(right) {
            for k in 0..w {
                self.delta[child * w + k] += self.delta[node * w + k];
            }
        }
    }

    fn back_propagate_flat(
        &mut self,
        sentence: &Sentence,
        params: &ModelParams<'_>,
        grads: &mut WeightGrads<'_>,
        dict: &mut MatrixMut<'_>,
        terms: ErrorTerms<'_>,
    ) {
        if terms.lbl {
            self.apply_label(0, sentence.label, 1.0, &params.label, Some(&mut grads.label));
        }
        if let Some(other) = terms.bi {
            self.backprop_bi(other);
        }
        if !terms.word {
            return;
        }

        let w = self.width;
        let words = &sentence.words;
        let merges = words.len().saturating_sub(1).max(1);
        for k in 0..merges {
            for c in 0..w {
                let m = self.merges[k * w + c];
                self.dz[c] = self.delta[c] * (1.0 - m * m);
            }
            if words.len() == 1 {
                dict.add_to_row(words[0], 1.0, &self.dz[..w]);
            } else {
                dict.add_to_row(words[k], 1.0, &self.dz[..w]);
                dict.add_to_row(words[k + 1], 1.0, &self.dz[..w]);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn backprop_recursive(
        &mut self,
        sentence: &Sentence,
        node: usize,
        left: usize,
        right: Option<usize>,
        params: &ModelParams<'_>,
        tree: &TreeParams<'_>,
        grads: &mut WeightGrads<'_>,
        dict: &mut MatrixMut<'_>,
        terms: ErrorTerms<'_>,
    ) {
        let w = self.width;
        let right = right.unwrap_or(left);

        if terms.rae {
            self.backprop_reconstruction(node, left, right, tree, grads);
        }
        if terms.unf {
            self.unfold_from_here(sentence, node, params, grads, dict, terms.word);
        }

        // dz = delta ⊙ tanh'(z)
        for k in 0..w {
            let d = self.d[node * w + k];
            self.dz[k] = self.delta[node * w + k] * (1.0 - d * d);
        }
        self.x[..w].copy_from_slice(&self.d[span(left, w)]);
        self.x[w..].copy_from_slice(&self.d[span(right, w)]);

        let tg = grads.tree_mut();
        tg.w.add_outer(1.0, &self.dz[..w], &self.x);
        axpy(1.0, &self.dz[..w], tg.b);

        self.back.fill(0.0);
        tree.w.transpose_mul_add(&self.dz[..w], &mut self.back);
        axpy(1.0, &self.back[..w], &mut self.delta[span(left, w)]);
        axpy(1.0, &self.back[w..], &mut self.delta[span(right, w)]);
    }

    /// Reconstruction term `alpha_rae·½‖tanh(Wd D_i + Bd) − [D_l; D_r]‖²`.
    fn backprop_reconstruction(
        &mut self,
        node: usize,
        left: usize,
        right: usize,
        tree: &TreeParams<'_>,
        grads: &mut WeightGrads<'_>,
    ) {
        assert!(
            self.autoencoded,
            "Reconstruction needs a forward pass with autoencode"
        );
        let w = self.width;
        let alpha = self.alpha_rae;
        let rec = span(node, 2 * w);

        // x = rec − [D_l; D_r]
        for k in 0..w {
            self.x[k] = self.rec[rec.start + k] - self.d[left * w + k];
            self.x[w + k] = self.rec[rec.start + w + k] - self.d[right * w + k];
        }
        self.rae_error += alpha * 0.5 * squared_norm(&self.x);

        for (k, dr) in self.dz.iter_mut().enumerate() {
            let r = self.rec[rec.start + k];
            *dr = alpha * self.x[k] * (1.0 - r * r);
        }
        let tg = grads.tree_mut();
        tg.wd.add_outer(1.0, &self.dz, &self.d[span(node, w)]);
        axpy(1.0, &self.dz, tg.bd);
        tree.wd.transpose_mul_add(&self.dz, &mut self.delta[span(node, w)]);

        axpy(-alpha, &self.x[..w], &mut self.delta[span(left, w)]);
        axpy(-alpha, &self.x[w..], &mut self.delta[span(right, w)]);
    }

    /// Unfold the subtree under `node` from its encoding and backpropagate
    /// the leaf reconstruction errors. The resulting signal is added to
    /// `node`'s delta.
    ///
    /// # Panics
    ///
    /// Panics for variants without a decoder.
    pub fn unfold_from_here(
        &mut self,
        sentence: &Sentence,
        node: usize,
        params: &ModelParams<'_>,
        grads: &mut WeightGrads<'_>,
        dict: &mut MatrixMut<'_>,
        word: bool,
    ) {
        let tree = match params.composition {
            Composition::Recursive(tree) => tree,
            other => panic!("{:?} models do not support unfolding", other.variant()),
        };
        let w = self.width;
        let alpha = self.alpha_rae;

        self.delta_r[..self.nodes * w].fill(0.0);
        self.dr[span(node, w)].copy_from_slice(&self.d[span(node, w)]);

        // Downward: decode each visited node into its children.
        self.order.clear();
        self.queue.clear();
        self.queue.push_back(node);
        while let Some(i) = self.queue.pop_front() {
            self.order.push(i);
            let Some((l, r)) = sentence.children(i) else {
                continue;
            };
            let y = span(i, 2 * w);
            self.y[y.clone()].copy_from_slice(tree.bd);
            tree.wd.mul_vec_add(&self.dr[span(i, w)], &mut self.y[y.clone()]);
            self.y[y.clone()].iter_mut().for_each(|v| *v = v.tanh());

            self.dr[span(l, w)].copy_from_slice(&self.y[y.start..y.start + w]);
            self.queue.push_back(l);
            if let Some(r) = r {
                self.dr[span(r, w)].copy_from_slice(&self.y[y.start + w..y.end]);
                self.queue.push_back(r);
            }
        }

        // Upward, in exact reverse of the downward order.
        let tg = grads.tree_mut();
        for idx in (0..self.order.len()).rev() {
            let i = self.order[idx];
            match sentence.children(i) {
                None => {
                    let target = sentence.word_at(i);
                    let embedding = params.embeddings.row(target);
                    let mut error = 0.0;
                    for k in 0..w {
                        let e = self.dr[i * w + k] - embedding[k];
                        error += e * e;
                        self.dy[k] = e;
                        self.delta_r[i * w + k] += alpha * e;
                    }
                    self.rae_error += alpha * 0.5 * error;
                    if word {
                        dict.add_to_row(target, -alpha, &self.dy[..w]);
                    }
                }
                Some((l, r)) => {
                    let y = span(i, 2 * w);
                    for k in 0..w {
                        let top = self.y[y.start + k];
                        self.dy[k] = self.delta_r[l * w + k] * (1.0 - top * top);
                        self.dy[w + k] = match r {
                            Some(r) => {
                                let bottom = self.y[y.start + w + k];
                                self.delta_r[r * w + k] * (1.0 - bottom * bottom)
                            }
                            None => 0.0,
                        };
                    }
                    tg.wd.add_outer(1.0, &self.dy, &self.dr[span(i, w)]);
                    axpy(1.0, &self.dy, tg.bd);
                    tree.wd.transpose_mul_add(&self.dy, &mut self.delta_r[span(i, w)]);
                }
            }
        }

        for k in 0..w {
            self.delta[node * w + k] += self.delta_r[node * w + k];
        }
    }
}
