//! # Forward Composition
//!
//! Bottom-up evaluation of node encodings. Children always carry larger
//! indices than their parent, so walking nodes `N-1..=0` computes every
//! child before the node that consumes it.
//!
//! | Variant | Leaf | Internal node | Root |
//! |---------|------|---------------|------|
//! | additive | `E[w]` | `D_l + D_r` | sum of leaves |
//! | additive_avg | `E[w] / leaves` | `D_l + D_r` | mean of leaves |
//! | flat_tree | `E[w]` | unused | `Σ tanh(E[w_{k-1}] + E[w_k])` |
//! | recursive | `E[w]` | `tanh(W [D_l; D_r] + B)` | same as internal |

use rae_core::{MatrixRef, Real};
use rae_nlp::Sentence;

use crate::model::{Composition, ModelParams, TreeParams};
use crate::propagator::{span, Propagator};

impl Propagator {
    /// Compute every node encoding of the loaded sentence.
    ///
    /// With `autoencode`, recursive models also store the reconstruction
    /// `tanh(Wd D_i + Bd)` of every internal node for the reconstruction
    /// pass. Other variants ignore the flag.
    pub fn forward_propagate(
        &mut self,
        sentence: &Sentence,
        params: &ModelParams<'_>,
        autoencode: bool,
    ) {
        assert_eq!(
            sentence.num_nodes(),
            self.nodes,
            "Propagator holds another sentence"
        );
        assert_eq!(
            params.composition.variant(),
            self.variant,
            "Parameters belong to another variant"
        );
        match params.composition {
            Composition::Additive => self.forward_additive(sentence, &params.embeddings, 1.0),
            Composition::AdditiveAvg => {
                let scale = 1.0 / self.leaves.max(1) as Real;
                self.forward_additive(sentence, &params.embeddings, scale)
            }
            Composition::FlatTree => self.forward_flat(sentence, &params.embeddings),
            Composition::Recursive(tree) => {
                self.forward_recursive(sentence, &params.embeddings, &tree, autoencode)
            }
        }
    }

    fn forward_additive(&mut self, sentence: &Sentence, embeddings: &MatrixRef<'_>, scale: Real) {
        let w = self.width;
        for i in (0..self.nodes).rev() {
            match sentence.children(i) {
                None => {
                    let row = embeddings.row(sentence.word_at(i));
                    for (o, &e) in self.d[span(i, w)].iter_mut().zip(row) {
                        *o = scale * e;
                    }
                }
                Some((l, r)) => {
                    for k in 0..w {
                        let mut v = self.d[l * w + k];
                        if let Some(r) = r {
                            v += self.d[r * w + k];
                        }
                        self.d[i * w + k] = v;
                    }
                }
            }
        }
    }

    fn forward_flat(&mut self, sentence: &Sentence, embeddings: &MatrixRef<'_>) {
        let w = self.width;
        for i in (0..self.nodes).filter(|&i| sentence.is_leaf(i)) {
            self.d[span(i, w)].copy_from_slice(embeddings.row(sentence.word_at(i)));
        }

        let words = &sentence.words;
        if words.len() == 1 {
            let merge = &mut self.merges[span(0, w)];
            for (m, &e) in merge.iter_mut().zip(embeddings.row(words[0])) {
                *m = e.tanh();
            }
            self.d[span(0, w)].copy_from_slice(&self.merges[span(0, w)]);
            return;
        }

        let root = span(0, w);
        self.d[root.clone()].fill(0.0);
        for k in 1..words.len() {
            let left = embeddings.row(words[k - 1]);
            let right = embeddings.row(words[k]);
            let merge = span(k - 1, w);
            for (c, m) in self.merges[merge].iter_mut().enumerate() {
                *m = (left[c] + right[c]).tanh();
            }
            for c in 0..w {
                self.d[root.start + c] += self.merges[(k - 1) * w + c];
            }
        }
    }

    fn forward_recursive(
        &mut self,
        sentence: &Sentence,
        embeddings: &MatrixRef<'_>,
        tree: &TreeParams<'_>,
        autoencode: bool,
    ) {
        let w = self.width;
        for i in (0..self.nodes).rev() {
            let Some((l, r)) = sentence.children(i) else {
                self.d[span(i, w)].copy_from_slice(embeddings.row(sentence.word_at(i)));
                continue;
            };
            // A unary node composes its child with itself.
            let r = r.unwrap_or(l);
            self.x[..w].copy_from_slice(&self.d[span(l, w)]);
            self.x[w..].copy_from_slice(&self.d[span(r, w)]);

            let z = &mut self.dz[..w];
            z.copy_from_slice(tree.b);
            tree.w.mul_vec_add(&self.x, z);
            for (o, &v) in self.d[span(i, w)].iter_mut().zip(z.iter()) {
                *o = v.tanh();
            }

            if autoencode {
                let rec = &mut self.rec[span(i, 2 * w)];
                rec.copy_from_slice(tree.bd);
                tree.wd.mul_vec_add(&self.d[span(i, w)], rec);
                rec.iter_mut().for_each(|v| *v = v.tanh());
            }
        }
        self.autoencoded = autoencode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, Variant};
    use crate::model::{Model, ModelParams};
    use approx::assert_relative_eq;
    use rae_core::Theta;
    use rae_nlp::Corpus;
    use std::sync::Arc;

    fn setup(variant: Variant, sentences: Vec<Sentence>) -> (Model, Theta) {
        let config = ModelConfig {
            variant,
            word_width: 3,
            ..ModelConfig::default()
        };
        let mut theta = Theta::new();
        let model = Model::new(config, Arc::new(Corpus::new(sentences)), 6, &mut theta, 11).unwrap();
        (model, theta)
    }

    fn root_of(model: &Model, theta: &Theta, sentence: &Sentence) -> Vec<Real> {
        let params = ModelParams::resolve(model, theta).unwrap();
        let mut p = Propagator::for_model(model);
        p.load_with_sentence(sentence);
        p.forward_propagate(sentence, &params, false);
        p.root().to_vec()
    }

    #[test]
    fn test_additive_root_is_order_invariant() {
        let a = Sentence::flat(&[1, 2, 3, 4]).unwrap();
        let b = Sentence::right_branching(&[4, 2, 1, 3]).unwrap();
        let (model, theta) = setup(Variant::Additive, vec![a.clone(), b.clone()]);
        let ra = root_of(&model, &theta, &a);
        let rb = root_of(&model, &theta, &b);
        for (x, y) in ra.iter().zip(&rb) {
            assert_relative_eq!(*x, *y, epsilon = 1e-12);
        }

        let params = ModelParams::resolve(&model, &theta).unwrap();
        let expected: Vec<Real> = (0..3)
            .map(|c| (1..=4).map(|w| params.embeddings.row(w)[c]).sum())
            .collect();
        for (x, y) in ra.iter().zip(&expected) {
            assert_relative_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_additive_avg_is_mean() {
        let s = Sentence::flat(&[2, 5]).unwrap();
        let (model, theta) = setup(Variant::AdditiveAvg, vec![s.clone()]);
        let root = root_of(&model, &theta, &s);
        let params = ModelParams::resolve(&model, &theta).unwrap();
        for c in 0..3 {
            let mean = 0.5 * (params.embeddings.row(2)[c] + params.embeddings.row(5)[c]);
            assert_relative_eq!(root[c], mean, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_flat_tree_sums_adjacent_merges() {
        let s = Sentence::flat(&[1, 2, 3]).unwrap();
        let single = Sentence::flat(&[4]).unwrap();
        let (model, theta) = setup(Variant::FlatTree, vec![s.clone(), single.clone()]);
        let params = ModelParams::resolve(&model, &theta).unwrap();
        let e = |w: usize, c: usize| params.embeddings.row(w)[c];

        let root = root_of(&model, &theta, &s);
        for c in 0..3 {
            let expected = (e(1, c) + e(2, c)).tanh() + (e(2, c) + e(3, c)).tanh();
            assert_relative_eq!(root[c], expected, epsilon = 1e-12);
        }
        let root = root_of(&model, &theta, &single);
        for c in 0..3 {
            assert_relative_eq!(root[c], e(4, c).tanh(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_recursive_unary_node_duplicates_child() {
        let dict = rae_nlp::Dictionary::from_words(["a", "b", "c", "d", "e"]);
        let unary = Sentence::parse_bracketed("(a)", &dict).unwrap();
        let (model, theta) = setup(Variant::Recursive, vec![unary.clone()]);
        let params = ModelParams::resolve(&model, &theta).unwrap();
        let Composition::Recursive(tree) = params.composition else {
            panic!("expected recursive parameters");
        };

        let mut p = Propagator::for_model(&model);
        p.load_with_sentence(&unary);
        p.forward_propagate(&unary, &params, true);

        let leaf = params.embeddings.row(1);
        let mut x = leaf.to_vec();
        x.extend_from_slice(leaf);
        let mut z = tree.b.to_vec();
        tree.w.mul_vec_add(&x, &mut z);
        for (c, v) in z.iter().enumerate() {
            assert_relative_eq!(p.root()[c], v.tanh(), epsilon = 1e-12);
        }
        assert!(p.rec[..6].iter().any(|&v| v != 0.0));
    }
}
