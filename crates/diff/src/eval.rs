//! # Evaluation
//!
//! Read-only passes over trained parameters: label accuracy of one model
//! and paraphrase retrieval between the two sides of a pair.

use rayon::prelude::*;
use tracing::info;

use rae_core::{Accumulate, Real, Theta};
use rae_nlp::{paraphrase_retrieval, ParaphraseResult};

use crate::collector::ClassificationStats;
use crate::error::TrainError;
use crate::model::{BiModel, Model, ModelParams};
use crate::propagator::{DynamicMode, Propagator};

/// Pairs scored by [`paraphrase_test`] at most.
pub const PARAPHRASE_PAIRS: usize = 50;
/// Candidates considered per sentence by [`paraphrase_test`].
pub const PARAPHRASE_WINDOW: usize = 10;

/// Classify every sentence of `model`'s corpus.
///
/// Sentences are spread over rayon workers, each with its own propagator.
pub fn test_model(model: &Model, theta: &Theta) -> Result<ClassificationStats, TrainError> {
    let params = model.params(theta)?;
    let classes = model.config.label_classes;
    let stats = model
        .corpus
        .sentences()
        .par_iter()
        .map_init(
            || Propagator::for_model(model),
            |propagator, sentence| {
                propagator.load_with_sentence(sentence);
                propagator.forward_propagate(sentence, &params, false);
                let correct = propagator.evaluate_sentence(sentence, &params.label);
                let mut stats = ClassificationStats::new(classes);
                stats.record(sentence.label, propagator, correct);
                stats
            },
        )
        .reduce(
            || ClassificationStats::new(classes),
            |mut total, part| {
                total.accumulate(&part);
                total
            },
        );
    info!(
        sentences = stats.sentences,
        accuracy = stats.accuracy(),
        node_accuracy = stats.node_accuracy(),
        "Label evaluation"
    );
    Ok(stats)
}

fn root_vectors(model: &Model, params: &ModelParams<'_>, count: usize) -> Vec<Vec<Real>> {
    let mut propagator = Propagator::for_model(model);
    let width = params.width();
    (0..count)
        .map(|j| {
            let sentence = &model.corpus[model.indexes[j]];
            propagator.load_with_sentence(sentence);
            propagator.forward_propagate(sentence, params, false);
            let mut out = vec![0.0; width];
            propagator.set_dynamic(sentence, &mut out, DynamicMode::Root, 0);
            out
        })
        .collect()
}

/// Nearest-neighbour paraphrase retrieval over the first
/// `min(to, 50)` pairs, with a window of 10 candidates.
pub fn paraphrase_test(pair: &BiModel, theta: &Theta) -> Result<ParaphraseResult, TrainError> {
    let count = pair.a.to.min(pair.b.to).min(PARAPHRASE_PAIRS);
    let a = root_vectors(&pair.a, &pair.a.params(theta)?, count);
    let b = root_vectors(&pair.b, &pair.b.params(theta)?, count);
    let result = paraphrase_retrieval(&a, &b, PARAPHRASE_WINDOW);
    info!(
        correct = result.correct,
        total = result.total,
        mean_cosine = result.mean_cosine,
        "Paraphrase evaluation"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use approx::assert_relative_eq;
    use rae_nlp::{Corpus, Sentence};
    use std::sync::Arc;

    #[test]
    fn test_model_counts_majority_votes() {
        let corpus = Arc::new(Corpus::new(vec![
            Sentence::flat(&[1, 2]).unwrap().with_label(1),
            Sentence::flat(&[3]).unwrap().with_label(0),
            Sentence::flat(&[4, 1, 2]).unwrap().with_label(1),
        ]));
        let config = ModelConfig {
            word_width: 2,
            ..ModelConfig::default()
        };
        let mut theta = Theta::new();
        let model = Model::new(config, corpus, 5, &mut theta, 0).unwrap();
        // Wl = 0, Bl = 5: every sentence is predicted as class 1
        theta
            .store_mut(model.weights)
            .unwrap()
            .as_mut_slice()
            .copy_from_slice(&[0.0, 0.0, 5.0]);

        let stats = test_model(&model, &theta).unwrap();
        assert_eq!(stats.sentences, 3);
        assert_eq!(stats.correct_sentences, 2);
        assert_relative_eq!(stats.accuracy(), 2.0 / 3.0);
    }

    #[test]
    fn test_paraphrase_with_shared_dictionary() {
        let sentences: Vec<Sentence> = (1..=4).map(|w| Sentence::flat(&[w]).unwrap()).collect();
        let corpus = Arc::new(Corpus::new(sentences));
        let mut theta = Theta::new();
        let a = Model::new(ModelConfig::default(), corpus.clone(), 5, &mut theta, 0).unwrap();
        let b = Model::with_shared_dictionary(ModelConfig::default(), corpus, &a, &mut theta, 1).unwrap();
        let pair = BiModel::new(a, b).unwrap();

        let result = paraphrase_test(&pair, &theta).unwrap();
        assert_eq!(result.total, 4);
        assert_eq!(result.correct, 4);
        assert_relative_eq!(result.mean_cosine, 1.0, epsilon = 1e-12);
    }
}
