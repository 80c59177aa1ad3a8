//! # Bi-Alignment Tests
//!
//! Joint cost-and-gradient behaviour that the gradient check cannot see:
//! reproducibility across thread counts, document-level writes into the
//! arena, frozen parameter groups and setup validation.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use rae_core::{Real, Theta};
use rae_diff::model::{D, W};
use rae_diff::{
    BiModel, Model, ModelConfig, Objective, Propagator, TrainError, Trainable, Trainer,
    TrainerConfig, Variant,
};
use rae_nlp::{Corpus, Sentence};

const DICT_SIZE: usize = 8;

fn corpus(offset: usize) -> Arc<Corpus> {
    let sentences = (0..6)
        .map(|i| {
            let words = [1 + (i + offset) % 7, 1 + (2 * i + 1) % 7, 1 + (i * 3 + offset) % 7];
            Sentence::flat(&words[..2 + i % 2])
                .unwrap()
                .with_label(i % 2)
                .with_ids(i, i / 2)
        })
        .collect();
    Arc::new(Corpus::new(sentences))
}

fn config() -> ModelConfig {
    ModelConfig {
        variant: Variant::Recursive,
        word_width: 4,
        calc_lbl: true,
        calc_rae: true,
        calc_bi: true,
        ..ModelConfig::default()
    }
}

fn pair(theta: &mut Theta) -> BiModel {
    let a = Model::new(config(), corpus(0), DICT_SIZE, theta, 21).unwrap();
    let b = Model::new(config(), corpus(3), DICT_SIZE, theta, 22).unwrap();
    BiModel::new(a, b).unwrap()
}

fn run(threads: usize, objective: &Objective, theta: &mut Theta) -> (Real, Vec<Real>) {
    let mut trainer = Trainer::new(TrainerConfig {
        threads,
        shards: 3,
        ..TrainerConfig::default()
    })
    .unwrap();
    let mut grad = theta.zeros_like();
    let mut error = 0.0;
    trainer
        .compute_cost_and_grad(objective, theta, &mut grad, 0, &mut error)
        .unwrap();
    (error, grad)
}

#[test]
fn result_independent_of_thread_count() {
    let mut theta = Theta::new();
    let objective = Objective::Joint(pair(&mut theta));

    let (e1, g1) = run(1, &objective, &mut theta.clone());
    let (e4, g4) = run(4, &objective, &mut theta.clone());
    assert_eq!(e1.to_bits(), e4.to_bits());
    let bits = |g: &[Real]| g.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&g1), bits(&g4));
}

#[test]
fn repeated_calls_overwrite_gradient() {
    let mut theta = Theta::new();
    let objective = Objective::Joint(pair(&mut theta));
    let mut trainer = Trainer::new(TrainerConfig::default()).unwrap();

    let mut grad = theta.zeros_like();
    let mut first = 0.0;
    trainer
        .compute_cost_and_grad(&objective, &mut theta, &mut grad, 0, &mut first)
        .unwrap();
    let once = grad.clone();

    let mut second = 0.0;
    trainer
        .compute_cost_and_grad(&objective, &mut theta, &mut grad, 0, &mut second)
        .unwrap();
    assert_eq!(once, grad);
    assert_eq!(first, second);
    assert!(trainer.last_stats().sentences > 0);
}

#[test]
fn document_roots_are_written_into_theta() {
    let mut theta = Theta::new();
    let doc_config = ModelConfig {
        variant: Variant::Additive,
        word_width: 4,
        ..ModelConfig::default()
    };
    let pair = pair(&mut theta).with_documents(doc_config, &mut theta, 40).unwrap();
    let docs = pair.docmod.as_deref().unwrap();
    assert_eq!(docs.a.corpus.len(), 3);
    assert_eq!(docs.a.dict_size, 6);
    let doc_dict_a = docs.a.dictionary;
    let objective = Objective::Joint(pair.clone());

    let mut trainer = Trainer::new(TrainerConfig::default()).unwrap();
    let mut grad = theta.zeros_like();
    let mut error = 0.0;
    trainer
        .compute_cost_and_grad(&objective, &mut theta, &mut grad, 0, &mut error)
        .unwrap();
    assert!(error.is_finite());

    // Sentence roots of A now sit in A's document dictionary, row = sentence id.
    let params = pair.a.params(&theta).unwrap();
    let mut propagator = Propagator::for_model(&pair.a);
    for (j, sentence) in pair.a.corpus.iter().enumerate() {
        propagator.load_with_sentence(sentence);
        propagator.forward_propagate(sentence, &params, false);
        let stored = theta.store(doc_dict_a).unwrap().matrix(D).unwrap().row(j).to_vec();
        assert_eq!(stored, propagator.root());
    }

    // Later iterations feed the document gradient back into the sentences.
    let mut later = 0.0;
    trainer
        .compute_cost_and_grad(&objective, &mut theta, &mut grad, 1, &mut later)
        .unwrap();
    assert!(later.is_finite());
}

#[test]
fn document_gradient_feeds_back_into_sentence_roots() {
    let width = 4;
    let sentence_config = ModelConfig {
        variant: Variant::Additive,
        word_width: width,
        calc_lbl: true,
        calc_bi: true,
        ..ModelConfig::default()
    };
    let doc_config = ModelConfig {
        variant: Variant::Additive,
        word_width: width,
        ..ModelConfig::default()
    };
    let mut theta = Theta::new();
    let a = Model::new(sentence_config.clone(), corpus(0), DICT_SIZE, &mut theta, 31).unwrap();
    let b = Model::new(sentence_config, corpus(3), DICT_SIZE, &mut theta, 32).unwrap();
    let pair = BiModel::new(a, b)
        .unwrap()
        .with_documents(doc_config, &mut theta, 33)
        .unwrap();
    let (dict_a, doc_dict_a) = (pair.a.dictionary, pair.docmod.as_deref().unwrap().a.dictionary);
    let sentences = Arc::clone(&pair.a.corpus);
    let objective = Objective::Joint(pair);

    let mut trainer = Trainer::new(TrainerConfig::default()).unwrap();
    let mut grad = theta.zeros_like();
    let mut error = 0.0;
    for _ in 0..2 {
        trainer
            .compute_cost_and_grad(&objective, &mut theta, &mut grad, 0, &mut error)
            .unwrap();
    }
    let feedback = theta.view_in(doc_dict_a, &grad).unwrap().as_slice().to_vec();
    let before = theta.view_in(dict_a, &grad).unwrap().as_slice().to_vec();
    assert!(feedback.iter().any(|&g| g != 0.0));

    trainer
        .compute_cost_and_grad(&objective, &mut theta, &mut grad, 1, &mut error)
        .unwrap();
    let after = theta.view_in(dict_a, &grad).unwrap().as_slice().to_vec();

    // Additive roots pass their gradient unchanged to every leaf, so each
    // word moves by the document row of every sentence it occurs in.
    let mut expected = before.clone();
    for sentence in sentences.iter() {
        let row = &feedback[sentence.id * width..(sentence.id + 1) * width];
        for &word in &sentence.words {
            for (e, r) in expected[word * width..(word + 1) * width].iter_mut().zip(row) {
                *e += r;
            }
        }
    }
    assert_ne!(before, after);
    for (e, got) in expected.iter().zip(&after) {
        assert_abs_diff_eq!(*e, *got, epsilon = 1e-10);
    }
}

#[test]
fn frozen_groups_report_zero_gradient() {
    let mut theta = Theta::new();
    let mut pair = pair(&mut theta);
    pair.a.bools = Trainable {
        w: false,
        d: false,
        ..Trainable::default()
    };
    let (a_weights, a_dict) = (pair.a.weights, pair.a.dictionary);
    let (b_weights, b_dict) = (pair.b.weights, pair.b.dictionary);
    let objective = Objective::Joint(pair);
    let (_, grad) = run(2, &objective, &mut theta);

    let view = |id| theta.view_in(id, &grad).unwrap();
    assert!(view(a_weights).matrix(W).unwrap().as_slice().iter().all(|&g| g == 0.0));
    assert!(view(a_dict).as_slice().iter().all(|&g| g == 0.0));
    assert!(view(b_weights).matrix(W).unwrap().as_slice().iter().any(|&g| g != 0.0));
    assert!(view(b_dict).as_slice().iter().any(|&g| g != 0.0));
}

#[test]
fn bi_needs_two_sentences_per_window() {
    let mut theta = Theta::new();
    let mut objective = Objective::Joint(pair(&mut theta));
    objective.set_window(2, 3).unwrap();
    let mut trainer = Trainer::new(TrainerConfig::default()).unwrap();
    let mut grad = theta.zeros_like();
    let mut error = 0.0;
    let err = trainer
        .compute_cost_and_grad(&objective, &mut theta, &mut grad, 0, &mut error)
        .unwrap_err();
    assert!(matches!(err, TrainError::Config { .. }));
}

#[test]
fn shared_dictionary_frozen_on_one_side_rejected() {
    let config = ModelConfig {
        word_width: 4,
        calc_bi: true,
        ..ModelConfig::default()
    };
    let mut theta = Theta::new();
    let a = Model::new(config.clone(), corpus(0), DICT_SIZE, &mut theta, 1).unwrap();
    let b = Model::with_shared_dictionary(config, corpus(3), &a, &mut theta, 2).unwrap();
    let mut pair = BiModel::new(a, b).unwrap();
    pair.b.bools.d = false;

    let mut trainer = Trainer::new(TrainerConfig::default()).unwrap();
    let mut grad = theta.zeros_like();
    let mut error = 0.0;
    let err = trainer
        .compute_cost_and_grad(&Objective::Joint(pair), &mut theta, &mut grad, 0, &mut error)
        .unwrap_err();
    assert!(matches!(err, TrainError::Config { .. }));
}

#[test]
fn mismatched_windows_rejected() {
    let mut theta = Theta::new();
    let mut pair = pair(&mut theta);
    pair.b.set_window(0, 4).unwrap();
    let mut trainer = Trainer::new(TrainerConfig::default()).unwrap();
    let mut grad = theta.zeros_like();
    let mut error = 0.0;
    let err = trainer
        .compute_cost_and_grad(&Objective::Joint(pair), &mut theta, &mut grad, 0, &mut error)
        .unwrap_err();
    assert!(matches!(err, TrainError::Config { .. }));
}

#[test]
fn gradient_check_rejects_documents() {
    let mut theta = Theta::new();
    let doc_config = ModelConfig {
        word_width: 4,
        ..ModelConfig::default()
    };
    let pair = pair(&mut theta).with_documents(doc_config, &mut theta, 1).unwrap();
    let err = rae_diff::finite_grad_check(
        &mut Trainer::new(TrainerConfig::default()).unwrap(),
        &Objective::Joint(pair),
        &mut theta,
        1e-3,
    )
    .unwrap_err();
    assert!(matches!(err, TrainError::Config { .. }));
}

#[cfg(feature = "throughprop")]
#[test]
fn throughprop_unfolds_through_the_partner_tree() {
    let mut theta = Theta::new();
    let pair = pair(&mut theta);
    let mut through = pair.clone();
    through.a.config.calc_through = true;

    let (plain_error, plain_grad) = run(2, &Objective::Joint(pair), &mut theta);
    let (through_error, through_grad) = run(2, &Objective::Joint(through), &mut theta);
    assert!(through_error.is_finite());
    assert!(through_error > plain_error);
    assert_ne!(plain_grad, through_grad);
}

#[cfg(feature = "throughprop")]
#[test]
fn throughprop_needs_an_unfolding_partner() {
    let mut theta = Theta::new();
    let a_config = ModelConfig {
        calc_through: true,
        ..config()
    };
    let b_config = ModelConfig {
        variant: Variant::Additive,
        calc_rae: false,
        ..config()
    };
    let a = Model::new(a_config, corpus(0), DICT_SIZE, &mut theta, 1).unwrap();
    let b = Model::new(b_config, corpus(3), DICT_SIZE, &mut theta, 2).unwrap();
    let objective = Objective::Joint(BiModel::new(a, b).unwrap());

    let mut trainer = Trainer::new(TrainerConfig::default()).unwrap();
    let mut grad = theta.zeros_like();
    let mut error = 0.0;
    let err = trainer
        .compute_cost_and_grad(&objective, &mut theta, &mut grad, 0, &mut error)
        .unwrap_err();
    assert!(matches!(err, TrainError::Config { .. }));
}
