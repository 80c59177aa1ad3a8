//! # Optimizer Tests
//!
//! Short runs of the SGD and AdaGrad drivers on small corpora.

use std::sync::Arc;

use rae_core::Theta;
use rae_diff::{
    AdaGrad, AdaGradConfig, BiModel, Model, ModelConfig, NoiseResample, Objective, Sgd, SgdConfig,
    Trainer, TrainerConfig, Variant,
};
use rae_nlp::{Corpus, Sentence};

fn labelled_corpus() -> Arc<Corpus> {
    let sentences = (0..8)
        .map(|i| {
            let label = i % 2;
            // class 1 sentences use words 1..=3, class 0 words 4..=6
            let base = if label == 1 { 1 } else { 4 };
            Sentence::flat(&[base + i % 3, base + (i + 1) % 3])
                .unwrap()
                .with_label(label)
        })
        .collect();
    Arc::new(Corpus::new(sentences))
}

fn single(theta: &mut Theta) -> Objective {
    let config = ModelConfig {
        variant: Variant::Additive,
        word_width: 4,
        calc_lbl: true,
        ..ModelConfig::default()
    };
    Objective::Single(Model::new(config, labelled_corpus(), 7, theta, 13).unwrap())
}

#[test]
fn adagrad_error_decreases() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut theta = Theta::new();
    let mut objective = single(&mut theta);
    let mut trainer = Trainer::new(TrainerConfig::default()).unwrap();
    let mut adagrad = AdaGrad::new(AdaGradConfig {
        eta: 0.1,
        iterations: 15,
        batches: 4,
        ..AdaGradConfig::default()
    });

    let errors = adagrad.run(&mut trainer, &mut objective, &mut theta).unwrap();
    assert_eq!(errors.len(), 15);
    assert!(errors.iter().all(|e| e.is_finite()));
    assert!(errors[14] < errors[0], "{:?}", errors);
    assert_eq!(objective.primary().window(), 0..8);
    assert_eq!(adagrad.history().len(), theta.len());
}

#[test]
fn sgd_error_decreases() {
    let mut theta = Theta::new();
    let mut objective = single(&mut theta);
    let mut trainer = Trainer::new(TrainerConfig::default()).unwrap();
    let mut sgd = Sgd::new(SgdConfig {
        eta: 0.02,
        iterations: 10,
    });

    let errors = sgd.run(&mut trainer, &mut objective, &mut theta).unwrap();
    assert!(errors[9] < errors[0], "{:?}", errors);
}

#[test]
fn adagrad_joint_restores_lambdas_and_window() {
    let config = ModelConfig {
        word_width: 4,
        calc_bi: true,
        ..ModelConfig::default()
    };
    let mut theta = Theta::new();
    let a = Model::new(config.clone(), labelled_corpus(), 7, &mut theta, 1).unwrap();
    let b = Model::with_shared_dictionary(config, labelled_corpus(), &a, &mut theta, 2).unwrap();
    let mut objective = Objective::Joint(BiModel::new(a, b).unwrap());
    let lambdas = objective.primary().lambdas;

    let mut trainer = Trainer::new(TrainerConfig::default()).unwrap();
    let mut adagrad = AdaGrad::new(AdaGradConfig {
        iterations: 3,
        batches: 3,
        noise_resample: NoiseResample::Minibatch,
        ..AdaGradConfig::default()
    });
    let errors = adagrad.run(&mut trainer, &mut objective, &mut theta).unwrap();
    assert!(errors.iter().all(|e| e.is_finite() && *e > 0.0));
    assert_eq!(objective.primary().lambdas, lambdas);
    assert_eq!(objective.primary().window(), 0..8);

    // batches of 2, 2 and 4 sentences: the offset stays inside 1..2
    assert_eq!(objective.primary().noise.noise_sample_offset, 1);
}
