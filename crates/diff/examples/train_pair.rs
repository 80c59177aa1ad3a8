//! Joint training of two recursive models on a toy parallel corpus
//!
//! Run with: RUST_LOG=info cargo run -p rae-diff --example train_pair
//!
//! This example demonstrates:
//! - Building paired corpora from bracketed trees
//! - Two recursive models sharing one dictionary
//! - A finite-difference check before training
//! - AdaGrad over minibatches, then paraphrase retrieval

use std::sync::Arc;

use rae_core::Theta;
use rae_diff::gradcheck::finite_grad_check_strided;
use rae_diff::{
    paraphrase_test, AdaGrad, AdaGradConfig, BiModel, Model, ModelConfig, Objective, Trainer,
    TrainerConfig, Variant,
};
use rae_nlp::{Corpus, Dictionary, Sentence};
use tracing_subscriber::EnvFilter;

const SIDE_A: &[&str] = &[
    "((the cat) sat)",
    "((a dog) (ran home))",
    "((the bird) sang)",
    "(birds (fly south))",
    "((the cat) (ate fish))",
    "((a dog) barked)",
    "((the sun) rose)",
    "(rain (fell hard))",
];

const SIDE_B: &[&str] = &[
    "((die katze) sass)",
    "((ein hund) (lief heim))",
    "((der vogel) sang)",
    "(voegel (fliegen suedwaerts))",
    "((die katze) (frass fisch))",
    "((ein hund) bellte)",
    "((die sonne) ging)",
    "(regen (fiel stark))",
];

fn parse_side(lines: &[&str], dict: &mut Dictionary) -> Corpus {
    for line in lines {
        for token in line.split(|c: char| c == '(' || c == ')' || c.is_whitespace()) {
            if !token.is_empty() {
                dict.insert(token);
            }
        }
    }
    lines
        .iter()
        .filter_map(|line| Sentence::parse_bracketed(line, dict).ok())
        .collect()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    println!("=== Joint Recursive Autoencoders ===\n");

    let mut dict = Dictionary::new();
    let corpus_a = Arc::new(parse_side(SIDE_A, &mut dict));
    let corpus_b = Arc::new(parse_side(SIDE_B, &mut dict));
    println!("Dictionary: {} words, {} sentence pairs", dict.len(), corpus_a.len());

    let config = ModelConfig {
        variant: Variant::Recursive,
        word_width: 8,
        calc_rae: true,
        calc_bi: true,
        ..ModelConfig::default()
    };
    let mut theta = Theta::new();
    let a = Model::new(config.clone(), corpus_a, dict.len(), &mut theta, 1).unwrap();
    let b = Model::with_shared_dictionary(config, corpus_b, &a, &mut theta, 2).unwrap();
    let mut objective = Objective::Joint(BiModel::new(a, b).unwrap());
    println!("Parameters: {}", theta.len());

    let mut trainer = Trainer::new(TrainerConfig::default()).unwrap();
    let report = finite_grad_check_strided(&mut trainer, &objective, &mut theta, 1e-4, 7).unwrap();
    println!("Gradient check: max |analytic - numeric| = {:.2e}", report.max_abs_diff());
    for region in report.regions() {
        println!("  store[{}].{:<3} {:.2e}", region.store.index(), region.region, region.max_abs_diff);
    }

    if let Objective::Joint(pair) = &objective {
        println!("\nBefore training: {}", paraphrase_test(pair, &theta).unwrap());
    }

    let mut adagrad = AdaGrad::new(AdaGradConfig {
        eta: 0.05,
        iterations: 30,
        batches: 4,
        ..AdaGradConfig::default()
    });
    let errors = adagrad.run(&mut trainer, &mut objective, &mut theta).unwrap();
    if let (Some(first), Some(last)) = (errors.first(), errors.last()) {
        println!("\nError: {:.4} -> {:.4}", first, last);
    }

    if let Objective::Joint(pair) = &objective {
        println!("After training:  {}", paraphrase_test(pair, &theta).unwrap());
    }
}
