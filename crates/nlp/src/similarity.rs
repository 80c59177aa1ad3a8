//! # Similarity and Paraphrase Retrieval
//!
//! Metrics over sentence vectors. Paraphrase retrieval asks, for each
//! sentence on side A, whether its true partner is the nearest of a small
//! window of side-B candidates.

use rae_core::view::{dot, squared_distance, squared_norm};
use rae_core::Real;

/// Cosine similarity, `0.0` when either vector has (near) zero norm.
pub fn cosine_similarity(v1: &[Real], v2: &[Real]) -> Real {
    let n1 = squared_norm(v1).sqrt();
    let n2 = squared_norm(v2).sqrt();
    if n1 < 1e-10 || n2 < 1e-10 {
        0.0
    } else {
        dot(v1, v2) / (n1 * n2)
    }
}

/// Results from paraphrase retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct ParaphraseResult {
    /// Pairs whose partner was the nearest candidate.
    pub correct: usize,
    /// Number of evaluated pairs.
    pub total: usize,
    /// Mean cosine between each sentence and its true partner.
    pub mean_cosine: Real,
}

impl ParaphraseResult {
    pub fn accuracy(&self) -> Real {
        if self.total == 0 {
            0.0
        } else {
            self.correct as Real / self.total as Real
        }
    }
}

impl std::fmt::Display for ParaphraseResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Paraphrase: {}/{} correct ({:.2}%), mean cosine {:.4}",
            self.correct,
            self.total,
            100.0 * self.accuracy(),
            self.mean_cosine
        )
    }
}

/// Nearest-neighbour retrieval in a sliding window.
///
/// For sentence `a`, the candidates are the `window` B-vectors starting
/// `window / 2` positions before `a` (wrapping around), so the partner is
/// always among them. The nearest by squared distance wins; ties keep the
/// earlier candidate.
pub fn paraphrase_retrieval(a: &[Vec<Real>], b: &[Vec<Real>], window: usize) -> ParaphraseResult {
    let length = a.len().min(b.len());
    if length == 0 {
        return ParaphraseResult {
            correct: 0,
            total: 0,
            mean_cosine: 0.0,
        };
    }
    let window = window.clamp(1, length);
    let back = window / 2;

    let mut correct = 0;
    let mut cosine_sum = 0.0;
    for i in 0..length {
        let start = (i + length - back % length) % length;
        let mut closest = start;
        let mut best = squared_distance(&a[i], &b[start]);
        for c in 1..window {
            let j = (start + c) % length;
            let d = squared_distance(&a[i], &b[j]);
            if d < best {
                best = d;
                closest = j;
            }
        }
        if closest == i {
            correct += 1;
        }
        cosine_sum += cosine_similarity(&a[i], &b[i]);
    }
    ParaphraseResult {
        correct,
        total: length,
        mean_cosine: cosine_sum / length as Real,
    }
}
