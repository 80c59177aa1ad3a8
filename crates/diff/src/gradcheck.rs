//! # Finite-Difference Gradient Check
//!
//! Compares the analytical gradient of [`Trainer::compute_cost_and_grad`]
//! with central differences
//!
//! ```text
//! (J(θ + δ e_k) − J(θ − δ e_k)) / 2δ
//! ```
//!
//! for every parameter, or every `stride`-th one. The arena is restored
//! exactly after each probe.

use rae_core::{Real, StoreId, Theta};
use tracing::debug;

use crate::error::TrainError;
use crate::model::Objective;
use crate::trainer::Trainer;

/// One probed coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct GradEntry {
    pub store: StoreId,
    pub region: String,
    /// Index inside the region.
    pub elem_idx: usize,
    pub analytical: Real,
    pub numerical: Real,
}

impl GradEntry {
    pub fn diff(&self) -> Real {
        (self.analytical - self.numerical).abs()
    }
}

/// Worst mismatch inside one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSummary {
    pub store: StoreId,
    pub region: String,
    pub checked: usize,
    pub max_abs_diff: Real,
    pub worst_idx: usize,
}

/// Result of a gradient check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradCheckReport {
    /// Cost at the unperturbed parameters.
    pub cost: Real,
    pub entries: Vec<GradEntry>,
}

impl GradCheckReport {
    pub fn max_abs_diff(&self) -> Real {
        self.entries.iter().map(GradEntry::diff).fold(0.0, Real::max)
    }

    /// Per-region summaries in arena order.
    pub fn regions(&self) -> Vec<RegionSummary> {
        let mut out: Vec<RegionSummary> = Vec::new();
        for e in &self.entries {
            let diff = e.diff();
            match out.last_mut() {
                Some(last) if last.store == e.store && last.region == e.region => {
                    last.checked += 1;
                    if diff > last.max_abs_diff {
                        last.max_abs_diff = diff;
                        last.worst_idx = e.elem_idx;
                    }
                }
                _ => out.push(RegionSummary {
                    store: e.store,
                    region: e.region.clone(),
                    checked: 1,
                    max_abs_diff: diff,
                    worst_idx: e.elem_idx,
                }),
            }
        }
        out
    }

    /// First entry whose difference exceeds `tolerance` both absolutely and
    /// relative to `max(|analytical|, |numerical|, 1)`.
    pub fn check(&self, tolerance: Real) -> Result<(), GradCheckError> {
        for e in &self.entries {
            let diff = e.diff();
            let scale = e.analytical.abs().max(e.numerical.abs()).max(1.0);
            if diff / scale > tolerance && diff > tolerance {
                return Err(GradCheckError {
                    store: e.store.index(),
                    region: e.region.clone(),
                    elem_idx: e.elem_idx,
                    analytical: e.analytical,
                    numerical: e.numerical,
                    diff,
                });
            }
        }
        Ok(())
    }
}

/// Error from gradient checking.
#[derive(Debug, Clone, PartialEq)]
pub struct GradCheckError {
    pub store: usize,
    pub region: String,
    pub elem_idx: usize,
    pub analytical: Real,
    pub numerical: Real,
    pub diff: Real,
}

impl std::fmt::Display for GradCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Gradient mismatch at store[{}].{}[{}]: analytical={}, numerical={}, diff={}",
            self.store, self.region, self.elem_idx, self.analytical, self.numerical, self.diff
        )
    }
}

impl std::error::Error for GradCheckError {}

/// Check every parameter of `theta`.
pub fn finite_grad_check(
    trainer: &mut Trainer,
    objective: &Objective,
    theta: &mut Theta,
    delta: Real,
) -> Result<GradCheckReport, TrainError> {
    finite_grad_check_strided(trainer, objective, theta, delta, 1)
}

/// Check every `stride`-th parameter of `theta`.
///
/// Document pairs are rejected: their forward pass writes into the arena,
/// so the cost is not a function of `theta` alone.
pub fn finite_grad_check_strided(
    trainer: &mut Trainer,
    objective: &Objective,
    theta: &mut Theta,
    delta: Real,
    stride: usize,
) -> Result<GradCheckReport, TrainError> {
    if let Objective::Joint(pair) = objective {
        if pair.docmod.is_some() {
            return Err(TrainError::config(
                "gradient check is undefined with a document pair attached",
            ));
        }
    }
    if stride == 0 || delta <= 0.0 {
        return Err(TrainError::config("gradient check needs stride > 0 and delta > 0"));
    }

    let mut analytic = theta.zeros_like();
    let mut scratch = theta.zeros_like();
    let mut cost = 0.0;
    trainer.compute_cost_and_grad(objective, theta, &mut analytic, 0, &mut cost)?;

    let probes: Vec<(StoreId, String, usize, usize)> = theta
        .segments()
        .flat_map(|(id, segment)| {
            let base = segment.offset();
            segment
                .layout()
                .regions()
                .flat_map(move |r| {
                    let name = r.name.to_string();
                    (0..r.len()).map(move |e| (id, name.clone(), e, base + r.offset + e))
                })
                .collect::<Vec<_>>()
        })
        .step_by(stride)
        .collect();

    let mut entries = Vec::with_capacity(probes.len());
    for (store, region, elem_idx, k) in probes {
        let saved = theta.as_slice()[k];

        theta.as_mut_slice()[k] = saved + delta;
        let mut plus = 0.0;
        trainer.compute_cost_and_grad(objective, theta, &mut scratch, 0, &mut plus)?;

        theta.as_mut_slice()[k] = saved - delta;
        let mut minus = 0.0;
        trainer.compute_cost_and_grad(objective, theta, &mut scratch, 0, &mut minus)?;

        theta.as_mut_slice()[k] = saved;
        entries.push(GradEntry {
            store,
            region,
            elem_idx,
            analytical: analytic[k],
            numerical: (plus - minus) / (2.0 * delta),
        });
    }

    let report = GradCheckReport { cost, entries };
    for summary in report.regions() {
        debug!(
            store = summary.store.index(),
            region = %summary.region,
            checked = summary.checked,
            max_abs_diff = summary.max_abs_diff,
            "Gradient check"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(region: &str, idx: usize, analytical: Real, numerical: Real) -> GradEntry {
        GradEntry {
            store: StoreId::default(),
            region: region.to_string(),
            elem_idx: idx,
            analytical,
            numerical,
        }
    }

    #[test]
    fn test_report_regions_and_check() {
        let report = GradCheckReport {
            cost: 1.0,
            entries: vec![
                entry("Wl", 0, 1.0, 1.0),
                entry("Wl", 1, 0.5, 0.4),
                entry("Bl", 0, 0.0, 0.0),
            ],
        };
        let regions = report.regions();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].checked, 2);
        assert_eq!(regions[0].worst_idx, 1);
        assert!(report.check(0.2).is_ok());

        let err = report.check(1e-3).unwrap_err();
        assert_eq!((err.region.as_str(), err.elem_idx), ("Wl", 1));
        assert!(err.to_string().starts_with("Gradient mismatch at store[0].Wl[1]"));
    }

    #[test]
    fn test_relative_scale_for_large_values() {
        let report = GradCheckReport {
            cost: 0.0,
            entries: vec![entry("D", 0, 1000.0, 1000.5)],
        };
        assert!(report.check(1e-3).is_ok());
        assert!(report.check(1e-4).is_err());
    }
}
