//! # Strided Shards and Ordered Reduction
//!
//! A minibatch `[from, to)` is split into `S` logical shards by striding:
//! shard `s` owns positions `from+s, from+s+S, from+s+2S, ...`. Each shard
//! carries its own working state and partial accumulators, so no two workers
//! ever touch the same buffers.
//!
//! ## Pattern: Fan-out → Process → Fan-in
//!
//! ```text
//!              ┌──────────────┐
//!   [from,to) ─│ shard 0      │── partial 0 ─┐
//!              ├──────────────┤              │   ┌──────────────┐
//!             ─│ shard 1      │── partial 1 ─┼───│ OrderedSum   │── total
//!              ├──────────────┤              │   └──────────────┘
//!             ─│ shard S-1    │── partial S-1┘
//!              └──────────────┘
//! ```
//!
//! Partials are combined in shard order, so the total depends on the shard
//! count only and never on how many threads executed the shards.

use rayon::prelude::*;

use crate::error::CoreError;
use crate::Real;

/// Positions of shard `shard` out of `shards` within `[from, to)`.
///
/// # Panics
///
/// Panics if `shards == 0`.
pub fn strided(from: usize, to: usize, shard: usize, shards: usize) -> impl Iterator<Item = usize> {
    assert!(shards > 0, "Need at least one shard");
    (from + shard..to.max(from + shard)).step_by(shards)
}

/// A fixed pool of worker threads executing shards.
pub struct ShardPool {
    pool: rayon::ThreadPool,
}

impl ShardPool {
    /// Build a pool with `threads` workers (`0` uses rayon's default).
    pub fn new(threads: usize) -> Result<Self, CoreError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("rae-shard-{}", i))
            .build()
            .map_err(|e| CoreError::PoolError {
                reason: e.to_string(),
            })?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `f` on every shard state. Results come back in shard order.
    pub fn map_shards<S, R, F>(&self, shards: &mut [S], f: F) -> Vec<R>
    where
        S: Send,
        R: Send,
        F: Fn(usize, &mut S) -> R + Sync + Send,
    {
        self.pool.install(|| {
            shards
                .par_iter_mut()
                .enumerate()
                .map(|(i, state)| f(i, state))
                .collect()
        })
    }
}

impl std::fmt::Debug for ShardPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardPool")
            .field("threads", &self.threads())
            .finish()
    }
}

// ============================================================================
// Combiners: Fan-in patterns for merging shard partials
// ============================================================================

/// A combiner merges results from parallel shards.
pub trait Combiner<T> {
    /// The output type after combining.
    type Output;

    /// Combine multiple results into a single output.
    fn combine(&self, results: Vec<T>) -> Self::Output;
}

/// A value that can absorb another value of the same kind.
pub trait Accumulate: Default {
    fn accumulate(&mut self, other: &Self);
}

impl Accumulate for Real {
    fn accumulate(&mut self, other: &Self) {
        *self += other;
    }
}

impl Accumulate for usize {
    fn accumulate(&mut self, other: &Self) {
        *self += other;
    }
}

impl Accumulate for Vec<Real> {
    fn accumulate(&mut self, other: &Self) {
        if self.is_empty() {
            self.extend_from_slice(other);
            return;
        }
        assert_eq!(self.len(), other.len(), "Partial buffers differ in length");
        for (a, b) in self.iter_mut().zip(other) {
            *a += b;
        }
    }
}

/// Sums partials left to right, in the order given.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedSum;

impl<T: Accumulate> Combiner<T> for OrderedSum {
    type Output = T;

    fn combine(&self, results: Vec<T>) -> T {
        let mut total = T::default();
        for r in &results {
            total.accumulate(r);
        }
        total
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strided_positions() {
        let got: Vec<_> = strided(10, 20, 1, 4).collect();
        assert_eq!(got, vec![11, 15, 19]);
    }

    #[test]
    fn test_strided_partition_is_complete() {
        for from in 0..5 {
            for to in from..from + 23 {
                for shards in 1..9 {
                    let mut seen = vec![0usize; to];
                    for s in 0..shards {
                        for i in strided(from, to, s, shards) {
                            seen[i] += 1;
                        }
                    }
                    assert!(seen[..from].iter().all(|&c| c == 0));
                    assert!(
                        seen[from..to].iter().all(|&c| c == 1),
                        "gap or duplicate for from={} to={} shards={}",
                        from,
                        to,
                        shards
                    );
                }
            }
        }
    }

    #[test]
    fn test_more_shards_than_positions() {
        assert_eq!(strided(3, 5, 4, 8).count(), 0);
        assert_eq!(strided(3, 5, 1, 8).collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_map_shards_preserves_order() {
        let pool = ShardPool::new(3).unwrap();
        let mut states: Vec<Vec<usize>> = vec![Vec::new(); 5];
        let sums = pool.map_shards(&mut states, |s, state| {
            state.extend(strided(0, 17, s, 5));
            state.iter().sum::<usize>()
        });
        let expected: Vec<usize> = (0..5).map(|s| strided(0, 17, s, 5).sum()).collect();
        assert_eq!(sums, expected);
        assert_eq!(states[2], vec![2, 7, 12]);
    }

    #[test]
    fn test_ordered_sum() {
        let parts = vec![vec![1.0, 2.0], vec![0.5, 0.5], vec![-1.0, 0.0]];
        assert_eq!(OrderedSum.combine(parts), vec![0.5, 2.5]);
        let errors: Real = OrderedSum.combine(vec![0.25, 0.5]);
        assert_eq!(errors, 0.75);
    }

    #[test]
    fn test_reduction_independent_of_thread_count() {
        let values: Vec<Real> = (0..101).map(|i| (i as Real * 0.37).sin() * 1e3).collect();
        let run = |threads: usize| -> Real {
            let pool = ShardPool::new(threads).unwrap();
            let mut states = vec![0.0 as Real; 7];
            pool.map_shards(&mut states, |s, acc| {
                for i in strided(0, values.len(), s, 7) {
                    *acc += values[i];
                }
            });
            OrderedSum.combine(states)
        };
        assert_eq!(run(1).to_bits(), run(4).to_bits());
    }
}
