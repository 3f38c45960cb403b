//! Per-node seed derivation and the seeded sampling surface handed to skills.
//!
//! ```text
//! node_seed = base_seed + node_index      (node_index >= 1)
//! ```
//!
//! A `SeededRandom` is built from exactly one node seed and must never be
//! shared across nodes or runs.

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use crate::error::{CadenceError, Result};

/// Derive the seed of the node at `node_index` from the run's base seed.
///
/// Fails with `InvalidArgument` if `base_seed < 0`, `node_index < 1`, or the
/// sum overflows.
pub fn derive_seed(base_seed: i64, node_index: i64) -> Result<i64> {
    if base_seed < 0 {
        return Err(CadenceError::InvalidArgument {
            reason: format!("base_seed must be >= 0, got {}", base_seed),
        });
    }
    if node_index < 1 {
        return Err(CadenceError::InvalidArgument {
            reason: format!("node_index must be >= 1, got {}", node_index),
        });
    }
    base_seed
        .checked_add(node_index)
        .ok_or_else(|| CadenceError::InvalidArgument {
            reason: format!("seed overflow: {} + {}", base_seed, node_index),
        })
}

/// Deterministic RNG scoped to one node invocation (PCG64).
#[derive(Debug, Clone)]
pub struct SeededRandom {
    seed: i64,
    rng: Pcg64,
}

impl SeededRandom {
    pub fn new(seed: i64) -> Self {
        Self {
            seed,
            rng: Pcg64::seed_from_u64(seed as u64),
        }
    }

    /// The seed this generator was built from
    pub fn seed(&self) -> i64 {
        self.seed
    }

    /// Uniform integer in `[low, high]` (inclusive)
    pub fn uniform_int(&mut self, low: i64, high: i64) -> Result<i64> {
        if low > high {
            return Err(CadenceError::InvalidArgument {
                reason: format!("empty range [{}, {}]", low, high),
            });
        }
        Ok(self.rng.gen_range(low..=high))
    }

    /// Uniform float in `[0, 1)`
    pub fn uniform_float(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform float in `[low, high)`
    pub fn uniform_range(&mut self, low: f64, high: f64) -> Result<f64> {
        if low >= high || !low.is_finite() || !high.is_finite() {
            return Err(CadenceError::InvalidArgument {
                reason: format!("invalid float range [{}, {})", low, high),
            });
        }
        Ok(self.rng.gen_range(low..high))
    }

    /// Pick one item uniformly, `None` for an empty slice
    pub fn choice<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// Pick one item with probability proportional to its weight
    pub fn weighted_choice<'a, T>(&mut self, items: &'a [T], weights: &[f64]) -> Result<&'a T> {
        if items.len() != weights.len() {
            return Err(CadenceError::InvalidArgument {
                reason: format!(
                    "{} items but {} weights",
                    items.len(),
                    weights.len()
                ),
            });
        }
        let dist = WeightedIndex::new(weights).map_err(|e| CadenceError::InvalidArgument {
            reason: format!("invalid weights: {}", e),
        })?;
        Ok(&items[dist.sample(&mut self.rng)])
    }

    /// Sample `k` distinct items without replacement, in sampled order
    pub fn sample<T: Clone>(&mut self, items: &[T], k: usize) -> Result<Vec<T>> {
        if k > items.len() {
            return Err(CadenceError::InvalidArgument {
                reason: format!("cannot sample {} of {} items", k, items.len()),
            });
        }
        Ok(rand::seq::index::sample(&mut self.rng, items.len(), k)
            .into_iter()
            .map(|i| items[i].clone())
            .collect())
    }

    /// Shuffle in place
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}
