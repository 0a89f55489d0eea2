//! Epoch bookkeeping shared by the balancers

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// How often (in draws) balancers trace their progress
pub(crate) const PROGRESS_EVERY: usize = 100;

/// Options common to single-partition balancers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpochOptions {
    /// Draw in a fresh random order every epoch
    pub shuffle: bool,

    /// Report [`ml_feed_core::Error::EndOfEpoch`] instead of rolling over
    pub raise_on_end: bool,

    /// Seed for reproducible permutations
    pub seed: Option<u64>,
}

impl Default for EpochOptions {
    fn default() -> Self {
        Self {
            shuffle: true,
            raise_on_end: false,
            seed: None,
        }
    }
}

impl EpochOptions {
    /// Deterministic order, rolling over at epoch end
    pub fn sequential() -> Self {
        Self {
            shuffle: false,
            ..Self::default()
        }
    }

    /// Set the shuffle flag
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Set the raise-on-end flag
    pub fn with_raise_on_end(mut self, raise_on_end: bool) -> Self {
        self.raise_on_end = raise_on_end;
        self
    }

    /// Set the seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

pub(crate) fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Distinct rows drawn during the current epoch
#[derive(Debug, Clone)]
pub(crate) struct Visited {
    seen: Vec<bool>,
    count: usize,
}

impl Visited {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            seen: vec![false; len],
            count: 0,
        }
    }

    pub(crate) fn insert(&mut self, index: usize) {
        if !self.seen[index] {
            self.seen[index] = true;
            self.count += 1;
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.count == self.seen.len()
    }

    pub(crate) fn clear(&mut self) {
        self.seen.iter_mut().for_each(|seen| *seen = false);
        self.count = 0;
    }
}
