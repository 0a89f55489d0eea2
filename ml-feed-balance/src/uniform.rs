//! Uniform balancer: every row once per epoch, in permutation order

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, trace};

use ml_feed_core::{Error, IndexSampler, Result, SampleIndex};

use crate::epoch::{make_rng, EpochOptions, PROGRESS_EVERY};

/// Walks a permutation of `[0, len)`, regenerated every epoch
#[derive(Debug)]
pub struct UniformBalancer {
    len: usize,
    options: EpochOptions,
    perm: Vec<usize>,
    visited: usize,
    rng: StdRng,
}

impl UniformBalancer {
    /// Create a balancer over `len` rows
    pub fn new(len: usize, options: EpochOptions) -> Self {
        let mut balancer = Self {
            len,
            options,
            perm: Vec::new(),
            visited: 0,
            rng: make_rng(options.seed),
        };
        balancer.start_epoch();
        balancer
    }

    fn start_epoch(&mut self) {
        self.perm = (0..self.len).collect();
        if self.options.shuffle {
            self.perm.shuffle(&mut self.rng);
        }
        self.visited = 0;
    }
}

impl IndexSampler for UniformBalancer {
    fn next_index(&mut self) -> Result<SampleIndex> {
        if self.visited == self.len {
            if self.options.raise_on_end {
                return Err(Error::EndOfEpoch);
            }
            debug!("uniform balancer rolling over after {} rows", self.len);
            self.start_epoch();
        }
        if self.len == 0 {
            return Err(Error::EndOfEpoch);
        }

        let index = self.perm[self.visited];
        self.visited += 1;
        if self.visited % PROGRESS_EVERY == 0 {
            trace!("visited {} of {}", self.visited, self.len);
        }
        Ok(SampleIndex::One(index))
    }

    fn reset(&mut self) {
        self.start_epoch();
    }

    fn visited_count(&self) -> usize {
        self.visited
    }

    fn epoch_len(&self) -> usize {
        self.len
    }
}
