//! Combining several balancers into one

use serde::{Deserialize, Serialize};

use ml_feed_core::{Error, IndexSampler, Result, SampleIndex};

/// How a [`MergedBalancer`] combines its children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// One draw per call, cycling through the children
    #[default]
    RoundRobin,
    /// One draw from every child per call, kept in lockstep
    Joint,
}

/// Several balancers behind one [`IndexSampler`]
pub struct MergedBalancer {
    samplers: Vec<Box<dyn IndexSampler>>,
    mode: MergeMode,
    cursor: usize,
}

impl MergedBalancer {
    /// Merge `samplers`; at least one is required
    pub fn new(samplers: Vec<Box<dyn IndexSampler>>, mode: MergeMode) -> Result<Self> {
        if samplers.is_empty() {
            return Err(Error::Construction("merge needs at least one balancer".into()));
        }
        Ok(Self {
            samplers,
            mode,
            cursor: 0,
        })
    }

    /// Merge mode
    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    /// Number of merged balancers
    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    /// Always false; construction rejects an empty merge
    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }
}

impl std::fmt::Debug for MergedBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergedBalancer")
            .field("mode", &self.mode)
            .field("balancers", &self.samplers.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl IndexSampler for MergedBalancer {
    fn next_index(&mut self) -> Result<SampleIndex> {
        match self.mode {
            MergeMode::RoundRobin => {
                // the cursor only advances on success, so the exhausted child is retried after a reset
                let index = self.samplers[self.cursor].next_index()?;
                self.cursor = (self.cursor + 1) % self.samplers.len();
                Ok(index)
            }
            MergeMode::Joint => self
                .samplers
                .iter_mut()
                .map(|sampler| sampler.next_index())
                .collect::<Result<Vec<_>>>()
                .map(SampleIndex::Many),
        }
    }

    fn reset(&mut self) {
        self.samplers.iter_mut().for_each(|sampler| sampler.reset());
        self.cursor = 0;
    }

    fn visited_count(&self) -> usize {
        self.samplers.iter().map(|sampler| sampler.visited_count()).sum()
    }

    fn epoch_len(&self) -> usize {
        let lens = self.samplers.iter().map(|sampler| sampler.epoch_len());
        match self.mode {
            MergeMode::RoundRobin => lens.sum(),
            MergeMode::Joint => lens.max().unwrap_or(0),
        }
    }
}
