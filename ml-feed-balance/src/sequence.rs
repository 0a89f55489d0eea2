//! Fixed-length sequences of consecutive draws

use ml_feed_core::{Error, IndexSampler, Result, SampleIndex};

/// Groups `length` consecutive draws of an inner sampler into one [`SampleIndex::Many`]
pub struct SequenceBalancer {
    inner: Box<dyn IndexSampler>,
    length: usize,
}

impl SequenceBalancer {
    /// Wrap `inner`; `length` must be at least 1
    pub fn new(inner: Box<dyn IndexSampler>, length: usize) -> Result<Self> {
        if length == 0 {
            return Err(Error::Construction("sequence length must be at least 1".into()));
        }
        Ok(Self { inner, length })
    }

    /// Number of draws per sequence
    pub fn length(&self) -> usize {
        self.length
    }
}

impl std::fmt::Debug for SequenceBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceBalancer")
            .field("length", &self.length)
            .field("epoch_len", &self.inner.epoch_len())
            .finish_non_exhaustive()
    }
}

impl IndexSampler for SequenceBalancer {
    /// A partially drawn sequence is discarded when the inner sampler ends its epoch
    fn next_index(&mut self) -> Result<SampleIndex> {
        let items = (0..self.length)
            .map(|_| self.inner.next_index())
            .collect::<Result<Vec<_>>>()?;
        Ok(SampleIndex::Many(items))
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn visited_count(&self) -> usize {
        self.inner.visited_count()
    }

    fn epoch_len(&self) -> usize {
        self.inner.epoch_len()
    }
}
