//! Index sampler trait shared by all balancing policies

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A draw from an index sampler.
///
/// Plain balancers yield [`SampleIndex::One`]; sequence and joint merge
/// balancers yield [`SampleIndex::Many`], which may nest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleIndex {
    /// A single dataset row
    One(usize),
    /// An ordered group of draws
    Many(Vec<SampleIndex>),
}

impl SampleIndex {
    /// The single index, if this is a plain draw
    pub fn as_one(&self) -> Option<usize> {
        match self {
            SampleIndex::One(index) => Some(*index),
            SampleIndex::Many(_) => None,
        }
    }

    /// Every dataset row referenced by this draw, depth first
    pub fn flatten(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<usize>) {
        match self {
            SampleIndex::One(index) => out.push(*index),
            SampleIndex::Many(items) => items.iter().for_each(|item| item.flatten_into(out)),
        }
    }
}

impl From<usize> for SampleIndex {
    fn from(index: usize) -> Self {
        SampleIndex::One(index)
    }
}

impl fmt::Display for SampleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleIndex::One(index) => write!(f, "{index}"),
            SampleIndex::Many(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// A stateful index-selection policy.
///
/// Samplers are not thread-safe by contract: one owner calls
/// [`IndexSampler::next_index`]. Exhaustion is reported as
/// [`crate::Error::EndOfEpoch`].
pub trait IndexSampler: Send {
    /// Draw the next index
    fn next_index(&mut self) -> Result<SampleIndex>;

    /// Restart the epoch
    fn reset(&mut self);

    /// Number of draws (or distinct rows, per policy) counted towards the current epoch
    fn visited_count(&self) -> usize;

    /// Number of rows one epoch covers
    fn epoch_len(&self) -> usize;
}

impl<S: IndexSampler + ?Sized> IndexSampler for Box<S> {
    fn next_index(&mut self) -> Result<SampleIndex> {
        (**self).next_index()
    }

    fn reset(&mut self) {
        (**self).reset();
    }

    fn visited_count(&self) -> usize {
        (**self).visited_count()
    }

    fn epoch_len(&self) -> usize {
        (**self).epoch_len()
    }
}
