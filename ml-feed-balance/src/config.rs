//! Serde-driven sampler configuration

use serde::{Deserialize, Serialize};
use tracing::debug;

use ml_feed_core::{Error, IndexSampler, Result};

use crate::class::{ClassAssignment, ClassBalancer};
use crate::epoch::EpochOptions;
use crate::group::{GroupBalancer, GroupOptions};
use crate::merge::{MergeMode, MergedBalancer};
use crate::sequence::SequenceBalancer;
use crate::uniform::UniformBalancer;

/// Declarative description of a sampler, built against [`SamplerData`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SamplerConfig {
    /// [`UniformBalancer`] over every row
    Uniform {
        /// Shuffle, seed and epoch-end behaviour
        #[serde(flatten)]
        options: EpochOptions,
    },
    /// [`ClassBalancer`] over the label matrix
    Class {
        /// Mapping from label row to class
        #[serde(default)]
        assignment: ClassAssignment,
        /// Shuffle, seed and epoch-end behaviour
        #[serde(flatten)]
        options: EpochOptions,
    },
    /// [`GroupBalancer`] over the group assignment
    Group {
        /// Shuffle, seed and both exhaustion behaviours
        #[serde(flatten)]
        options: GroupOptions,
    },
    /// [`SequenceBalancer`] around another sampler
    Sequence {
        /// Draws per sequence
        length: usize,
        /// Wrapped sampler
        inner: Box<SamplerConfig>,
    },
    /// [`MergedBalancer`] over several samplers
    Merge {
        /// Round robin or joint
        #[serde(default)]
        mode: MergeMode,
        /// Merged samplers, all built against the same data
        balancers: Vec<SamplerConfig>,
    },
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig::Uniform {
            options: EpochOptions::default(),
        }
    }
}

/// Per-row metadata the balancers partition on
#[derive(Debug, Clone, Copy, Default)]
pub struct SamplerData<'a> {
    /// Number of rows in the dataset
    pub len: usize,
    /// `(rows, classes)` label matrix for class balancing
    pub labels: Option<&'a [Vec<f32>]>,
    /// Group key per row for group balancing
    pub groups: Option<&'a [String]>,
}

impl<'a> SamplerData<'a> {
    /// Data with only a row count
    pub fn new(len: usize) -> Self {
        Self {
            len,
            ..Self::default()
        }
    }

    /// Attach a label matrix
    pub fn with_labels(mut self, labels: &'a [Vec<f32>]) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Attach a group assignment
    pub fn with_groups(mut self, groups: &'a [String]) -> Self {
        self.groups = Some(groups);
        self
    }

    fn check_rows(&self, what: &str, rows: usize) -> Result<()> {
        if rows == self.len {
            Ok(())
        } else {
            Err(Error::Construction(format!(
                "{what} has {rows} rows, dataset has {}",
                self.len
            )))
        }
    }
}

impl SamplerConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build the described sampler
    pub fn build(&self, data: &SamplerData<'_>) -> Result<Box<dyn IndexSampler>> {
        debug!("building {} sampler over {} rows", self.kind(), data.len);
        Ok(match self {
            SamplerConfig::Uniform { options } => Box::new(UniformBalancer::new(data.len, *options)),
            SamplerConfig::Class { assignment, options } => {
                let labels = data
                    .labels
                    .ok_or_else(|| Error::Construction("class balancing needs a label matrix".into()))?;
                data.check_rows("label matrix", labels.len())?;
                Box::new(ClassBalancer::new(labels, *assignment, *options)?)
            }
            SamplerConfig::Group { options } => {
                let groups = data
                    .groups
                    .ok_or_else(|| Error::Construction("group balancing needs a group assignment".into()))?;
                data.check_rows("group assignment", groups.len())?;
                Box::new(GroupBalancer::from_assignment(groups, *options)?)
            }
            SamplerConfig::Sequence { length, inner } => {
                Box::new(SequenceBalancer::new(inner.build(data)?, *length)?)
            }
            SamplerConfig::Merge { mode, balancers } => {
                let samplers = balancers
                    .iter()
                    .map(|config| config.build(data))
                    .collect::<Result<Vec<_>>>()?;
                Box::new(MergedBalancer::new(samplers, *mode)?)
            }
        })
    }

    fn kind(&self) -> &'static str {
        match self {
            SamplerConfig::Uniform { .. } => "uniform",
            SamplerConfig::Class { .. } => "class",
            SamplerConfig::Group { .. } => "group",
            SamplerConfig::Sequence { .. } => "sequence",
            SamplerConfig::Merge { .. } => "merge",
        }
    }
}
