//! Index balancing policies for ml-feed pipelines
//!
//! Every balancer implements [`ml_feed_core::IndexSampler`]: a stateful,
//! resettable policy that yields the next dataset row under a fairness
//! contract and reports [`ml_feed_core::Error::EndOfEpoch`] when configured
//! to stop at epoch end instead of rolling over.

#![warn(missing_docs)]

pub mod class;
pub mod config;
pub mod epoch;
pub mod group;
pub mod merge;
pub mod sequence;
pub mod uniform;

pub use class::{ClassAssignment, ClassBalancer};
pub use config::{SamplerConfig, SamplerData};
pub use epoch::EpochOptions;
pub use group::{GroupBalancer, GroupOptions};
pub use merge::{MergeMode, MergedBalancer};
pub use sequence::SequenceBalancer;
pub use uniform::UniformBalancer;
