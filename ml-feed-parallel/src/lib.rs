//! Parallel batch assembly for ml-feed
//!
//! [`BatchPipeline`] draws indices from an [`ml_feed_core::IndexSampler`],
//! fetches root fields from an [`ml_feed_core::DataSource`], runs each
//! sample through a [`ml_feed_transforms::TransformGraph`] and packs the
//! results into [`ml_feed_core::Batch`]es. Samples are processed on the
//! calling thread or by a pool of worker threads; with shared memory
//! enabled, results travel through a [`SlotQueue`] of pre-allocated buffers.

#![warn(missing_docs)]

pub mod config;
pub mod pipeline;
pub mod slots;
pub mod worker;

pub use config::{LastBatch, PipelineConfig};
pub use pipeline::{BatchPipeline, PipelineStats};
pub use slots::{ReadSlot, SlotQueue, WriteSlot};
pub use worker::{Delivery, Dropped, GraphFactory, ResultSink, Task};
