//! Core traits, value types and batch assembly for ml-feed pipelines
//!
//! This crate defines the pieces every other ml-feed crate builds on: the
//! error taxonomy, per-sample values and field templates, the data source
//! and index sampler collaborators, the transform node contract and the
//! packing of processed samples into batches.

#![warn(missing_docs)]

pub mod batch;
pub mod error;
pub mod sampler;
pub mod schema;
pub mod source;
pub mod transform;
pub mod value;

// Re-export key types for convenience
pub use batch::{Batch, PackedField, Packer, PackingPlan};
pub use error::{Error, Result, SampleError};
pub use sampler::{IndexSampler, SampleIndex};
pub use schema::{DataType, FieldTemplate};
pub use source::{DataSource, MemorySource};
pub use transform::{NodeInputs, TransformNode};
pub use value::{ArrayData, ArrayValue, Record, Value};
