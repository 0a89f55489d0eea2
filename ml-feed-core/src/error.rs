//! Error types for ml-feed pipelines

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for ml-feed operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single sample.
///
/// These are recovered locally: the sample is logged, dropped and the
/// pipeline moves on to the next index.
#[derive(Error, Debug)]
pub enum SampleError {
    /// The data source has no value for this field/index pair
    #[error("no value for field '{field}' at index {index}")]
    NotFound {
        /// Field that was requested
        field: String,
        /// Index that was requested
        index: usize,
    },

    /// IO error while loading the sample
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The raw value could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// A transform node asked for an input that is not present for this sample
    #[error("missing input '{0}'")]
    MissingInput(String),

    /// The value has the wrong kind or geometry for the transform
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Error type for ml-feed operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error outside of per-sample processing
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// Inconsistent construction parameters (empty class, bad sequence length, ...)
    #[error("Construction error: {0}")]
    Construction(String),

    /// A node consumes a name nobody produces
    #[error("node '{node}' consumes '{name}' which is neither a root field nor produced upstream")]
    UnsatisfiedDependency {
        /// Node being added
        node: String,
        /// Name with no producer
        name: String,
    },

    /// Two producers claim the same output name
    #[error("node '{node}' produces '{name}' which is already produced")]
    DuplicateOutput {
        /// Node being added
        node: String,
        /// Name produced twice
        name: String,
    },

    /// Batch packers cannot be mixed this way
    #[error("Incompatible packing: {0}")]
    IncompatiblePacking(String),

    /// A value does not match its declared template
    #[error("Shape mismatch for '{field}': expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Offending field
        field: String,
        /// Expected shape/type description
        expected: String,
        /// Actual shape/type description
        actual: String,
    },

    /// A transform node is misconfigured; never retried
    #[error("node '{node}' is misconfigured: {reason}")]
    Misconfigured {
        /// Node name
        node: String,
        /// What went wrong
        reason: String,
    },

    /// A single sample failed
    #[error("sample failed: {0}")]
    Sample(#[from] SampleError),

    /// Too many consecutive samples failed to fill a batch
    #[error("{attempts} samples failed without completing a batch (last: {last})")]
    PerSampleFailure {
        /// Number of failed attempts
        attempts: usize,
        /// Last failure message
        last: String,
    },

    /// The sampler has visited every index of the epoch
    #[error("End of epoch")]
    EndOfEpoch,

    /// No more batches will be produced
    #[error("Stream exhausted")]
    StreamExhausted,

    /// The pipeline or queue has been closed
    #[error("Pipeline closed")]
    PipelineClosed,

    /// No result arrived within the configured wait
    #[error("No result within {0:?}")]
    ResultTimeout(Duration),

    /// A worker thread failed
    #[error("Worker error: {0}")]
    Worker(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Whether this error only concerns the current sample
    pub fn is_per_sample(&self) -> bool {
        matches!(self, Error::Sample(_))
    }

    /// Whether this is the epoch-end control signal
    pub fn is_end_of_epoch(&self) -> bool {
        matches!(self, Error::EndOfEpoch)
    }

    /// Build a [`Error::ShapeMismatch`] from anything displayable
    pub fn shape_mismatch(
        field: impl Into<String>,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Error::ShapeMismatch {
            field: field.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
