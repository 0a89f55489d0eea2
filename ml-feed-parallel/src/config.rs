//! Pipeline configuration

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ml_feed_core::{Packer, Result};

/// What to do with a batch that cannot be filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastBatch {
    /// Discard it at stream end; after a timeout keep the samples for the next call
    Drop,
    /// Return the short batch; `pad` counts the missing rows
    #[default]
    Partial,
    /// Repeat collected samples up to `batch_size`; `pad` counts the repeats
    Pad,
}

/// Configuration for a [`crate::BatchPipeline`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Samples per batch
    pub batch_size: usize,

    /// Stop after this many batches
    pub num_batches: Option<usize>,

    /// Number of worker threads; 0 runs everything on the calling thread
    pub workers: usize,

    /// Capacity of the task queue (at least `batch_size`)
    pub max_tasks: usize,

    /// Capacity of the result queue (at least `batch_size`)
    pub max_results: usize,

    /// Move template-shaped arrays through a [`crate::SlotQueue`]
    pub use_shared_memory: bool,

    /// How long to wait for a result before giving up on the batch
    pub result_timeout: Duration,

    /// Packer per output field
    pub packers: BTreeMap<String, Packer>,

    /// Packer for fields not listed in `packers`
    pub default_packer: Packer,

    /// Short batch policy
    pub last_batch: LastBatch,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            num_batches: None,
            workers: num_cpus::get(),
            max_tasks: 100,
            max_results: 100,
            use_shared_memory: false,
            result_timeout: Duration::from_secs(10),
            packers: BTreeMap::new(),
            default_packer: Packer::default(),
            last_batch: LastBatch::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from JSON; missing keys take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Stop after `num_batches`
    pub fn with_num_batches(mut self, num_batches: usize) -> Self {
        self.num_batches = Some(num_batches);
        self
    }

    /// Set the worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set both queue capacities
    pub fn with_queue_capacity(mut self, max_tasks: usize, max_results: usize) -> Self {
        self.max_tasks = max_tasks;
        self.max_results = max_results;
        self
    }

    /// Enable or disable the shared slot queue
    pub fn with_shared_memory(mut self, enabled: bool) -> Self {
        self.use_shared_memory = enabled;
        self
    }

    /// Set the result timeout
    pub fn with_result_timeout(mut self, timeout: Duration) -> Self {
        self.result_timeout = timeout;
        self
    }

    /// Pack `field` with `packer`
    pub fn with_packer(mut self, field: impl Into<String>, packer: Packer) -> Self {
        self.packers.insert(field.into(), packer);
        self
    }

    /// Set the default packer
    pub fn with_default_packer(mut self, packer: Packer) -> Self {
        self.default_packer = packer;
        self
    }

    /// Set the short batch policy
    pub fn with_last_batch(mut self, last_batch: LastBatch) -> Self {
        self.last_batch = last_batch;
        self
    }

    /// Task queue capacity after clamping to the batch size
    pub fn task_capacity(&self) -> usize {
        self.max_tasks.max(self.batch_size)
    }

    /// Result queue capacity after clamping to the batch size
    pub fn result_capacity(&self) -> usize {
        self.max_results.max(self.batch_size)
    }
}
